//! fOS Tune - Page Performance Engine
//!
//! Injected into a long-lived chat page it does not control, the engine:
//! - throttles high-frequency input listeners at registration time
//! - collapses off-screen messages into fixed-height placeholders
//! - sweeps closed tooltips, empty styles and empty overlay portals
//! - defers code-block rendering until a block nears the viewport
//! - releases off-screen blob images under heap pressure
//! - injects CSS for animation, repaint and scroll tweaks
//! - marks images for lazy loading and refuses telemetry requests
//!
//! # Usage
//!
//! ```
//! use fos_page::HeadlessPage;
//! use fos_tune::{Config, Engine};
//!
//! let page = HeadlessPage::new();
//! let engine = Engine::install(&page.host(), Config::default()).unwrap();
//! println!("{}", engine.status().summary());
//! ```
//!
//! Each component schedules itself on the page's event loop after install.
//! There is no teardown: components live as long as the [`fos_page::Host`].

pub mod config;
pub mod engine;
pub mod error;
pub mod images;
pub mod janitor;
pub mod lazy_render;
pub mod markers;
pub mod memory;
pub mod status;
pub mod styles;
pub mod telemetry;
pub mod throttle;
pub mod virtualizer;

pub use config::{Config, ConfigError, ConfigFormat, ConfigResolver, Feature, FeatureSet, Tuning};
pub use engine::Engine;
pub use error::EngineError;
pub use images::ImageOptimizer;
pub use janitor::{Janitor, JanitorStats};
pub use lazy_render::LazyRenderer;
pub use memory::{CheckOutcome, CheckTrigger, MemoryMonitor, MemoryStats, PressureLevel};
pub use status::{Component, EngineStatus};
pub use telemetry::TelemetryFilter;
pub use throttle::ThrottleInterceptor;
pub use virtualizer::{VirtualState, Virtualizer, VirtualizerStats};
