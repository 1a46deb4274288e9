//! Style Injector
//!
//! The CSS-only features share one engine-owned `<style>` element.

use crate::config::{Config, Feature};
use crate::error::{EngineError, require};
use crate::markers::{LAZY_ATTR, LAZY_PENDING, OWNED_ATTR, VIRTUALIZED_ATTR, VIRTUALIZED_COLLAPSED};
use fos_page::{Capability, Host, NodeId};
use std::fmt::Write;
use tracing::info;

/// Marker value identifying the injected stylesheet.
pub const STYLESHEET_OWNER: &str = "styles";

/// Build the stylesheet for the enabled CSS features, if any.
pub fn stylesheet(config: &Config) -> Option<String> {
    let tuning = config.tuning();
    let mut css = String::new();

    if config.is_enabled(Feature::AnimationDisable) {
        css.push_str(
            "*, *::before, *::after { animation: none !important; transition: none !important; }\n",
        );
    }
    if config.is_enabled(Feature::RepaintReduction) {
        let _ = writeln!(css, "{} {{ contain: layout paint; }}", tuning.message_selector);
    }
    if config.is_enabled(Feature::InstantScroll) {
        css.push_str("html, body, * { scroll-behavior: auto !important; }\n");
    }
    if config.is_enabled(Feature::LazyCodeRender) {
        let _ = writeln!(
            css,
            "[{LAZY_ATTR}=\"{LAZY_PENDING}\"] {{ content-visibility: auto; contain-intrinsic-size: auto 300px; }}"
        );
    }
    if config.is_enabled(Feature::MessageVirtualization) {
        let _ = writeln!(
            css,
            "[{VIRTUALIZED_ATTR}=\"{VIRTUALIZED_COLLAPSED}\"] {{ contain: strict; }}"
        );
    }

    (!css.is_empty()).then_some(css)
}

/// Insert the stylesheet. Returns the new element, or `None` when no CSS
/// feature is enabled.
pub fn install(host: &Host, config: &Config) -> Result<Option<NodeId>, EngineError> {
    let Some(css) = stylesheet(config) else {
        return Ok(None);
    };
    let document = require(host.document(), Capability::Document)?;

    let style = document.create_element("style");
    document.set_attribute(style, OWNED_ATTR, STYLESHEET_OWNER)?;
    document.set_text_content(style, &css)?;
    document.append_child(document.root(), style)?;

    info!(rules = css.lines().count(), "Stylesheet injected");
    Ok(Some(style))
}
