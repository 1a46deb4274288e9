//! Engine Configuration
//!
//! One immutable [`Config`] is resolved before anything installs: which of
//! the ten features are on, plus the [`Tuning`] constants the components run
//! with. [`ConfigResolver`] merges built-in defaults with an optional
//! persisted override file (TOML or JSON, picked by extension):
//!
//! ```toml
//! [features]
//! animation-disable = true
//! memory-heuristics = false
//!
//! [tuning]
//! throttle_window_ms = 150
//! ```
//!
//! Unknown feature keys are ignored. In a plain feature map (see
//! [`Config::from_json_value`]) a missing key means disabled.

use fos_page::Selector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse overrides: {0}")]
    Parse(String),

    #[error("Unsupported override file format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid tuning value: {0}")]
    Invalid(String),
}

/// Engine features, keyed by their kebab-case names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    AnimationDisable,
    InputThrottle,
    TelemetryBlock,
    DomCleanup,
    RepaintReduction,
    LazyCodeRender,
    InstantScroll,
    MessageVirtualization,
    MemoryHeuristics,
    ImageOptimization,
}

impl Feature {
    pub const ALL: [Feature; 10] = [
        Feature::AnimationDisable,
        Feature::InputThrottle,
        Feature::TelemetryBlock,
        Feature::DomCleanup,
        Feature::RepaintReduction,
        Feature::LazyCodeRender,
        Feature::InstantScroll,
        Feature::MessageVirtualization,
        Feature::MemoryHeuristics,
        Feature::ImageOptimization,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::AnimationDisable => "animation-disable",
            Self::InputThrottle => "input-throttle",
            Self::TelemetryBlock => "telemetry-block",
            Self::DomCleanup => "dom-cleanup",
            Self::RepaintReduction => "repaint-reduction",
            Self::LazyCodeRender => "lazy-code-render",
            Self::InstantScroll => "instant-scroll",
            Self::MessageVirtualization => "message-virtualization",
            Self::MemoryHeuristics => "memory-heuristics",
            Self::ImageOptimization => "image-optimization",
        }
    }

    /// Whether the feature is on when nothing overrides it.
    pub fn default_enabled(&self) -> bool {
        !matches!(self, Self::AnimationDisable | Self::InstantScroll)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Feature {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.key() == s)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown feature '{s}'")))
    }
}

/// Feature name → enabled. Features not present are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet {
    flags: BTreeMap<Feature, bool>,
}

impl FeatureSet {
    /// Everything disabled.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            flags: Feature::ALL.into_iter().map(|f| (f, true)).collect(),
        }
    }

    /// The built-in feature policy.
    pub fn defaults() -> Self {
        Self {
            flags: Feature::ALL
                .into_iter()
                .map(|f| (f, f.default_enabled()))
                .collect(),
        }
    }

    /// Build from raw `(name, enabled)` pairs, ignoring unknown names.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, bool)>) -> Self {
        let mut set = Self::none();
        set.apply(pairs);
        set
    }

    /// Overlay raw `(name, enabled)` pairs onto this set.
    fn apply<'a>(&mut self, pairs: impl IntoIterator<Item = (&'a str, bool)>) {
        for (name, enabled) in pairs {
            match name.parse::<Feature>() {
                Ok(feature) => {
                    self.flags.insert(feature, enabled);
                }
                Err(_) => debug!(key = name, "Ignoring unknown feature key"),
            }
        }
    }

    pub fn with(mut self, feature: Feature, enabled: bool) -> Self {
        self.flags.insert(feature, enabled);
        self
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.flags.get(&feature).copied().unwrap_or(false)
    }

    /// Enabled features in declaration order.
    pub fn enabled(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL.into_iter().filter(|f| self.is_enabled(*f))
    }

    /// All ten keys with their resolved values.
    pub fn to_map(&self) -> BTreeMap<String, bool> {
        Feature::ALL
            .into_iter()
            .map(|f| (f.key().to_string(), self.is_enabled(f)))
            .collect()
    }
}

/// Numeric and selector constants every component runs with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tuning {
    /// Minimum spacing between real invocations of a throttled listener
    pub throttle_window_ms: u64,
    /// Extension of the viewport on both edges before a message collapses
    pub viewport_margin_px: f32,
    /// Periodic virtualization sweep
    pub virtualize_interval_ms: u64,
    /// Below this many messages nothing is collapsed
    pub min_tracked: usize,
    /// The last N messages are never collapsed
    pub exempt_tail: usize,
    pub message_selector: String,
    pub janitor_interval_ms: u64,
    /// Pre-render margin for code blocks
    pub lazy_margin_px: f32,
    pub code_selector: String,
    pub memory_interval_ms: u64,
    /// Heap usage ratio above which mitigation runs
    pub memory_threshold: f64,
    /// Minimum spacing between mitigation passes
    pub memory_cooldown_ms: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            throttle_window_ms: 100,
            viewport_margin_px: 1200.0,
            virtualize_interval_ms: 2000,
            min_tracked: 12,
            exempt_tail: 4,
            message_selector: r#"article[data-testid^="conversation-turn"]"#.to_string(),
            janitor_interval_ms: 30_000,
            lazy_margin_px: 400.0,
            code_selector: "pre".to_string(),
            memory_interval_ms: 60_000,
            memory_threshold: 0.8,
            memory_cooldown_ms: 30_000,
        }
    }
}

impl Tuning {
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn virtualize_interval(&self) -> Duration {
        Duration::from_millis(self.virtualize_interval_ms)
    }

    pub fn janitor_interval(&self) -> Duration {
        Duration::from_millis(self.janitor_interval_ms)
    }

    pub fn memory_interval(&self) -> Duration {
        Duration::from_millis(self.memory_interval_ms)
    }

    pub fn memory_cooldown(&self) -> Duration {
        Duration::from_millis(self.memory_cooldown_ms)
    }

    pub fn message_selector(&self) -> Result<Selector, ConfigError> {
        Selector::parse(&self.message_selector)
            .map_err(|e| ConfigError::Invalid(format!("message_selector: {e}")))
    }

    pub fn code_selector(&self) -> Result<Selector, ConfigError> {
        Selector::parse(&self.code_selector)
            .map_err(|e| ConfigError::Invalid(format!("code_selector: {e}")))
    }

    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "memory_threshold must be in (0, 1], got {}",
                self.memory_threshold
            )));
        }
        if self.viewport_margin_px < 0.0 || self.lazy_margin_px < 0.0 {
            return Err(ConfigError::Invalid("margins must not be negative".into()));
        }
        for (name, ms) in [
            ("virtualize_interval_ms", self.virtualize_interval_ms),
            ("janitor_interval_ms", self.janitor_interval_ms),
            ("memory_interval_ms", self.memory_interval_ms),
        ] {
            if ms == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        self.message_selector()?;
        self.code_selector()?;
        Ok(())
    }
}

/// Partial tuning as read from an override file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TuningOverrides {
    pub throttle_window_ms: Option<u64>,
    pub viewport_margin_px: Option<f32>,
    pub virtualize_interval_ms: Option<u64>,
    pub min_tracked: Option<usize>,
    pub exempt_tail: Option<usize>,
    pub message_selector: Option<String>,
    pub janitor_interval_ms: Option<u64>,
    pub lazy_margin_px: Option<f32>,
    pub code_selector: Option<String>,
    pub memory_interval_ms: Option<u64>,
    pub memory_threshold: Option<f64>,
    pub memory_cooldown_ms: Option<u64>,
}

impl TuningOverrides {
    pub fn apply_to(self, tuning: &mut Tuning) {
        if let Some(v) = self.throttle_window_ms {
            tuning.throttle_window_ms = v;
        }
        if let Some(v) = self.viewport_margin_px {
            tuning.viewport_margin_px = v;
        }
        if let Some(v) = self.virtualize_interval_ms {
            tuning.virtualize_interval_ms = v;
        }
        if let Some(v) = self.min_tracked {
            tuning.min_tracked = v;
        }
        if let Some(v) = self.exempt_tail {
            tuning.exempt_tail = v;
        }
        if let Some(v) = self.message_selector {
            tuning.message_selector = v;
        }
        if let Some(v) = self.janitor_interval_ms {
            tuning.janitor_interval_ms = v;
        }
        if let Some(v) = self.lazy_margin_px {
            tuning.lazy_margin_px = v;
        }
        if let Some(v) = self.code_selector {
            tuning.code_selector = v;
        }
        if let Some(v) = self.memory_interval_ms {
            tuning.memory_interval_ms = v;
        }
        if let Some(v) = self.memory_threshold {
            tuning.memory_threshold = v;
        }
        if let Some(v) = self.memory_cooldown_ms {
            tuning.memory_cooldown_ms = v;
        }
    }
}

/// On-disk override file.
#[derive(Debug, Default, Deserialize)]
struct OverrideFile {
    #[serde(default)]
    features: BTreeMap<String, bool>,
    #[serde(default)]
    tuning: TuningOverrides,
}

#[derive(Serialize)]
struct ConfigView<'a> {
    features: BTreeMap<String, bool>,
    tuning: &'a Tuning,
}

/// Resolved, immutable engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    features: FeatureSet,
    tuning: Tuning,
}

impl Default for Config {
    fn default() -> Self {
        Self::new(FeatureSet::defaults(), Tuning::default())
    }
}

impl Config {
    pub fn new(features: FeatureSet, tuning: Tuning) -> Self {
        Self { features, tuning }
    }

    /// Build from the opaque value handed over at injection time.
    ///
    /// Accepts a flat object of feature keys to booleans. Unknown keys and
    /// non-boolean values are ignored; missing keys are disabled. An
    /// optional `"tuning"` object overrides tuning defaults.
    pub fn from_json_value(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let object = value
            .as_object()
            .ok_or_else(|| ConfigError::Parse("configuration must be an object".into()))?;

        let features = FeatureSet::from_pairs(
            object
                .iter()
                .filter_map(|(k, v)| v.as_bool().map(|b| (k.as_str(), b))),
        );

        let mut tuning = Tuning::default();
        if let Some(raw) = object.get("tuning") {
            let overrides: TuningOverrides = serde_json::from_value(raw.clone())
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            overrides.apply_to(&mut tuning);
        }
        tuning.validate()?;

        Ok(Self::new(features, tuning))
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.features.is_enabled(feature)
    }

    /// Render as an override file that reproduces this configuration.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let view = ConfigView {
            features: self.features.to_map(),
            tuning: &self.tuning,
        };
        toml::to_string_pretty(&view).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Override file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Self::Toml),
            Some("json") => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }
}

/// Default override file location: `<config dir>/fos-tune/overrides.toml`.
pub fn default_overrides_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("fos-tune").join("overrides.toml"))
}

/// Merges built-in defaults with persisted overrides.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    defaults: Config,
    overrides_path: Option<PathBuf>,
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigResolver {
    /// Built-in defaults plus the file at [`default_overrides_path`].
    pub fn new() -> Self {
        Self {
            defaults: Config::default(),
            overrides_path: default_overrides_path(),
        }
    }

    pub fn with_defaults(mut self, defaults: Config) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_overrides_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.overrides_path = Some(path.into());
        self
    }

    pub fn without_overrides(mut self) -> Self {
        self.overrides_path = None;
        self
    }

    pub fn overrides_path(&self) -> Option<&Path> {
        self.overrides_path.as_deref()
    }

    /// Resolve the configuration. A missing override file means no
    /// overrides; an unreadable or malformed one is an error.
    pub fn resolve(&self) -> Result<Config, ConfigError> {
        let Some(path) = &self.overrides_path else {
            return self.finish(OverrideFile::default());
        };

        let format = ConfigFormat::from_path(path)?;
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No override file, using defaults");
                return self.finish(OverrideFile::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };

        info!(path = %path.display(), "Loading configuration overrides");
        self.resolve_str(&content, format)
    }

    /// Resolve with overrides given as text.
    pub fn resolve_str(&self, content: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
        let file: OverrideFile = match format {
            ConfigFormat::Toml => {
                toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            ConfigFormat::Json => {
                serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
        };
        self.finish(file)
    }

    fn finish(&self, file: OverrideFile) -> Result<Config, ConfigError> {
        let mut features = self.defaults.features.clone();
        features.apply(file.features.iter().map(|(k, v)| (k.as_str(), *v)));

        let mut tuning = self.defaults.tuning.clone();
        file.tuning.apply_to(&mut tuning);
        tuning.validate()?;

        Ok(Config::new(features, tuning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_policy() {
        let config = Config::default();

        assert!(!config.is_enabled(Feature::AnimationDisable));
        assert!(!config.is_enabled(Feature::InstantScroll));
        assert!(config.is_enabled(Feature::InputThrottle));
        assert!(config.is_enabled(Feature::MessageVirtualization));
        assert_eq!(config.features().enabled().count(), 8);
        assert_eq!(config.tuning().throttle_window(), Duration::from_millis(100));
    }

    #[test]
    fn test_json_value_unknown_and_missing_keys() {
        let config = Config::from_json_value(&json!({
            "input-throttle": true,
            "dom-cleanup": false,
            "turbo-mode": true,
            "memory-heuristics": "yes",
        }))
        .unwrap();

        assert!(config.is_enabled(Feature::InputThrottle));
        assert!(!config.is_enabled(Feature::DomCleanup));
        // Non-boolean and missing keys are both off
        assert!(!config.is_enabled(Feature::MemoryHeuristics));
        assert!(!config.is_enabled(Feature::MessageVirtualization));
        assert_eq!(config.features().enabled().collect::<Vec<_>>(), vec![Feature::InputThrottle]);
    }

    #[test]
    fn test_json_value_tuning() {
        let config = Config::from_json_value(&json!({
            "message-virtualization": true,
            "tuning": { "min_tracked": 3, "exempt_tail": 1 },
        }))
        .unwrap();

        assert_eq!(config.tuning().min_tracked, 3);
        assert_eq!(config.tuning().exempt_tail, 1);
        assert_eq!(config.tuning().viewport_margin_px, 1200.0);

        assert!(Config::from_json_value(&json!(["input-throttle"])).is_err());
    }

    #[test]
    fn test_toml_overrides_merge() {
        let resolver = ConfigResolver::new().without_overrides();
        let config = resolver
            .resolve_str(
                r#"
                [features]
                animation-disable = true
                memory-heuristics = false
                unknown-feature = true

                [tuning]
                throttle_window_ms = 250
                "#,
                ConfigFormat::Toml,
            )
            .unwrap();

        assert!(config.is_enabled(Feature::AnimationDisable));
        assert!(!config.is_enabled(Feature::MemoryHeuristics));
        // Untouched keys keep their defaults
        assert!(config.is_enabled(Feature::DomCleanup));
        assert_eq!(config.tuning().throttle_window_ms, 250);
        assert_eq!(config.tuning().janitor_interval_ms, 30_000);
    }

    #[test]
    fn test_json_overrides() {
        let resolver = ConfigResolver::new().without_overrides();
        let config = resolver
            .resolve_str(
                r#"{"features": {"instant-scroll": true}, "tuning": {"memory_threshold": 0.5}}"#,
                ConfigFormat::Json,
            )
            .unwrap();

        assert!(config.is_enabled(Feature::InstantScroll));
        assert_eq!(config.tuning().memory_threshold, 0.5);
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let resolver = ConfigResolver::new().without_overrides();

        let bad_threshold = resolver.resolve_str("[tuning]\nmemory_threshold = 1.5", ConfigFormat::Toml);
        assert!(matches!(bad_threshold, Err(ConfigError::Invalid(_))));

        let bad_selector = resolver.resolve_str("[tuning]\ncode_selector = \"pre code\"", ConfigFormat::Toml);
        assert!(matches!(bad_selector, Err(ConfigError::Invalid(_))));

        let typo = resolver.resolve_str("[tuning]\nthrottle_windw_ms = 5", ConfigFormat::Toml);
        assert!(matches!(typo, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!("fos-tune-missing-{}.toml", std::process::id()));
        let config = ConfigResolver::new().with_overrides_path(&path).resolve().unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("fos-tune-roundtrip-{}.toml", std::process::id()));
        let original = Config::new(
            FeatureSet::defaults().with(Feature::AnimationDisable, true),
            Tuning {
                min_tracked: 20,
                ..Tuning::default()
            },
        );
        std::fs::write(&path, original.to_toml().unwrap()).unwrap();

        let loaded = ConfigResolver::new().with_overrides_path(&path).resolve().unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, original);
    }

    #[test]
    fn test_unsupported_extension() {
        let result = ConfigResolver::new().with_overrides_path("/tmp/overrides.yaml").resolve();

        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "yaml"));
    }
}
