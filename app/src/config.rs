use scrub_core::{Detectors, LabelSet, ResolveOptions, DEFAULT_ENTITIES};
use scrub_rules::{PatternMatcher, PatternRule, RecognizerRegistry, RulesError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Inputs larger than this are rejected before parsing.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RedactConfig {
    // ============ Detection ============
    /// Entity labels the analyzer reports.
    pub entities: Vec<String>,
    /// Analyzer language; only `en` is supported by the built-in analyzer.
    pub language: String,
    /// Entity spans scoring below this are ignored.
    pub score_threshold: f32,
    /// Extra pattern recognizers.
    pub custom_rules: Vec<PatternRule>,
    /// Per-document budget for entity analysis, unlimited when unset.
    pub detection_timeout_ms: Option<u64>,

    // ============ Resolution ============
    pub merge_overlaps: bool,

    // ============ Processing ============
    /// Redact batch documents on the rayon pool.
    pub parallel: bool,
    pub max_file_bytes: u64,
    /// Strip PDF Info/XMP metadata after redaction.
    pub clean_metadata: bool,
    /// Re-scan every output and attach the residual report.
    pub verify: bool,
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self {
            entities: DEFAULT_ENTITIES.iter().map(|s| s.to_string()).collect(),
            language: "en".to_string(),
            score_threshold: 0.0,
            custom_rules: Vec::new(),
            detection_timeout_ms: None,
            merge_overlaps: false,
            parallel: true,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            clean_metadata: false,
            verify: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
    #[error(transparent)]
    Rules(#[from] RulesError),
}

impl RedactConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!("[Config] {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Applies `SCRUB_LANGUAGE`, `SCRUB_DETECTION_TIMEOUT_MS` and
    /// `SCRUB_PARALLEL` from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(language) = lookup("SCRUB_LANGUAGE") {
            self.language = language;
        }
        if let Some(raw) = lookup("SCRUB_DETECTION_TIMEOUT_MS") {
            let ms: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                key: "SCRUB_DETECTION_TIMEOUT_MS",
                value: raw.clone(),
            })?;
            self.detection_timeout_ms = if ms == 0 { None } else { Some(ms) };
        }
        if let Some(raw) = lookup("SCRUB_PARALLEL") {
            self.parallel = parse_flag(&raw).ok_or(ConfigError::InvalidEnv {
                key: "SCRUB_PARALLEL",
                value: raw.clone(),
            })?;
        }
        Ok(())
    }

    pub fn resolve_options(&self) -> ResolveOptions {
        ResolveOptions {
            merge_overlaps: self.merge_overlaps,
        }
    }

    /// Builds the shared detector set: the structured matcher and the
    /// built-in analyzer extended with `custom_rules`.
    pub fn build_detectors(&self) -> Result<Detectors, ConfigError> {
        let mut registry = RecognizerRegistry::with_defaults()?;
        for rule in &self.custom_rules {
            registry.add_rule(rule)?;
        }
        registry.set_score_threshold(self.score_threshold);
        log::info!(
            "[Config] {} recognizer(s), {} label(s), language {}",
            registry.len(),
            self.entities.len(),
            self.language
        );

        Ok(Detectors::new(Arc::new(PatternMatcher::new()), Arc::new(registry))
            .with_labels(LabelSet::new(self.entities.iter()))
            .with_language(self.language.clone())
            .with_timeout(self.detection_timeout_ms.map(Duration::from_millis)))
    }
}

/// `1/true/yes/on` and `0/false/no/off`, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RedactConfig =
            serde_json::from_str(r#"{"scoreThreshold":0.5,"parallel":false}"#).unwrap();
        assert_eq!(config.score_threshold, 0.5);
        assert!(!config.parallel);
        assert_eq!(config.language, "en");
        assert_eq!(config.entities.len(), DEFAULT_ENTITIES.len());
        assert_eq!(config.max_file_bytes, DEFAULT_MAX_FILE_BYTES);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("scrub.json");
        let mut config = RedactConfig::default();
        config.custom_rules.push(PatternRule::new(
            "badge",
            "BADGE_ID",
            r"\bB-\d{4}\b",
            0.7,
        ));
        config.entities.push("BADGE_ID".into());
        config.save(&path).unwrap();

        let loaded = RedactConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("customRules"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = RedactConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, RedactConfig::default());
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(RedactConfig::load(&path), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RedactConfig::default();
        config
            .apply_overrides(env(&[
                ("SCRUB_LANGUAGE", "fr"),
                ("SCRUB_DETECTION_TIMEOUT_MS", "250"),
                ("SCRUB_PARALLEL", "off"),
            ]))
            .unwrap();
        assert_eq!(config.language, "fr");
        assert_eq!(config.detection_timeout_ms, Some(250));
        assert!(!config.parallel);

        let err = config
            .apply_overrides(env(&[("SCRUB_PARALLEL", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "SCRUB_PARALLEL", .. }));
    }

    #[test]
    fn test_custom_rules_reach_detectors() {
        let mut config = RedactConfig::default();
        config.custom_rules.push(PatternRule::new(
            "badge",
            "BADGE_ID",
            r"\bB-\d{4}\b",
            0.7,
        ));
        config.entities.push("BADGE_ID".into());
        let detectors = config.build_detectors().unwrap();
        let spans = detectors.session().entities("badge B-1234").unwrap();
        assert!(spans.iter().any(|s| s.label == "BADGE_ID"));
    }

    #[test]
    fn test_invalid_custom_rule() {
        let mut config = RedactConfig::default();
        config
            .custom_rules
            .push(PatternRule::new("broken", "X", "(unclosed", 0.5));
        assert!(matches!(config.build_detectors(), Err(ConfigError::Rules(_))));
    }
}
