use std::path::PathBuf;

use crate::error::{SrsError, SrsResult};
use crate::queue::QueueLimits;
use crate::scheduler::SchedulerParams;
use crate::types::DEFAULT_RETENTION_THRESHOLD;

/// An environment value that could not be parsed and was replaced by its default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredSetting {
    pub variable: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct SrsConfig {
    pub scheduler: SchedulerParams,
    pub limits: QueueLimits,
    pub retention_threshold: f64,
    pub log_level: String,
    /// Directory for the rolling log file; `None` keeps logs on stderr only.
    pub log_dir: Option<PathBuf>,
    /// Settings that fell back to defaults. Configuration is read before the
    /// subscriber exists, so these are reported through [`SrsConfig::log_ignored`].
    pub ignored: Vec<IgnoredSetting>,
}

impl Default for SrsConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerParams::default(),
            limits: QueueLimits::default(),
            retention_threshold: DEFAULT_RETENTION_THRESHOLD,
            log_level: "info".to_string(),
            log_dir: None,
            ignored: Vec::new(),
        }
    }
}

impl SrsConfig {
    pub fn from_env() -> SrsResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    ///
    /// Unparsable scalars fall back to their defaults and are collected in
    /// `ignored`; an unreadable parameter file or an invalid final table is an
    /// error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SrsResult<Self> {
        let mut ignored = Vec::new();
        let mut scheduler = match lookup("SRS_PARAMS_FILE") {
            Some(path) => load_params_file(PathBuf::from(path))?,
            None => SchedulerParams::default(),
        };

        if let Some(value) = parsed(&lookup, &mut ignored, "SRS_DESIRED_RETENTION", |v| {
            v.parse::<f64>().ok()
        }) {
            scheduler.desired_retention = value;
        }
        if let Some(value) = parsed(&lookup, &mut ignored, "SRS_MAXIMUM_INTERVAL_DAYS", |v| {
            v.parse::<f64>().ok()
        }) {
            scheduler.maximum_interval_days = value;
        }
        if let Some(steps) = parsed(&lookup, &mut ignored, "SRS_LEARNING_STEPS", parse_steps) {
            scheduler.learning_steps_minutes = steps;
        }
        if let Some(steps) = parsed(&lookup, &mut ignored, "SRS_RELEARNING_STEPS", parse_steps) {
            scheduler.relearning_steps_minutes = steps;
        }
        scheduler.validate()?;

        let defaults = QueueLimits::default();
        let limits = QueueLimits {
            max_due: parsed(&lookup, &mut ignored, "SRS_MAX_DUE", |v| v.parse::<usize>().ok())
                .unwrap_or(defaults.max_due),
            max_new: parsed(&lookup, &mut ignored, "SRS_MAX_NEW", |v| v.parse::<usize>().ok())
                .unwrap_or(defaults.max_new),
        };

        let retention_threshold = parsed(&lookup, &mut ignored, "SRS_RETENTION_THRESHOLD", |v| {
            v.parse::<f64>().ok().filter(|t| (0.0..=1.0).contains(t))
        })
        .unwrap_or(DEFAULT_RETENTION_THRESHOLD);

        let log_level = lookup("RUST_LOG").unwrap_or_else(|| "info".to_string());
        let log_dir = lookup("ENABLE_FILE_LOGS")
            .filter(|flag| matches!(flag.trim(), "true" | "1"))
            .map(|_| PathBuf::from(lookup("LOG_DIR").unwrap_or_else(|| "./logs".to_string())));

        Ok(Self {
            scheduler,
            limits,
            retention_threshold,
            log_level,
            log_dir,
            ignored,
        })
    }

    /// Report settings that fell back to defaults. Call once tracing is up.
    pub fn log_ignored(&self) {
        for setting in &self.ignored {
            tracing::warn!(
                variable = setting.variable,
                value = %setting.value,
                "ignoring unparsable setting"
            );
        }
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    ignored: &mut Vec<IgnoredSetting>,
    name: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(name)?;
    let value = parse(raw.trim());
    if value.is_none() {
        ignored.push(IgnoredSetting {
            variable: name,
            value: raw,
        });
    }
    value
}

fn load_params_file(path: PathBuf) -> SrsResult<SchedulerParams> {
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        SrsError::Config(format!("cannot read params file {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw)
        .map_err(|e| SrsError::Config(format!("invalid params file {}: {e}", path.display())))
}

/// Parse a step list such as `1m,10m,1h` into minutes. Bare numbers are minutes.
pub fn parse_steps(raw: &str) -> Option<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|token| {
            let (number, scale) = match token.char_indices().last()? {
                (idx, 'm') => (&token[..idx], 1.0),
                (idx, 'h') => (&token[..idx], 60.0),
                (idx, 'd') => (&token[..idx], 1440.0),
                (idx, 's') => (&token[..idx], 1.0 / 60.0),
                _ => (token, 1.0),
            };
            number
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v > 0.0)
                .map(|v| v * scale)
        })
        .collect::<Option<Vec<f64>>>()
        .filter(|steps| !steps.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = SrsConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.scheduler, SchedulerParams::default());
        assert_eq!(config.limits, QueueLimits::default());
        assert_eq!(config.log_level, "info");
        assert!(config.ignored.is_empty());
    }

    #[test]
    fn test_overrides() {
        let config = SrsConfig::from_lookup(lookup_from(&[
            ("SRS_DESIRED_RETENTION", "0.85"),
            ("SRS_LEARNING_STEPS", "1m, 15m, 1h"),
            ("SRS_MAX_NEW", "5"),
            ("SRS_RETENTION_THRESHOLD", "0.7"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.scheduler.desired_retention, 0.85);
        assert_eq!(config.scheduler.learning_steps_minutes, vec![1.0, 15.0, 60.0]);
        assert_eq!(config.limits.max_new, 5);
        assert_eq!(config.limits.max_due, QueueLimits::default().max_due);
        assert_eq!(config.retention_threshold, 0.7);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = SrsConfig::from_lookup(lookup_from(&[
            ("SRS_MAX_DUE", "lots"),
            ("SRS_LEARNING_STEPS", "soon"),
            ("SRS_RETENTION_THRESHOLD", "3"),
        ]))
        .unwrap();
        assert_eq!(config.limits.max_due, QueueLimits::default().max_due);
        assert_eq!(config.scheduler.learning_steps_minutes, vec![1.0, 10.0]);
        assert_eq!(config.retention_threshold, DEFAULT_RETENTION_THRESHOLD);

        let reported: Vec<(&str, &str)> = config
            .ignored
            .iter()
            .map(|s| (s.variable, s.value.as_str()))
            .collect();
        assert_eq!(
            reported,
            vec![
                ("SRS_LEARNING_STEPS", "soon"),
                ("SRS_MAX_DUE", "lots"),
                ("SRS_RETENTION_THRESHOLD", "3"),
            ]
        );
    }

    #[test]
    fn test_valid_values_not_reported() {
        let config = SrsConfig::from_lookup(lookup_from(&[
            ("SRS_MAX_DUE", "50"),
            ("SRS_RELEARNING_STEPS", "5m"),
        ]))
        .unwrap();
        assert!(config.ignored.is_empty());
    }

    #[test]
    fn test_file_logging_switch() {
        let off = SrsConfig::from_lookup(lookup_from(&[("LOG_DIR", "/tmp/x")])).unwrap();
        assert_eq!(off.log_dir, None);

        let on = SrsConfig::from_lookup(lookup_from(&[("ENABLE_FILE_LOGS", "1")])).unwrap();
        assert_eq!(on.log_dir, Some(PathBuf::from("./logs")));

        let custom = SrsConfig::from_lookup(lookup_from(&[
            ("ENABLE_FILE_LOGS", "true"),
            ("LOG_DIR", "/var/log/srs"),
        ]))
        .unwrap();
        assert_eq!(custom.log_dir, Some(PathBuf::from("/var/log/srs")));
    }

    #[test]
    fn test_invalid_table_rejected() {
        let err = SrsConfig::from_lookup(lookup_from(&[("SRS_DESIRED_RETENTION", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, SrsError::Config(_)));
    }

    #[test]
    fn test_params_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"maximumIntervalDays": 365, "relearningStepsMinutes": [5, 20]}"#)
            .unwrap();
        let config = SrsConfig::from_lookup(lookup_from(&[(
            "SRS_PARAMS_FILE",
            path.to_str().unwrap(),
        )]))
        .unwrap();
        assert_eq!(config.scheduler.maximum_interval_days, 365.0);
        assert_eq!(config.scheduler.relearning_steps_minutes, vec![5.0, 20.0]);

        let missing = SrsConfig::from_lookup(lookup_from(&[("SRS_PARAMS_FILE", "/nope/p.json")]));
        assert!(missing.is_err());
    }

    #[test]
    fn test_parse_steps() {
        assert_eq!(parse_steps("1m,10m"), Some(vec![1.0, 10.0]));
        assert_eq!(parse_steps("30s, 2h, 1d"), Some(vec![0.5, 120.0, 1440.0]));
        assert_eq!(parse_steps("5"), Some(vec![5.0]));
        assert_eq!(parse_steps(""), None);
        assert_eq!(parse_steps("0m"), None);
        assert_eq!(parse_steps("xm"), None);
    }
}
