//! System configuration: compiled defaults, optional file, then environment

use std::path::Path;

use alerting::AlertConfig;
use camera_capture::CaptureConfig;
use config::{Config, Environment, File};
use fatigue::FatigueConfig;
use perception::PerceptionConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::PipelineError;

/// Prefix of environment overrides, e.g. `FATIGUE__FATIGUE__WINDOW_MS=30000`
pub const ENV_PREFIX: &str = "FATIGUE";

/// Logging options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON lines instead of human-readable output
    pub json: bool,
}

/// Session behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run eye/mouth/head-position calibration on the first frames.
    /// When off, the default eye threshold is used and yawn/gaze/nod stay inactive.
    pub calibrate_on_start: bool,
    /// Give up after this many capture errors in a row
    pub max_consecutive_capture_errors: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            calibrate_on_start: true,
            max_consecutive_capture_errors: 30,
        }
    }
}

/// Everything the monitor reads at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub capture: CaptureConfig,
    pub perception: PerceptionConfig,
    pub fatigue: FatigueConfig,
    pub alert: AlertConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

impl SystemConfig {
    /// Layer defaults, `path` (TOML/YAML/JSON by extension) and `FATIGUE__*`
    /// environment variables, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: SystemConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.capture.validate()?;
        self.perception.validate()?;
        self.fatigue.validate()?;
        self.alert.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SystemConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fatigue.window_ms, 60_000);
        assert!(config.session.calibrate_on_start);
    }

    #[test]
    fn test_load_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[fatigue]
perclos_warn = 0.2
microsleep_ms = 2000

[capture]
crop_ratio = 0.65

[perception]
backend = "fallback_only"
"#
        )
        .unwrap();

        let config = SystemConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.fatigue.perclos_warn, 0.2);
        assert_eq!(config.fatigue.microsleep_ms, 2000);
        // untouched keys keep their defaults
        assert_eq!(config.fatigue.perclos_alert, 0.30);
        assert_eq!(config.capture.crop_ratio, 0.65);
        assert_eq!(
            config.perception.backend,
            perception::BackendPreference::FallbackOnly
        );
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[fatigue]\nperclos_warn = 0.5\nperclos_alert = 0.3").unwrap();
        assert!(matches!(
            SystemConfig::load(Some(file.path())),
            Err(PipelineError::FatigueConfig(_))
        ));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = SystemConfig::load(Some(Path::new("/nonexistent/fatigue.toml")));
        assert!(matches!(result, Err(PipelineError::Settings(_))));
    }
}
