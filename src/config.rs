// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use log::info;
use serde::{Deserialize, Serialize};
use crate::drivers::fitter::MAX_PRECISION;
use crate::drivers::TitrationError;
/// Runtime settings. Every field has a default so a partial JSON file works.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Acquisition tick.
    pub poll_interval_ms: u64,
    /// Upper bound on samples drained per tick.
    pub max_samples_per_poll: usize,
    pub results_dir: PathBuf,
    pub file_extension: String,
    pub filename_time_format: String,
    /// Motor 1 speed that corresponds to proportion 1.0.
    pub max_speed: u32,
    pub increment_ms: u32,
    pub baud_rate: u32,
    /// Concentration of the titrant, mol/L.
    pub reagent_conc: f64,
    pub precision: u32,
    /// Also write a PNG next to each analysis report.
    pub save_plot: bool,
}
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            max_samples_per_poll: 64,
            results_dir: PathBuf::from("results"),
            file_extension: ".txt".to_string(),
            filename_time_format: "%Y%m%d_%H%M%S".to_string(),
            max_speed: 10_000,
            increment_ms: 50,
            baud_rate: 115_200,
            reagent_conc: 0.1,
            precision: 4,
            save_plot: true,
        }
    }
}
impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TitrationError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&text)?;
        config.validate()?;
        info!("loaded configuration from {}", path.display());
        Ok(config)
    }
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, TitrationError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
    pub fn validate(&self) -> Result<(), TitrationError> {
        if self.poll_interval_ms == 0 {
            return Err(TitrationError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.max_samples_per_poll == 0 {
            return Err(TitrationError::Config(
                "max_samples_per_poll must be > 0".into(),
            ));
        }
        if self.max_speed == 0 {
            return Err(TitrationError::Config("max_speed must be > 0".into()));
        }
        if !self.reagent_conc.is_finite() || self.reagent_conc <= 0.0 {
            return Err(TitrationError::Config(format!(
                "reagent_conc must be a positive number, got {}",
                self.reagent_conc
            )));
        }
        if self.precision > MAX_PRECISION {
            return Err(TitrationError::Config(format!(
                "precision must be at most {MAX_PRECISION}, got {}",
                self.precision
            )));
        }
        Ok(())
    }
    /// `<results_dir>/raw`, where raw recordings go.
    pub fn raw_dir(&self) -> PathBuf {
        self.results_dir.join("raw")
    }
    /// `<results_dir>/processed`, where analysis reports go.
    pub fn processed_dir(&self) -> PathBuf {
        self.results_dir.join("processed")
    }
}
#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "reagent_conc": 0.05, "max_speed": 2000 }"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.reagent_conc, 0.05);
        assert_eq!(config.max_speed, 2000);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.processed_dir(), PathBuf::from("results/processed"));
    }
    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "max_speed": 0 }"#).unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(TitrationError::Config(_))
        ));
        fs::write(&path, r#"{ "precision": 400 }"#).unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(TitrationError::Config(_))
        ));
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            AppConfig::load(&path),
            Err(TitrationError::Config(_))
        ));
    }
    #[test]
    fn missing_path_uses_defaults() {
        assert_eq!(AppConfig::load_or_default(None).unwrap(), AppConfig::default());
    }
}
