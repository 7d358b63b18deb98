//! Run configuration. One immutable value threaded into the stack
//! builders and the alignment driver, loaded from TOML or JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::align::DriverConfig;
use crate::registration::{MetricConfig, OptimizerConfig, ParameterScales, RegistrationTuning};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub stacks: StackSection,
    pub metric: MetricConfig,
    pub optimizer: OptimizerConfig,
    pub scales: ParameterScales,
    pub pyramid: PyramidSection,
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSection {
    /// Output spacing (x, y) plus synthetic z spacing for the block
    /// series.
    pub lo_res_spacings: [f64; 3],
    /// Native spacing of the high-resolution slice series.
    pub hi_res_spacings: [f64; 2],
    /// Normalize slices to zero mean and unit variance at load.
    pub normalize: bool,
}

impl Default for StackSection {
    fn default() -> Self {
        Self {
            lo_res_spacings: [1.0, 1.0, 1.0],
            hi_res_spacings: [1.0, 1.0],
            normalize: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidSection {
    pub factors: Vec<usize>,
    pub seed_with_phase_correlation: bool,
}

impl Default for PyramidSection {
    fn default() -> Self {
        Self {
            factors: vec![4, 2, 1],
            seed_with_phase_correlation: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;
        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> crate::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.stacks.lo_res_spacings.iter().any(|&s| s <= 0.0) {
            errors.push("lo_res_spacings must be positive".to_string());
        }
        if self.stacks.hi_res_spacings.iter().any(|&s| s <= 0.0) {
            errors.push("hi_res_spacings must be positive".to_string());
        }
        if self.metric.sample_count == 0 {
            errors.push("metric sample_count must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.metric.min_usable_fraction) {
            errors.push("metric min_usable_fraction must be in [0, 1]".to_string());
        }
        if self.optimizer.min_step <= 0.0 || self.optimizer.min_step > self.optimizer.initial_step {
            errors.push("optimizer min_step must be positive and below initial_step".to_string());
        }
        if !(0.0..1.0).contains(&self.optimizer.relaxation) {
            errors.push("optimizer relaxation must be in (0, 1)".to_string());
        }
        if self.pyramid.factors.iter().any(|&f| f == 0) {
            errors.push("pyramid factors must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.driver.min_mask_fraction) {
            errors.push("driver min_mask_fraction must be in [0, 1]".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Engine tuning assembled from the relevant sections.
    pub fn registration_tuning(&self) -> RegistrationTuning {
        RegistrationTuning {
            metric: self.metric.clone(),
            optimizer: self.optimizer.clone(),
            scales: self.scales.clone(),
            pyramid_factors: self.pyramid.factors.clone(),
            seed_with_phase_correlation: self.pyramid.seed_with_phase_correlation,
        }
    }
}

pub fn load_config_or_default(config_path: Option<&str>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    log::error!("configuration validation errors:");
                    for error in errors {
                        log::error!("  - {}", error);
                    }
                    log::error!("using default configuration instead");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                log::error!("failed to load config from '{}': {}", path, e);
                log::error!("using default configuration");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
