//! Pipeline configuration.
//!
//! Deployment-level knobs that are not per-image parameters: resolution
//! clamps for the fast preview qualities. Loaded once from a YAML file in
//! the working directory when present, otherwise built from defaults.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::warn;

/// Candidate config file names searched in the working directory.
const CONFIG_FILENAMES: &[&str] = &["argentum.yml", "argentum.yaml"];

/// Complete configuration file structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub defaults: PipelineDefaults,
}

/// Tunable pipeline defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineDefaults {
    /// Square clamp applied after demosaic in preview quality.
    pub preview_resolution: usize,

    /// Square clamp applied after demosaic in low quality.
    pub low_resolution: usize,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        PipelineDefaults {
            preview_resolution: 1024,
            low_resolution: 600,
        }
    }
}

impl PipelineDefaults {
    fn sanitize(&mut self) {
        self.preview_resolution = self.preview_resolution.clamp(64, 16384);
        self.low_resolution = self.low_resolution.clamp(64, 16384);
    }
}

/// Loaded configuration plus where it came from.
pub struct PipelineConfigHandle {
    pub config: PipelineConfig,
    pub source: Option<PathBuf>,
}

static CONFIG: OnceLock<PipelineConfigHandle> = OnceLock::new();

/// The process-wide configuration, loading it on first use.
pub fn pipeline_config_handle() -> &'static PipelineConfigHandle {
    CONFIG.get_or_init(|| {
        for name in CONFIG_FILENAMES {
            let path = PathBuf::from(name);
            if !path.is_file() {
                continue;
            }
            match fs::read_to_string(&path) {
                Ok(contents) => match serde_yaml::from_str::<PipelineConfig>(&contents) {
                    Ok(mut config) => {
                        config.defaults.sanitize();
                        return PipelineConfigHandle {
                            config,
                            source: Some(path),
                        };
                    }
                    Err(e) => warn!("ignoring malformed config {}: {e}", path.display()),
                },
                Err(e) => warn!("could not read config {}: {e}", path.display()),
            }
        }
        let mut config = PipelineConfig::default();
        config.defaults.sanitize();
        PipelineConfigHandle {
            config,
            source: None,
        }
    })
}
