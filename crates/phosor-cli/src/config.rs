use anyhow::{Context, Result};
use phosor_core::cluster::{
    DEFAULT_EPS, DEFAULT_MAX_ITERATIONS, DEFAULT_MIN_SAMPLES, DEFAULT_N_CLUSTERS, DEFAULT_SEED,
};
use phosor_core::ClusterMethod;
use phosor_store::materialize::DEFAULT_WORKERS;
use phosor_store::{RepresentativeMode, TransferMode};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "phosor.toml";

/// Pipeline and store configuration, loaded from TOML with environment overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub output: OutputConfig,
    pub clustering: ClusteringConfig,
    pub handling: HandlingConfig,
    pub embedder: EmbedderConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory scanned for photos.
    pub dir: PathBuf,
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Files smaller than this (KiB) are skipped as thumbnails.
    pub min_file_size_kb: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/input"),
            recursive: true,
            min_file_size_kb: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output root: one folder per cluster plus `unclustered`.
    pub dir: PathBuf,
    pub mode: TransferMode,
    pub create_representatives: bool,
    pub representative_mode: RepresentativeMode,
    /// Concurrent file transfers during materialization.
    pub workers: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/output"),
            mode: TransferMode::Copy,
            create_representatives: true,
            representative_mode: RepresentativeMode::Face,
            workers: DEFAULT_WORKERS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// `dbscan` or `kmeans`.
    pub method: String,
    pub eps: f32,
    pub min_samples: usize,
    pub n_clusters: usize,
    pub seed: u64,
    pub max_iterations: usize,
    /// Clusters with fewer faces are dissolved into `unclustered`.
    pub min_faces_per_cluster: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            method: "dbscan".to_string(),
            eps: DEFAULT_EPS,
            min_samples: DEFAULT_MIN_SAMPLES,
            n_clusters: DEFAULT_N_CLUSTERS,
            seed: DEFAULT_SEED,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            min_faces_per_cluster: 5,
        }
    }
}

impl ClusteringConfig {
    /// Validate the method name and its parameters.
    pub fn method(&self) -> Result<ClusterMethod> {
        ClusterMethod::from_params(
            &self.method,
            self.eps,
            self.min_samples,
            self.n_clusters,
            self.seed,
            self.max_iterations,
        )
        .context("invalid [clustering] configuration")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandlingConfig {
    /// Write `embeddings.json` next to the cluster folders.
    pub save_embeddings: bool,
}

impl Default for HandlingConfig {
    fn default() -> Self {
        Self {
            save_embeddings: true,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Program and leading arguments; the image path is appended per call.
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load `path`, or `phosor.toml` if none was given, then apply `PHOSOR_*`
    /// environment overrides.
    ///
    /// A missing default file yields the built-in defaults; a missing file
    /// that was named explicitly is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `PHOSOR_OUTPUT_DIR`, `PHOSOR_INPUT_DIR` and `PHOSOR_LOG_LEVEL`
    /// as looked up through `var`.
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = env_path(&var, "PHOSOR_OUTPUT_DIR") {
            self.output.dir = dir;
        }
        if let Some(dir) = env_path(&var, "PHOSOR_INPUT_DIR") {
            self.input.dir = dir;
        }
        if let Some(level) = var("PHOSOR_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
    }
}

fn env_path(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<PathBuf> {
    var(key).filter(|v| !v.trim().is_empty()).map(PathBuf::from)
}
