//! Config loader (strict parsing).

pub mod schema;

use std::fs;

use procmetrics_core::{MetricsError, Result};

pub use schema::{
    BuildInfo, ProcmetricsConfig, ReaperSection, ServerSection, ServiceSection, StorageSection,
};

pub fn load_from_file(path: &str) -> Result<ProcmetricsConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| MetricsError::InvalidConfig(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<ProcmetricsConfig> {
    let cfg: ProcmetricsConfig = serde_yaml::from_str(s)
        .map_err(|e| MetricsError::InvalidConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
