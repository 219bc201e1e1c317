// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static CONFIG: OnceLock<PushConfig> = OnceLock::new();

fn default_log_level() -> String {
    "info".to_string()
}

pub fn init_from_path(path: impl AsRef<Path>) -> Result<&'static PushConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let path = path.as_ref().to_path_buf();
    let cfg = PushConfig::load_from_file(&path)?;
    let _ = CONFIG.set(cfg);
    CONFIG.get().ok_or_else(|| anyhow!("config was not installed"))
}

/// Load the config named by `$NOVAROCKS_PUSH_CONFIG` or `./novarocks_push.toml`.
/// Without either, built-in defaults are installed.
pub fn init_from_env_or_default() -> Result<&'static PushConfig> {
    if let Some(cfg) = CONFIG.get() {
        return Ok(cfg);
    }
    let cfg = match config_path_from_env_or_default()? {
        Some(path) => PushConfig::load_from_file(&path)?,
        None => PushConfig::default(),
    };
    let _ = CONFIG.set(cfg);
    CONFIG.get().ok_or_else(|| anyhow!("config was not installed"))
}

pub fn config() -> Result<&'static PushConfig> {
    init_from_env_or_default()
}

fn config_path_from_env_or_default() -> Result<Option<PathBuf>> {
    if let Ok(p) = std::env::var("NOVAROCKS_PUSH_CONFIG") {
        if !p.trim().is_empty() {
            let path = PathBuf::from(p.trim());
            if !path.exists() {
                return Err(anyhow!(
                    "$NOVAROCKS_PUSH_CONFIG points to a missing file: {}",
                    path.display()
                ));
            }
            return Ok(Some(path));
        }
    }

    let candidate = PathBuf::from("novarocks_push.toml");
    if candidate.exists() {
        return Ok(Some(candidate));
    }
    Ok(None)
}

#[derive(Clone, Debug, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional full tracing EnvFilter expression.
    /// If set, this takes precedence over `log_level`.
    /// Example: "novarocks_push=debug,parquet=warn"
    #[serde(default)]
    pub log_filter: Option<String>,

    #[serde(default)]
    pub push: PushIngestionConfig,
}

impl PushConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("read config file: {}", path.display()))?;
        let cfg: PushConfig =
            toml::from_str(&s).with_context(|| format!("parse toml: {}", path.display()))?;
        cfg.push
            .validate()
            .with_context(|| format!("validate [push] section: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn effective_log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(self.log_level.as_str())
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_filter: None,
            push: PushIngestionConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PushIngestionConfig {
    /// Rows per chunk handed out by the parquet record source.
    #[serde(default = "default_source_batch_size")]
    pub source_batch_size: usize,
    /// Upper bound of rows a single rowset may accumulate. 0 means unlimited.
    #[serde(default)]
    pub max_rowset_rows: usize,
    /// Compression codec of persisted rowset segments: "snappy", "zstd" or "none".
    #[serde(default = "default_segment_compression")]
    pub segment_compression: String,
}

fn default_source_batch_size() -> usize {
    4096 // Aligned with StarRocks `vector_chunk_size`
}

fn default_segment_compression() -> String {
    "snappy".to_string()
}

impl PushIngestionConfig {
    fn validate(&self) -> Result<()> {
        if self.source_batch_size == 0 {
            return Err(anyhow!("source_batch_size must be positive"));
        }
        match self.segment_compression.trim().to_ascii_lowercase().as_str() {
            "snappy" | "zstd" | "none" => Ok(()),
            other => Err(anyhow!("unsupported segment_compression: {other}")),
        }
    }
}

impl Default for PushIngestionConfig {
    fn default() -> Self {
        Self {
            source_batch_size: default_source_batch_size(),
            max_rowset_rows: 0,
            segment_compression: default_segment_compression(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PushConfig;

    #[test]
    fn test_push_defaults() {
        let cfg: PushConfig = toml::from_str("").expect("parse config");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.push.source_batch_size, 4096);
        assert_eq!(cfg.push.max_rowset_rows, 0);
        assert_eq!(cfg.push.segment_compression, "snappy");
    }

    #[test]
    fn test_push_section_can_be_overridden() {
        let cfg: PushConfig = toml::from_str(
            r#"
log_filter = "novarocks_push=debug"

[push]
source_batch_size = 1024
max_rowset_rows = 1000000
segment_compression = "zstd"
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.push.source_batch_size, 1024);
        assert_eq!(cfg.push.max_rowset_rows, 1_000_000);
        assert_eq!(cfg.push.segment_compression, "zstd");
        assert_eq!(cfg.effective_log_filter(), "novarocks_push=debug");
    }

    #[test]
    fn test_load_rejects_unknown_compression() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("novarocks_push.toml");
        std::fs::write(&path, "[push]\nsegment_compression = \"lzo\"\n").expect("write");
        let err = PushConfig::load_from_file(&path).expect_err("expected validation error");
        assert!(format!("{err:#}").contains("lzo"), "err={err:#}");
    }
}
