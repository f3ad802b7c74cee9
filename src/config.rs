//! Configuration loaded from `framebatch.toml`.
//!
//! Missing fields fall back to the `default_*` functions below. The
//! `FRAMEBATCH_API_KEYS` environment variable (comma separated) takes
//! precedence over the file's `api_keys`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::analysis::RetryPolicy;
use crate::analysis::client::API_URL;
use crate::batch::CredentialPool;
use crate::preprocess::DEFAULT_MAX_DIMENSION;
use crate::workflow::{BatchProfile, Workflow};

pub const CONFIG_FILE: &str = "framebatch.toml";
const API_KEYS_ENV: &str = "FRAMEBATCH_API_KEYS";

#[derive(Debug, Clone, Deserialize)]
pub struct FramebatchConfig {
    /// API keys rotated across items.
    #[serde(default)]
    pub api_keys: Vec<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Longest side, in pixels, of the encoded images.
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Per-workflow overrides of wave size and cooldown.
    #[serde(default)]
    pub workflows: HashMap<String, BatchProfile>,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_base_url() -> String {
    API_URL.to_string()
}

fn default_max_dimension() -> u32 {
    DEFAULT_MAX_DIMENSION
}

impl Default for FramebatchConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            model: default_model(),
            base_url: default_base_url(),
            max_dimension: default_max_dimension(),
            retry: RetryPolicy::default(),
            workflows: HashMap::new(),
        }
    }
}

impl FramebatchConfig {
    /// Loads `framebatch.toml` from the current directory, or defaults if absent.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<FramebatchConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(keys) = std::env::var(API_KEYS_ENV) {
            config.apply_env_keys(&keys);
        }

        Ok(config)
    }

    fn apply_env_keys(&mut self, raw: &str) {
        let keys: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .collect();
        if !keys.is_empty() {
            self.api_keys = keys;
        }
    }

    pub fn credentials(&self) -> CredentialPool {
        CredentialPool::new(self.api_keys.iter().cloned())
    }

    /// Configured profile for the workflow, or its built-in default.
    pub fn profile(&self, workflow: Workflow) -> BatchProfile {
        self.workflows
            .get(&workflow.to_string())
            .copied()
            .unwrap_or_else(|| workflow.default_profile())
    }
}
