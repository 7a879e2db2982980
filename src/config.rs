//! Persisted environment configuration
//!
//! A [`Config`] is the YAML form of an environment: enough to reattach to a
//! namespace, its releases and any forwarder processes from another run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chaos::ExperimentInfo;
use crate::chart::ChartSettings;
use crate::forward::DEFAULT_KUBECTL_PROCESS_NAME;
use crate::{Error, Result};

const CONFIG_EXTENSION: &str = "yaml";

/// Preset the environment was created from
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preset {
    /// Preset name
    pub name: String,
    /// Preset type
    #[serde(rename = "type")]
    pub preset_type: String,
    /// Config file name, without extension
    pub filename: String,
    /// Preset-level values
    pub values: serde_yaml::Value,
}

/// Persisted environment state
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment survives this process; forwarders are OS processes
    pub persistent: bool,
    /// Forwarding sessions survive this process
    pub persistent_connection: bool,
    /// kubectl binary used by the process forwarder
    pub kubectl_process_name: String,
    /// Namespace assigned at init
    pub namespace_name: String,
    /// Environment name, base of the generated namespace name
    pub name: String,
    /// Preset the environment was built from
    pub preset: Option<Preset>,
    /// Release name to chart settings
    pub charts_info: BTreeMap<String, ChartSettings>,
    /// Running standalone experiments by name
    pub experiments: BTreeMap<String, ExperimentInfo>,
    /// Release names in the order they were added
    pub deploy_order: Vec<String>,
}

impl Config {
    /// Config for an environment named `name`
    pub fn new(name: impl Into<String>) -> Self {
        let mut config = Self {
            name: name.into(),
            ..Default::default()
        };
        config.set_defaults();
        config
    }

    /// Fill in values an older or hand-written file may lack
    pub fn set_defaults(&mut self) {
        if self.kubectl_process_name.is_empty() {
            self.kubectl_process_name = DEFAULT_KUBECTL_PROCESS_NAME.to_string();
        }
    }

    /// Set the preset
    pub fn with_preset(mut self, preset: Preset) -> Self {
        self.preset = Some(preset);
        self
    }

    /// Mark the environment persistent
    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    /// Path the config is synced to: `<preset.filename>.yaml`
    pub fn file_path(&self) -> Result<PathBuf> {
        match self.preset.as_ref().map(|p| p.filename.as_str()) {
            Some(filename) if !filename.is_empty() => {
                Ok(PathBuf::from(format!("{}.{}", filename, CONFIG_EXTENSION)))
            }
            _ => Err(Error::persistence(
                PathBuf::new(),
                "no preset filename was set",
            )),
        }
    }

    /// Release names in deploy order.
    ///
    /// Names in `deploy_order` come first; charts it does not mention follow
    /// sorted by name.
    pub fn deploy_sequence(&self) -> Vec<String> {
        let mut sequence: Vec<String> = Vec::with_capacity(self.charts_info.len());
        for name in &self.deploy_order {
            if self.charts_info.contains_key(name) && !sequence.contains(name) {
                sequence.push(name.clone());
            }
        }
        for name in self.charts_info.keys() {
            if !sequence.contains(name) {
                sequence.push(name.clone());
            }
        }
        sequence
    }
}

/// Write `config` as YAML to `path`
pub fn dump_config(config: &Config, path: &Path) -> Result<()> {
    let data = serde_yaml::to_string(config)
        .map_err(|e| Error::persistence(path, format!("failed to serialize config: {}", e)))?;
    std::fs::write(path, data)
        .map_err(|e| Error::persistence(path, format!("failed to write config: {}", e)))?;
    debug!(path = %path.display(), "Config dumped");
    Ok(())
}

/// Read a YAML config from `path`
pub fn load_config(path: &Path) -> Result<Config> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::persistence(path, format!("failed to read config: {}", e)))?;
    let mut config: Config = serde_yaml::from_str(&data)
        .map_err(|e| Error::persistence(path, format!("failed to parse config: {}", e)))?;
    config.set_defaults();
    Ok(config)
}
