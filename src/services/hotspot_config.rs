//! Hotspot configuration store
//!
//! Persists the single "network we last tried to join" record so that a
//! restarted device can resume connecting to it.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// WiFi secret. Never shows up in `Debug` output or logs.
#[derive(Clone, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Credential {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Credential {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct HotspotConfig {
    pub ssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Credential>,
}

impl HotspotConfig {
    /// Build a config, treating an empty password as none
    pub fn new(ssid: impl Into<String>, password: Option<Credential>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.filter(|p| !p.is_empty()),
        }
    }
}

/// File backed store holding at most one [`HotspotConfig`]
#[derive(Clone, Debug)]
pub struct HotspotConfigStore {
    path: PathBuf,
}

impl HotspotConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the stored config
    ///
    /// The record is written to a temporary file next to the target and renamed
    /// over it, so readers see either the old or the new record, never a mix.
    ///
    /// # Arguments
    /// * `ssid` - Network to remember
    /// * `password` - Optional secret, empty means none
    ///
    /// # Returns
    /// Result indicating success or failure
    pub fn save(&self, ssid: &str, password: Option<&Credential>) -> Result<()> {
        let config = HotspotConfig::new(ssid, password.cloned());
        info!("save hotspot config for \"{}\"", config.ssid);

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };

        fs::create_dir_all(dir).context(format!("failed to create config directory: {dir:?}"))?;

        let mut tmp_file = NamedTempFile::new_in(dir)
            .context(format!("failed to create temporary config file in {dir:?}"))?;

        serde_json::to_writer(&mut tmp_file, &config)
            .context("failed to serialize hotspot config")?;

        tmp_file
            .flush()
            .context("failed to flush hotspot config")?;
        tmp_file
            .as_file()
            .sync_all()
            .context("failed to sync hotspot config")?;

        tmp_file
            .persist(&self.path)
            .context(format!("failed to replace hotspot config: {:?}", self.path))?;

        Ok(())
    }

    /// Load the stored config
    ///
    /// Absent, unreadable and corrupt files all yield `None`.
    pub fn load(&self) -> Option<HotspotConfig> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no hotspot config at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!("failed to read hotspot config {:?}: {e}", self.path);
                return None;
            }
        };

        match serde_json::from_str::<HotspotConfig>(&content) {
            Ok(config) if !config.ssid.is_empty() => {
                Some(HotspotConfig::new(config.ssid, config.password))
            }
            Ok(_) => {
                warn!("ignore hotspot config {:?}: empty ssid", self.path);
                None
            }
            Err(e) => {
                warn!("ignore corrupt hotspot config {:?}: {e}", self.path);
                None
            }
        }
    }
}
