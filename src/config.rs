use anyhow::{Context, Result, bail, ensure};
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

/// Application configuration loaded and validated at startup
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// NetworkManager command line tool configuration
    pub network_manager: NetworkManagerConfig,

    /// Captive portal configuration
    pub portal: PortalConfig,

    /// Background retry configuration
    pub retry: RetryConfig,

    /// Path configuration
    pub paths: PathConfig,
}

#[derive(Clone, Debug)]
pub struct NetworkManagerConfig {
    pub binary_path: PathBuf,
    /// Interface used for the internet uplink. Never the one hosting the setup hotspot.
    pub device: String,
}

#[derive(Clone, Debug)]
pub struct PortalConfig {
    /// SSID of the device's own setup hotspot, hidden from scan results
    pub setup_ssid: String,
}

#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub interval: Duration,
    pub max_duration: Duration,
    pub persist_policy: PersistPolicy,
}

#[derive(Clone, Debug)]
pub struct PathConfig {
    pub hotspot_config_file: PathBuf,
}

/// When a connection request is written to the hotspot config store
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PersistPolicy {
    /// Only background sessions persist, before their first attempt
    #[default]
    BackgroundOnly,
    /// Immediate attempts persist too
    Always,
    Never,
}

impl PersistPolicy {
    pub fn persists_immediate(self) -> bool {
        matches!(self, Self::Always)
    }

    pub fn persists_background(self) -> bool {
        !matches!(self, Self::Never)
    }
}

impl FromStr for PersistPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "background-only" => Ok(Self::BackgroundOnly),
            "always" => Ok(Self::Always),
            "never" => Ok(Self::Never),
            other => bail!("failed to parse persist policy: unknown value \"{other}\""),
        }
    }
}

impl fmt::Display for PersistPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BackgroundOnly => write!(f, "background-only"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(RetryConfig::DEFAULT_INTERVAL_SECS),
            max_duration: Duration::from_secs(RetryConfig::DEFAULT_TIMEOUT_SECS),
            persist_policy: PersistPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate all configuration from environment variables
    pub fn load() -> Result<Self> {
        Self::load_with(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    ///
    /// Missing variables fall back to their defaults, malformed ones are errors.
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network_manager = NetworkManagerConfig::load(&lookup)?;
        let portal = PortalConfig::load(&lookup)?;
        let retry = RetryConfig::load(&lookup)?;
        let paths = PathConfig::load(&lookup)?;

        Ok(Self {
            network_manager,
            portal,
            retry,
            paths,
        })
    }
}

impl NetworkManagerConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let binary_path = lookup("NMCLI_PATH")
            .unwrap_or_else(|| "nmcli".to_string())
            .into();
        let device = lookup("WIFI_DEVICE").unwrap_or_else(|| "wlan1".to_string());

        ensure!(
            !device.trim().is_empty(),
            "failed to load WIFI_DEVICE: must not be empty"
        );

        Ok(Self {
            binary_path,
            device,
        })
    }
}

impl PortalConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let setup_ssid = lookup("SETUP_SSID").unwrap_or_else(|| "PoetryCameraSetup".to_string());

        Ok(Self { setup_ssid })
    }
}

impl RetryConfig {
    const DEFAULT_INTERVAL_SECS: u64 = 5;
    const DEFAULT_TIMEOUT_SECS: u64 = 120;

    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let interval = Self::load_secs(lookup, "RETRY_INTERVAL_SECS", Self::DEFAULT_INTERVAL_SECS)?;
        let max_duration =
            Self::load_secs(lookup, "RETRY_TIMEOUT_SECS", Self::DEFAULT_TIMEOUT_SECS)?;

        let persist_policy = match lookup("PERSIST_POLICY") {
            Some(value) => value
                .parse::<PersistPolicy>()
                .context("failed to parse PERSIST_POLICY")?,
            None => PersistPolicy::default(),
        };

        Ok(Self {
            interval,
            max_duration,
            persist_policy,
        })
    }

    fn load_secs(
        lookup: &impl Fn(&str) -> Option<String>,
        key: &str,
        default: u64,
    ) -> Result<Duration> {
        let secs = match lookup(key) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .context(format!("failed to parse {key}: invalid format"))?,
            None => default,
        };

        ensure!(secs > 0, "failed to load {key}: must be greater than zero");

        Ok(Duration::from_secs(secs))
    }
}

impl PathConfig {
    fn load(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let hotspot_config_file = lookup("HOTSPOT_CONFIG_PATH")
            .unwrap_or_else(|| "/data/wifi_portal/hotspot_config.json".to_string())
            .into();

        Ok(Self {
            hotspot_config_file,
        })
    }
}
