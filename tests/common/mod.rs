#![allow(dead_code)]

use anyhow::{Result, anyhow};
use std::{
    collections::VecDeque,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;
use wifi_portal::{
    config::{AppConfig, NetworkManagerConfig, PathConfig, PersistPolicy, PortalConfig, RetryConfig},
    network_manager::{ConnectOutput, DeviceStatus, NetworkManager},
    services::hotspot_config::Credential,
};

pub const SUCCESS: &str = "Device 'wlan1' successfully activated with '5d2a1c3e'.";
pub const NOT_FOUND: &str = "Error: No network with SSID 'HomeNet' found.";

pub fn stdout(text: &str) -> ConnectOutput {
    ConnectOutput {
        stdout: text.to_string(),
        stderr: String::new(),
    }
}

pub fn stderr(text: &str) -> ConnectOutput {
    ConnectOutput {
        stdout: String::new(),
        stderr: text.to_string(),
    }
}

#[derive(Clone, Debug)]
pub struct ConnectCall {
    pub at: Instant,
    pub ssid: String,
    pub password: Option<String>,
}

/// Network manager with scripted answers that records every connect
#[derive(Default)]
pub struct ScriptedNetworkManager {
    scan: Mutex<Option<Result<Vec<String>, String>>>,
    status: Mutex<Option<Result<DeviceStatus, String>>>,
    script: Mutex<VecDeque<Result<ConnectOutput, String>>>,
    fallback: Mutex<Option<ConnectOutput>>,
    connect_delay: Mutex<Duration>,
    calls: Mutex<Vec<ConnectCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedNetworkManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan(self, ssids: &[&str]) -> Self {
        *self.scan.lock().unwrap() = Some(Ok(ssids.iter().map(|s| s.to_string()).collect()));
        self
    }

    pub fn with_scan_error(self, error: &str) -> Self {
        *self.scan.lock().unwrap() = Some(Err(error.to_string()));
        self
    }

    pub fn with_status(self, status: DeviceStatus) -> Self {
        *self.status.lock().unwrap() = Some(Ok(status));
        self
    }

    pub fn with_status_error(self, error: &str) -> Self {
        *self.status.lock().unwrap() = Some(Err(error.to_string()));
        self
    }

    /// Answer the next connects in order, then fall back
    pub fn with_connects(self, outputs: impl IntoIterator<Item = ConnectOutput>) -> Self {
        self.script.lock().unwrap().extend(outputs.into_iter().map(Ok));
        self
    }

    pub fn with_connect_error(self, error: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(error.to_string()));
        self
    }

    /// Answer for every connect once the script is used up
    pub fn with_fallback(self, output: ConnectOutput) -> Self {
        *self.fallback.lock().unwrap() = Some(output);
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.connect_delay.lock().unwrap() = delay;
        self
    }

    pub fn calls(&self) -> Vec<ConnectCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl NetworkManager for ScriptedNetworkManager {
    async fn scan(&self) -> Result<Vec<String>> {
        match self.scan.lock().unwrap().clone() {
            Some(Ok(ssids)) => Ok(ssids),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(vec![]),
        }
    }

    async fn status(&self) -> Result<DeviceStatus> {
        match self.status.lock().unwrap().clone() {
            Some(Ok(status)) => Ok(status),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(DeviceStatus::default()),
        }
    }

    async fn connect(&self, ssid: String, password: Option<Credential>) -> Result<ConnectOutput> {
        self.calls.lock().unwrap().push(ConnectCall {
            at: Instant::now(),
            ssid,
            password: password.map(|p| p.expose().to_string()),
        });

        let _in_flight = InFlight::enter(&self.in_flight, &self.max_in_flight);

        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(e)) => Err(anyhow!(e)),
            None => Ok(self
                .fallback
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| stdout(NOT_FOUND))),
        }
    }
}

/// Counts a connect as running until it returns or is dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(in_flight: &'a AtomicUsize, max_in_flight: &AtomicUsize) -> Self {
        let running = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        max_in_flight.fetch_max(running, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn create_config(dir: &Path, persist_policy: PersistPolicy) -> AppConfig {
    AppConfig {
        network_manager: NetworkManagerConfig {
            binary_path: "nmcli".into(),
            device: "wlan1".to_string(),
        },
        portal: PortalConfig {
            setup_ssid: "PoetryCameraSetup".to_string(),
        },
        retry: RetryConfig {
            persist_policy,
            ..RetryConfig::default()
        },
        paths: PathConfig {
            hotspot_config_file: dir.join("hotspot_config.json"),
        },
    }
}

pub fn shared(network_manager: ScriptedNetworkManager) -> Arc<ScriptedNetworkManager> {
    Arc::new(network_manager)
}
