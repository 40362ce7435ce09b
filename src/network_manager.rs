#![cfg_attr(feature = "mock", allow(dead_code, unused_imports))]

use crate::{config::NetworkManagerConfig, services::hotspot_config::Credential};
use anyhow::{Context, Result, bail};
use log::{debug, info};
#[cfg(feature = "mock")]
use mockall::automock;
use serde::Serialize;
use std::{collections::HashSet, path::PathBuf, process::Output};
use tokio::process::Command;
use trait_variant::make;

/// Live association state of the managed device
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct DeviceStatus {
    pub connected: bool,
    pub ssid: Option<String>,
}

/// Untranslated output of a single connection attempt
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Capabilities of the external network manager
///
/// This is the only way the portal touches the network stack. An `Err` always
/// means the tool could not do its job at all (missing binary, absent device),
/// never an empty result.
#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait NetworkManager {
    /// SSIDs visible to the managed device, de-duplicated and without blanks
    async fn scan(&self) -> Result<Vec<String>>;
    async fn status(&self) -> Result<DeviceStatus>;
    /// Single blocking association attempt, no retry at this layer
    async fn connect(&self, ssid: String, password: Option<Credential>) -> Result<ConnectOutput>;
}

/// `nmcli` backed [`NetworkManager`] bound to one managed device
#[derive(Clone, Debug)]
pub struct NmcliClient {
    binary_path: PathBuf,
    device: String,
}

impl NmcliClient {
    const SSID_PREFIX: &str = "SSID:";

    pub fn new(config: &NetworkManagerConfig) -> Self {
        NmcliClient {
            binary_path: config.binary_path.clone(),
            device: config.device.clone(),
        }
    }

    fn scan_args(&self) -> Vec<String> {
        [
            "--colors",
            "no",
            "-m",
            "multiline",
            "--get-value",
            "SSID",
            "dev",
            "wifi",
            "list",
            "ifname",
            self.device.as_str(),
        ]
        .map(String::from)
        .to_vec()
    }

    fn status_args(&self) -> Vec<String> {
        ["-t", "-f", "device,active,ssid", "device", "wifi"]
            .map(String::from)
            .to_vec()
    }

    fn connect_args(&self, ssid: &str, password: Option<&Credential>) -> Vec<String> {
        let mut args = ["--colors", "no", "device", "wifi", "connect", ssid]
            .map(String::from)
            .to_vec();

        if let Some(password) = password.filter(|p| !p.is_empty()) {
            args.push("password".to_string());
            args.push(password.expose().to_string());
        }

        args.push("ifname".to_string());
        args.push(self.device.clone());
        args
    }

    /// Run nmcli and collect its output, regardless of the exit status
    async fn run(&self, args: &[String]) -> Result<Output> {
        // classification matches the english tool output
        Command::new(&self.binary_path)
            .args(args)
            .env("LC_ALL", "C")
            .kill_on_drop(true)
            .output()
            .await
            .context(format!(
                "failed to execute {}",
                self.binary_path.to_string_lossy()
            ))
    }

    /// Run nmcli and fail on a non-zero exit status
    async fn run_checked(&self, args: &[String], what: &str) -> Result<String> {
        let output = self.run(args).await?;

        if !output.status.success() {
            bail!(
                "failed to {what}: nmcli exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl NetworkManager for NmcliClient {
    async fn scan(&self) -> Result<Vec<String>> {
        info!("scan wifi networks on {}", self.device);

        let stdout = self
            .run_checked(&self.scan_args(), "scan wifi networks")
            .await?;
        debug!("scan output: {stdout:?}");

        Ok(parse_scan_output(&stdout))
    }

    async fn status(&self) -> Result<DeviceStatus> {
        let stdout = self
            .run_checked(&self.status_args(), "query wifi status")
            .await?;
        debug!("status output: {stdout:?}");

        Ok(parse_status_output(&stdout, &self.device))
    }

    async fn connect(&self, ssid: String, password: Option<Credential>) -> Result<ConnectOutput> {
        info!(
            "connect {} to \"{ssid}\" ({})",
            self.device,
            if password.as_ref().is_some_and(|p| !p.is_empty()) {
                "with password"
            } else {
                "without password"
            }
        );

        let output = self
            .run(&self.connect_args(&ssid, password.as_ref()))
            .await?;

        let output = ConnectOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("connect output: {output:?}");

        Ok(output)
    }
}

/// Turn `SSID:<name>` lines into unique, non-blank SSIDs in first-seen order
pub fn parse_scan_output(stdout: &str) -> Vec<String> {
    let mut seen = HashSet::new();

    stdout
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .map(|line| line.strip_prefix(NmcliClient::SSID_PREFIX).unwrap_or(line))
        .filter(|ssid| !ssid.trim().is_empty())
        .filter(|ssid| seen.insert(ssid.to_string()))
        .map(String::from)
        .collect()
}

/// Find the active entry of `device` in `nmcli -t -f device,active,ssid device wifi` output
pub fn parse_status_output(stdout: &str, device: &str) -> DeviceStatus {
    stdout
        .lines()
        .map(split_terse_fields)
        .find(|fields| {
            fields.first().is_some_and(|d| d == device) && fields.get(1).is_some_and(|a| a == "yes")
        })
        .map(|fields| DeviceStatus {
            connected: true,
            ssid: fields.get(2).filter(|ssid| !ssid.is_empty()).cloned(),
        })
        .unwrap_or_default()
}

/// Split one line of nmcli terse output, honoring `\:` and `\\` escapes
pub fn split_terse_fields(line: &str) -> Vec<String> {
    let mut fields = vec![];
    let mut current = String::new();
    let mut chars = line.trim_end_matches('\r').chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);

    fields
}
