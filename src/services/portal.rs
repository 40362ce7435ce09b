//! Captive portal operations
//!
//! The contract consumed by the HTTP layer: list networks, report status and
//! submit a connection request. Payloads keep the field names the portal page
//! already understands.

use crate::{
    config::AppConfig,
    network_manager::NetworkManager,
    services::{
        connection::{ConnectionOrchestrator, SessionHandle, SessionState},
        hotspot_config::{Credential, HotspotConfig, HotspotConfigStore},
        status::StatusMonitor,
    },
};
use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::{collections::BTreeSet, sync::Arc, time::Duration};

#[derive(Deserialize, Clone, Validate, Debug)]
pub struct SubmitRequest {
    #[validate(min_length = 1)]
    pub ssid: String,
    #[serde(default)]
    pub password: Option<Credential>,
    /// Keep retrying in the background instead of a single attempt
    #[serde(default)]
    pub manual_connect: bool,
}

#[derive(Serialize, Clone, Copy, Debug, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    Info,
}

#[derive(Serialize, Clone, Debug, Eq, PartialEq)]
pub struct SubmitResponse {
    pub status: ResponseStatus,
    pub message: String,
    /// Network the managed device is on right now, empty if none
    pub ssid: String,
    pub internet_status: String,
}

#[derive(Serialize, Clone, Debug, Eq, PartialEq)]
pub struct StatusResponse {
    /// "online" or "offline"
    pub status: String,
    pub ssid: String,
}

/// Entry point for the portal's HTTP handlers
pub struct PortalService<NM>
where
    NM: NetworkManager + Send + Sync + 'static,
{
    network_manager: Arc<NM>,
    orchestrator: ConnectionOrchestrator<NM>,
    status_monitor: StatusMonitor<NM>,
    setup_ssid: String,
}

impl<NM> PortalService<NM>
where
    NM: NetworkManager + Send + Sync + 'static,
{
    pub fn new(network_manager: Arc<NM>, config: &AppConfig) -> Self {
        let store = HotspotConfigStore::new(&config.paths.hotspot_config_file);

        Self {
            orchestrator: ConnectionOrchestrator::new(
                Arc::clone(&network_manager),
                store,
                config.retry.clone(),
            ),
            status_monitor: StatusMonitor::new(Arc::clone(&network_manager)),
            network_manager,
            setup_ssid: config.portal.setup_ssid.clone(),
        }
    }

    pub fn orchestrator(&self) -> &ConnectionOrchestrator<NM> {
        &self.orchestrator
    }

    /// Networks a user may pick, without the device's own setup hotspot
    ///
    /// # Returns
    /// Sorted unique SSIDs, or an error if the scan could not run at all
    pub async fn list_available_networks(&self) -> Result<Vec<String>> {
        let ssids = self
            .network_manager
            .scan()
            .await
            .context("failed to retrieve wifi networks: likely a wifi adapter issue")?;

        Ok(exclude_setup_network(ssids, &self.setup_ssid))
    }

    pub async fn get_status(&self) -> StatusResponse {
        let state = self.status_monitor.current_status().await;

        StatusResponse {
            status: state.label().to_string(),
            ssid: state.current_ssid.unwrap_or_default(),
        }
    }

    /// Handle a connection request from the portal page
    ///
    /// Background requests reply with `info` right away. Their result has to be
    /// polled through [`Self::session_state`] or [`Self::get_status`].
    ///
    /// # Arguments
    /// * `request` - Target network and mode
    ///
    /// # Returns
    /// Reply payload, or an error if the request is invalid
    pub async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse> {
        info!(
            "submit \"{}\" ({})",
            request.ssid,
            if request.manual_connect {
                "background"
            } else {
                "immediate"
            }
        );

        request.validate().context("submit validation failed")?;

        let SubmitRequest {
            ssid,
            password,
            manual_connect,
        } = request;

        let (status, message) = if manual_connect {
            let max_duration = self.orchestrator.retry_config().max_duration;
            self.orchestrator.start_retrying(&ssid, password, max_duration);

            (
                ResponseStatus::Info,
                format!(
                    "Attempting to connect to the {ssid} network. If you are using a hotspot, go to your hotspot settings page and leave it open so it can connect. This could take up to {}.",
                    describe_duration(max_duration)
                ),
            )
        } else {
            let outcome = self.orchestrator.attempt_once(&ssid, password).await;

            let status = if outcome.is_success() {
                ResponseStatus::Success
            } else {
                ResponseStatus::Error
            };

            (status, outcome.message())
        };

        let connectivity = self.status_monitor.current_status().await;

        Ok(SubmitResponse {
            status,
            message,
            internet_status: connectivity.label().to_string(),
            ssid: connectivity.current_ssid.unwrap_or_default(),
        })
    }

    /// State of the current or most recent background session
    pub fn session_state(&self) -> Option<SessionState> {
        self.orchestrator.session_state()
    }

    pub fn saved_config(&self) -> Option<HotspotConfig> {
        self.orchestrator.store().load()
    }

    /// Resume retrying the network persisted by an earlier background request
    ///
    /// # Returns
    /// The new session, or `None` if nothing was saved
    pub fn resume_saved(&self) -> Option<SessionHandle> {
        let config = self.saved_config()?;
        info!("resume connecting to saved network \"{}\"", config.ssid);

        Some(self.orchestrator.start_retrying(
            &config.ssid,
            config.password,
            self.orchestrator.retry_config().max_duration,
        ))
    }

    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
    }
}

/// Drop blanks and the setup hotspot (exact match), de-duplicate and sort
fn exclude_setup_network(ssids: impl IntoIterator<Item = String>, setup_ssid: &str) -> Vec<String> {
    ssids
        .into_iter()
        .filter(|ssid| !ssid.trim().is_empty() && ssid != setup_ssid)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn describe_duration(duration: Duration) -> String {
    match duration.as_secs() {
        60 => "1 minute".to_string(),
        secs if secs > 0 && secs % 60 == 0 => format!("{} minutes", secs / 60),
        1 => "1 second".to_string(),
        secs => format!("{secs} seconds"),
    }
}
