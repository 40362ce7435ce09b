use crate::network_manager::NetworkManager;
use log::{debug, error};
use serde::Serialize;
use std::sync::Arc;

/// Simplified connectivity of the managed device
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ConnectivityState {
    pub live: bool,
    pub current_ssid: Option<String>,
}

impl ConnectivityState {
    pub fn offline() -> Self {
        Self::default()
    }

    /// "online" or "offline"
    pub fn label(&self) -> &'static str {
        if self.live { "online" } else { "offline" }
    }
}

/// Reduces the network manager status to a [`ConnectivityState`]
///
/// Every query goes to the tool, nothing is cached: the link may drop at any
/// time without this process noticing.
pub struct StatusMonitor<NM>
where
    NM: NetworkManager,
{
    network_manager: Arc<NM>,
}

impl<NM> Clone for StatusMonitor<NM>
where
    NM: NetworkManager,
{
    fn clone(&self) -> Self {
        Self {
            network_manager: Arc::clone(&self.network_manager),
        }
    }
}

impl<NM> StatusMonitor<NM>
where
    NM: NetworkManager,
{
    pub fn new(network_manager: Arc<NM>) -> Self {
        Self { network_manager }
    }

    /// Current connectivity, `offline` if the tool cannot be queried
    pub async fn current_status(&self) -> ConnectivityState {
        match self.network_manager.status().await {
            Ok(status) if status.connected => ConnectivityState {
                live: true,
                current_ssid: status.ssid,
            },
            Ok(_) => {
                debug!("managed device not connected");
                ConnectivityState::offline()
            }
            Err(e) => {
                error!("failed to query connectivity status: {e:#}");
                ConnectivityState::offline()
            }
        }
    }
}
