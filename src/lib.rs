pub mod config;
pub mod network_manager;
pub mod services;

// Re-exports from services for the HTTP layer
pub use services::classifier::{ConnectionOutcome, FailureKind, classify};
pub use services::connection::{ConnectionOrchestrator, SessionHandle, SessionState};
pub use services::hotspot_config::{Credential, HotspotConfig, HotspotConfigStore};
pub use services::portal::{PortalService, SubmitRequest, SubmitResponse};
pub use services::status::{ConnectivityState, StatusMonitor};
