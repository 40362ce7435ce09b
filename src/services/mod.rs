//! Business logic services
//!
//! This module contains the connection logic separated from HTTP concerns.
//! Everything that touches the network stack goes through the
//! [`NetworkManager`](crate::network_manager::NetworkManager) passed in, so
//! every service can be tested without a wifi adapter.

pub mod classifier;
pub mod connection;
pub mod hotspot_config;
pub mod portal;
pub mod status;
