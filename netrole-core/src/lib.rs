//! Core library for the network role manager.
//! This crate persists which wireless interface plays which role (show AP,
//! listener AP, uplink), synthesizes hostapd / dnsmasq / nftables artifacts
//! from that state, and reconciles live client information. Host side effects
//! go through the capability traits in [`traits`], with real and mock
//! implementations under [`backends`].

pub mod backends;
pub mod clients;
pub mod config;
pub mod manager;
pub mod model;
pub mod store;
pub mod subnet;
pub mod synth;
pub mod tether;
pub mod traits;
pub mod validate;

pub use manager::RoleManager;
pub use model::{ClientRecord, Role, RoleConfig, RoleMap};
pub use store::RoleStore;
pub use validate::ValidationError;

// Define a shared Error and Result type for the entire crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// A caller handed the synthesizer a record that validation should have completed.
    #[error("Contract violation: {0}")]
    Contract(String),

    #[error("Settings API error: {0}")]
    Settings(String),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
