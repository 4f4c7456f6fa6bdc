//! Config schema types (server, store, transport).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub transport: TransportConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Restore stored sessions at startup instead of waiting for `GET /`.
    pub restore_on_boot: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8000,
            restore_on_boot: false,
        }
    }
}

/// Where session records are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON document holding every session record.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./whatsapp-sessions.json"),
        }
    }
}

/// Which transport backs each session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process transport that pairs itself and records sent messages.
    #[default]
    Loopback,
}

/// Transport settings shared by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub kind: TransportKind,

    /// Country calling code substituted for a leading `0` in phone numbers.
    pub country_code: String,

    /// Loopback only: walk through qr → authenticated → ready on its own.
    pub auto_pair: bool,

    /// Loopback only: delay between simulated pairing steps.
    pub pair_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Loopback,
            country_code: "62".into(),
            auto_pair: true,
            pair_delay_ms: 500,
        }
    }
}
