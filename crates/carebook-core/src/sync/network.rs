//! Connectivity signal supplied by the host.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, uniffi::Enum)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    None,
    Wifi,
    Cellular,
    Ethernet,
    Other,
    #[default]
    Unknown,
}

/// Reachability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkStatus {
    pub is_connected: bool,
    /// `None` when the platform has not determined reachability yet
    pub is_internet_reachable: Option<bool>,
    pub connection_type: ConnectionType,
}

impl NetworkStatus {
    pub fn online(connection_type: ConnectionType) -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: Some(true),
            connection_type,
        }
    }

    pub fn offline() -> Self {
        Self {
            is_connected: false,
            is_internet_reachable: Some(false),
            connection_type: ConnectionType::None,
        }
    }

    /// Connected, and not known to be unreachable.
    pub fn is_online(&self) -> bool {
        self.is_connected && self.is_internet_reachable != Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_online() {
        assert!(NetworkStatus::online(ConnectionType::Wifi).is_online());
        assert!(!NetworkStatus::offline().is_online());
        assert!(!NetworkStatus::default().is_online());

        // Captive portal: connected but not reachable.
        let captive = NetworkStatus {
            is_connected: true,
            is_internet_reachable: Some(false),
            connection_type: ConnectionType::Wifi,
        };
        assert!(!captive.is_online());

        // Reachability not yet probed.
        let probing = NetworkStatus {
            is_connected: true,
            is_internet_reachable: None,
            connection_type: ConnectionType::Cellular,
        };
        assert!(probing.is_online());
    }
}
