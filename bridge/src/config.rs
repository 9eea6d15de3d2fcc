//! # Network & Server Configuration
//!
//! Small value types describing which access point to join and how to
//! serve, plus their persistence in the settings EEPROM.
//!
//! ## Persisted Layout
//!
//! ```text
//! offset      +1
//! ┌──────────┬──────────────────────────────────────┐
//! │ sentinel │  postcard(NetworkConfig)  ≤ 100 B    │
//! │ 'y'/'z'  │                                      │
//! └──────────┴──────────────────────────────────────┘
//! ```
//!
//! Any other sentinel value means the device was never configured and the
//! compiled defaults apply.

use heapless::String;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::traits::NvStorage;

/// Longest SSID the module accepts
pub const SSID_CAPACITY: usize = 32;
/// Longest passphrase we store
pub const PASSWORD_CAPACITY: usize = 32;
/// Dotted-quad IPv4 address
pub const IP_CAPACITY: usize = 15;
/// Colon-separated MAC address
pub const MAC_CAPACITY: usize = 17;

/// Marker written in front of a stored configuration
pub const SENTINEL: u8 = b'y';
/// Marker written by older firmware, still accepted on load
pub const LEGACY_SENTINEL: u8 = b'z';
/// Largest postcard encoding of [`NetworkConfig`]
pub const MAX_ENCODED_LEN: usize =
    4 + SSID_CAPACITY + PASSWORD_CAPACITY + IP_CAPACITY + MAC_CAPACITY;

/// Default access point compiled into the firmware
pub const DEFAULT_SSID: &str = "cannon-net";
/// Passphrase for [`DEFAULT_SSID`]
pub const DEFAULT_PASSWORD: &str = "changeme";

/// Errors from configuration handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The storage device rejected the access
    #[error("settings storage access failed")]
    Storage,
    /// The configuration could not be serialized
    #[error("settings could not be encoded")]
    Encode,
    /// The stored bytes are not a valid configuration
    #[error("stored settings are corrupt")]
    Decode,
    /// A text field exceeds its capacity
    #[error("settings field too long")]
    FieldTooLong,
}

/// Access point credentials plus the addresses the module reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Access point name
    pub ssid: String<SSID_CAPACITY>,
    /// Access point passphrase
    pub password: String<PASSWORD_CAPACITY>,
    /// Station IP, cached from the module
    #[serde(default)]
    pub ip: String<IP_CAPACITY>,
    /// Station MAC, cached from the module
    #[serde(default)]
    pub mac: String<MAC_CAPACITY>,
}

impl NetworkConfig {
    /// Configuration for the given credentials with no cached addresses
    pub fn new(ssid: &str, password: &str) -> Result<Self, ConfigError> {
        let mut config = Self {
            ssid: String::new(),
            password: String::new(),
            ip: String::new(),
            mac: String::new(),
        };
        config.set_credentials(ssid, password)?;
        Ok(config)
    }

    /// Replace SSID and passphrase; leaves both unchanged on error
    pub fn set_credentials(&mut self, ssid: &str, password: &str) -> Result<(), ConfigError> {
        let ssid = copy_str(ssid)?;
        let password = copy_str(password)?;
        self.ssid = ssid;
        self.password = password;
        Ok(())
    }

    /// Replace the cached station IP
    pub fn set_ip(&mut self, ip: &str) -> Result<(), ConfigError> {
        self.ip = copy_str(ip)?;
        Ok(())
    }

    /// Replace the cached station MAC
    pub fn set_mac(&mut self, mac: &str) -> Result<(), ConfigError> {
        self.mac = copy_str(mac)?;
        Ok(())
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        let mut config = Self {
            ssid: String::new(),
            password: String::new(),
            ip: String::new(),
            mac: String::new(),
        };
        let _ = config.ssid.push_str(DEFAULT_SSID);
        let _ = config.password.push_str(DEFAULT_PASSWORD);
        config
    }
}

/// TCP server settings for the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServerConfig {
    /// Listening port
    pub port: u16,
    /// Simultaneous connections the module accepts
    pub max_connections: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            max_connections: 1,
        }
    }
}

fn copy_str<const N: usize>(text: &str) -> Result<String<N>, ConfigError> {
    let mut out = String::new();
    out.push_str(text).map_err(|_| ConfigError::FieldTooLong)?;
    Ok(out)
}

/// Reads and writes [`NetworkConfig`] at a fixed storage offset
pub struct ConfigStore<S> {
    storage: S,
    offset: usize,
}

impl<S: NvStorage> ConfigStore<S> {
    /// Store at offset zero
    pub fn new(storage: S) -> Self {
        Self::with_offset(storage, 0)
    }

    /// Store at `offset`
    pub fn with_offset(storage: S, offset: usize) -> Self {
        Self { storage, offset }
    }

    /// Stored configuration, or `None` if the device was never configured
    pub fn load(&mut self) -> Result<Option<NetworkConfig>, ConfigError> {
        let mut sentinel = [0u8; 1];
        self.read(self.offset, &mut sentinel)?;
        if !matches!(sentinel[0], SENTINEL | LEGACY_SENTINEL) {
            return Ok(None);
        }

        let mut encoded = [0u8; MAX_ENCODED_LEN];
        self.read(self.offset + 1, &mut encoded)?;
        postcard::from_bytes(&encoded)
            .map(Some)
            .map_err(|_| ConfigError::Decode)
    }

    /// Stored configuration, falling back to the compiled defaults
    pub fn load_or_default(&mut self) -> NetworkConfig {
        match self.load() {
            Ok(Some(config)) => {
                log::info!("config: loaded settings for '{}'", config.ssid);
                config
            }
            Ok(None) => {
                log::info!("config: no stored settings, using defaults");
                NetworkConfig::default()
            }
            Err(e) => {
                log::warn!("config: {}, using defaults", e);
                NetworkConfig::default()
            }
        }
    }

    /// Persist `config` behind the sentinel
    pub fn save(&mut self, config: &NetworkConfig) -> Result<(), ConfigError> {
        let mut buf = [0u8; 1 + MAX_ENCODED_LEN];
        buf[0] = SENTINEL;
        let len = postcard::to_slice(config, &mut buf[1..])
            .map_err(|_| ConfigError::Encode)?
            .len();
        self.storage
            .write(self.offset, &buf[..1 + len])
            .map_err(|e| {
                log::warn!("config: storage write failed: {:?}", e);
                ConfigError::Storage
            })
    }

    /// Access the underlying storage
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> Result<(), ConfigError> {
        self.storage.read(offset, buf).map_err(|e| {
            log::warn!("config: storage read failed: {:?}", e);
            ConfigError::Storage
        })
    }
}
