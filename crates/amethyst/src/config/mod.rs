use error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub mod error;

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub network: NetworkConfig,
    pub server: ServerConfig,
    pub raknet: RakNetConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub address: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub max_players: u32,
}

/// Tunables for the offline handshake core (`rakethyst`). Mirrors
/// `rakethyst::HandshakeConfig` field-for-field, in TOML-friendly types.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RakNetConfig {
    pub min_mtu: u16,
    pub max_mtu: u16,
    pub send_cookie: bool,
    pub handle_ping_externally: bool,
    /// `None` accepts every protocol version; `Some(vec![...])` restricts.
    pub supported_protocols: Option<Vec<u8>>,
    /// Returned verbatim in `UNCONNECTED_PONG`; absent means no advertisement.
    pub advertisement: Option<String>,
    pub proxy_protocol_enabled: bool,
    pub proxy_protocol_reject_on_decode_error: bool,
    /// Override for the pending-connection table's TTL; `rakethyst` defaults
    /// to 10s when this section is omitted entirely.
    pub pending_ttl_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0:19132".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Amethyst".to_string(),
            max_players: 50,
        }
    }
}

impl Default for RakNetConfig {
    fn default() -> Self {
        Self {
            min_mtu: 400,
            max_mtu: 1400,
            send_cookie: true,
            handle_ping_externally: false,
            supported_protocols: None,
            advertisement: None,
            proxy_protocol_enabled: false,
            proxy_protocol_reject_on_decode_error: true,
            pending_ttl_secs: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            server: ServerConfig::default(),
            raknet: RakNetConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.network.address).is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid network address format: '{}'. Expected format like 'IP:PORT'.",
                self.network.address
            )));
        }

        if self.server.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "Server name cannot be empty.".to_string(),
            ));
        }

        if self.server.max_players == 0 {
            return Err(ConfigError::Validation(
                "Maximum players must be greater than 0.".to_string(),
            ));
        }

        if self.raknet.min_mtu == 0 || self.raknet.min_mtu > self.raknet.max_mtu {
            return Err(ConfigError::Validation(format!(
                "raknet.min_mtu ({}) must be nonzero and not exceed raknet.max_mtu ({}).",
                self.raknet.min_mtu, self.raknet.max_mtu
            )));
        }

        if let Some(protocols) = &self.raknet.supported_protocols {
            if protocols.is_empty() {
                return Err(ConfigError::Validation(
                    "raknet.supported_protocols, if set, must not be empty.".to_string(),
                ));
            }
        }

        if self.raknet.pending_ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "raknet.pending_ttl_secs must be greater than 0.".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn handle() -> Result<Config, ConfigError> {
    let config_path = PathBuf::from(CONFIG_FILE_NAME);
    if config_path.exists() {
        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = toml::from_str(&config_content)?;
        config.validate()?;
        Ok(config)
    } else {
        let config = Config::default();
        save(&config, &config_path)?;
        Ok(config)
    }
}

fn save(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let config_content = toml::to_string_pretty(config)?;
    let mut file = fs::File::create(path)?;
    file.write_all(config_content.as_bytes())?;
    Ok(())
}