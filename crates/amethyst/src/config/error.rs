use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read or write configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration TOML: {0}")]
    TomlDeserialization(#[from] toml::de::Error),

    #[error("failed to serialize configuration TOML: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
