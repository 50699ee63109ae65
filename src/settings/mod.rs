use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

/// Address the listener binds to when nothing else is configured: all interfaces.
pub const DEFAULT_BIND_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
/// Port the listener binds to when nothing else is configured.
pub const DEFAULT_PORT: u16 = 1234;
/// Largest datagram read in one receive when nothing else is configured.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 65536;

/// Prefix of the environment variables overriding the settings.
pub const ENV_PREFIX: &str = "LISTENER";
/// Environment variable pointing at an explicit settings file.
pub const CONFIG_PATH_VAR: &str = "LISTENER_CONFIG";
/// Base name of the optional settings file looked up in the working directory.
pub const DEFAULT_CONFIG_NAME: &str = "listener";

/// Represents the kind of error that can occur while loading the settings
#[derive(Error, Debug)]
pub enum SettingsError {
    /// A source could not be read or a value has the wrong type.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The settings were loaded but are not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What the listener does with a datagram that is not a valid packet line.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Stop the listener with an error.
    #[default]
    Abort,
    /// Log a warning and keep receiving.
    Skip,
}

/// Settings of the listener.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Local address to bind the socket to.
    pub bind_address: IpAddr,
    /// Local port to bind the socket to.
    pub port: u16,
    /// Size of the receive buffer, the largest datagram read intact.
    pub max_datagram_size: usize,
    /// Handling of malformed datagrams.
    #[serde(default)]
    pub on_malformed: MalformedPolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS,
            port: DEFAULT_PORT,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            on_malformed: MalformedPolicy::default(),
        }
    }
}

impl ListenerConfig {
    /// Loads the settings from the defaults, the settings file and the environment.
    ///
    /// The file is the one named by `LISTENER_CONFIG` if set, otherwise an optional
    /// `listener.{toml,json,yaml,...}` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if a source cannot be read or a value is invalid.
    pub fn load() -> Result<Self, SettingsError> {
        let path = env::var_os(CONFIG_PATH_VAR);
        Self::load_with(
            path.as_deref().map(Path::new),
            Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        )
    }

    /// Loads the settings from the defaults, the given file and the given environment source.
    ///
    /// An explicit file must exist. Without one, the default file name is tried and may be absent.
    ///
    /// # Errors
    ///
    /// Returns a `SettingsError` if a source cannot be read or a value is invalid.
    pub fn load_with(file: Option<&Path>, environment: Environment) -> Result<Self, SettingsError> {
        let defaults = Self::default();
        let mut builder = Config::builder()
            .set_default("bind_address", defaults.bind_address.to_string())?
            .set_default("port", i64::from(defaults.port))?
            .set_default("max_datagram_size", defaults.max_datagram_size.to_string())?
            .set_default("on_malformed", "abort")?;

        builder = match file {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_NAME).required(false)),
        };

        let settings: Self = builder.add_source(environment).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Returns the socket address made of the bind address and the port.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.max_datagram_size == 0 {
            return Err(SettingsError::Invalid(
                "max_datagram_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
