//! Configuration for disposable database containers.
//!
//! Every knob that used to be a literal in test setup lives here with a documented
//! default, so parallel suites can pick their own host ports or images without
//! touching fixture code.
//!
//! ## Example Configuration
//!
//! ```toml
//! image = "mysql"
//! image_tag = "8.0"
//! host_port = 13306
//! connect_timeout_seconds = 90
//! ```
//!
//! Environment variables override the file, e.g. `TESTFIXTURES_HOST_PORT=13306`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "TESTFIXTURES";

/// Optional configuration file, relative to the working directory.
pub const CONFIG_FILE: &str = "config/testfixtures";

/// Settings for a single disposable database container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image repository to pull
    #[serde(default = "default_image")]
    pub image: String,

    /// Image tag to pull
    #[serde(default = "default_image_tag")]
    pub image_tag: String,

    /// Prefix for the generated container name (`<prefix>-<uuid>`)
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Database created on first boot
    #[serde(default = "default_database")]
    pub database: String,

    /// Login used by tests
    #[serde(default = "default_username")]
    pub username: String,

    /// Password for `username` (and the superuser)
    #[serde(default = "default_password")]
    pub password: String,

    /// Port the engine listens on inside the container
    #[serde(default = "default_container_port")]
    pub container_port: u16,

    /// Fixed host port to publish on. `None` lets the runtime pick a free port.
    ///
    /// The fixed default means two containers cannot run at the same time.
    #[serde(default = "default_host_port")]
    pub host_port: Option<u16>,

    /// Host to connect to. `None` uses the host reported by the container runtime.
    #[serde(default)]
    pub host: Option<String>,

    /// Grace period for a stop request before the container is killed
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,

    /// Total time to wait for the database to accept connections
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Hard expiry after which a background task stops the container regardless
    #[serde(default = "default_expire_timeout")]
    pub expire_timeout_seconds: u64,

    /// Connections kept by the verified handle
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_image() -> String {
    "mysql".to_string()
}

fn default_image_tag() -> String {
    "latest".to_string()
}

fn default_name_prefix() -> String {
    "mysql".to_string()
}

fn default_database() -> String {
    "defaultdb".to_string()
}

fn default_username() -> String {
    "root".to_string()
}

fn default_password() -> String {
    "secret".to_string()
}

fn default_container_port() -> u16 {
    3306
}

fn default_host_port() -> Option<u16> {
    Some(3306)
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_expire_timeout() -> u64 {
    600 // 10 minutes
}

fn default_max_connections() -> u32 {
    5
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            image_tag: default_image_tag(),
            name_prefix: default_name_prefix(),
            database: default_database(),
            username: default_username(),
            password: default_password(),
            container_port: default_container_port(),
            host_port: default_host_port(),
            host: None,
            stop_timeout_seconds: default_stop_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            expire_timeout_seconds: default_expire_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

impl ContainerConfig {
    /// Load configuration from the optional config file and environment variables.
    ///
    /// Sources are applied in order (later sources override earlier ones):
    /// 1. Default values
    /// 2. `config/testfixtures.{toml,yaml,json}` (if it exists)
    /// 3. Environment variables prefixed with `TESTFIXTURES_`
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        Self::from_builder(builder)
    }

    /// Parse configuration from a TOML document, filling gaps with defaults.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml));

        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder
            .build()
            .context("Failed to build container configuration")?;

        let container_config: ContainerConfig = config
            .try_deserialize()
            .context("Failed to deserialize container configuration")?;

        container_config.validate()?;

        Ok(container_config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.image.is_empty() {
            anyhow::bail!("Container image is required");
        }

        if self.image_tag.is_empty() {
            anyhow::bail!("Container image tag is required");
        }

        if self.database.is_empty() {
            anyhow::bail!("Database name is required");
        }

        if self.username.is_empty() {
            anyhow::bail!("Database username is required");
        }

        if self.container_port == 0 {
            anyhow::bail!("Container port must be greater than 0");
        }

        if self.host_port == Some(0) {
            anyhow::bail!("Host port must be greater than 0 (omit it for a random port)");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be greater than 0");
        }

        if self.stop_timeout_seconds == 0 {
            anyhow::bail!("Stop timeout must be greater than 0");
        }

        if self.connect_timeout_seconds == 0 {
            anyhow::bail!("Connect timeout must be greater than 0");
        }

        if self.expire_timeout_seconds <= self.connect_timeout_seconds {
            anyhow::bail!(
                "Expire timeout ({}s) must be longer than the connect timeout ({}s)",
                self.expire_timeout_seconds,
                self.connect_timeout_seconds
            );
        }

        Ok(())
    }

    /// Full image reference, e.g. `mysql:latest`
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.image_tag)
    }

    /// Get the stop grace period as a Duration
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }

    /// Get the connection retry budget as a Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get the watchdog expiry as a Duration
    pub fn expire_timeout(&self) -> Duration {
        Duration::from_secs(self.expire_timeout_seconds)
    }

    /// Use a different image
    pub fn with_image(mut self, image: impl Into<String>, tag: impl Into<String>) -> Self {
        self.image = image.into();
        self.image_tag = tag.into();
        self
    }

    /// Publish on a fixed host port
    pub fn with_host_port(mut self, port: u16) -> Self {
        self.host_port = Some(port);
        self
    }

    /// Let the runtime choose the host port
    pub fn with_ephemeral_host_port(mut self) -> Self {
        self.host_port = None;
        self
    }

    /// Connect through a specific host instead of the runtime-reported one
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Override the credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Override the connection retry budget
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_seconds = timeout.as_secs().max(1);
        self
    }

    /// Override the watchdog expiry
    pub fn with_expire_timeout(mut self, timeout: Duration) -> Self {
        self.expire_timeout_seconds = timeout.as_secs().max(1);
        self
    }
}
