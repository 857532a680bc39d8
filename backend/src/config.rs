use serde::{Deserialize, Serialize};
use std::{env, path::Path};

use crate::db::is_identifier_path;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayConfig {
    pub executable: String,
    pub port: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DashboardConfig {
    pub view: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphsConfig {
    pub view: String,
}

/// A list viewer mounted at `route`, showing the newest `limit` rows of `view`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ViewerConfig {
    pub route: String,
    pub view: String,
    pub order_by: String,
    pub limit: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImportConfig {
    pub jsonl_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub relay: RelayConfig,
    pub dashboard: DashboardConfig,
    pub graphs: GraphsConfig,
    pub viewers: Vec<ViewerConfig>,
    pub import: ImportConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Reads `path` if it exists, then `MESHDASH__*` environment variables.
    /// `DATABASE_URL` (also from `.env`) wins over both.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("MESHDASH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("database.url", env::var("DATABASE_URL").ok())?
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for view in [&self.dashboard.view, &self.graphs.view] {
            check_identifier(view)?;
        }
        if self.relay.executable.is_empty() {
            return Err(ConfigError::Invalid("relay.executable is empty".to_owned()));
        }
        if self.relay.timeout_secs == 0 {
            return Err(ConfigError::Invalid("relay.timeout_secs must be > 0".to_owned()));
        }

        for viewer in &self.viewers {
            if viewer.title.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "viewer {:?} has no title",
                    viewer.route
                )));
            }
            check_identifier(&viewer.view)?;
            check_identifier(&viewer.order_by)?;
            if viewer.limit == 0 {
                return Err(ConfigError::Invalid(format!(
                    "viewer {}: limit must be > 0",
                    viewer.route
                )));
            }
            if !viewer.route.starts_with('/') || viewer.route == "/" || viewer.route == "/graphs" {
                return Err(ConfigError::Invalid(format!(
                    "viewer route {:?} must start with '/' and not shadow another page",
                    viewer.route
                )));
            }
        }

        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_owned(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://webapp@127.0.0.1/meshtastic".to_owned(),
            },
            relay: RelayConfig {
                executable: "/home/pi/meshtastic/bin/meshtastic".to_owned(),
                port: "/dev/ttyUSB0".to_owned(),
                timeout_secs: 30,
            },
            dashboard: DashboardConfig {
                view: "messages_temp_humidity_led".to_owned(),
            },
            graphs: GraphsConfig {
                view: "messages_temp_humidity".to_owned(),
            },
            viewers: vec![
                default_viewer(
                    "/messages",
                    "messages_clean",
                    "Showing latest 200 rows from the view.",
                ),
                default_viewer(
                    "/temp-humidity",
                    "messages_temp_humidity",
                    "Showing latest 200 rows from the view (temperature & humidity parsed from the message field).",
                ),
            ],
            import: ImportConfig {
                jsonl_path: "/home/pi/meshtastic/messages.jsonl".to_owned(),
            },
        }
    }
}

fn default_viewer(route: &str, view: &str, description: &str) -> ViewerConfig {
    ViewerConfig {
        route: route.to_owned(),
        view: view.to_owned(),
        order_by: "ts".to_owned(),
        limit: 200,
        title: view.to_owned(),
        description: description.to_owned(),
    }
}

fn check_identifier(name: &str) -> Result<(), ConfigError> {
    if is_identifier_path(name) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name:?} is not a plain SQL identifier"
        )))
    }
}
