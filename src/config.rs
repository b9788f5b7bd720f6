use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "updoot", about = "A small forum backend")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to data directory
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub web: WebConfig,
    pub voting: VotingConfig,
    pub loader: LoaderConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
    pub reset_token_hours: u64,
    /// bcrypt work factor for new password hashes
    pub bcrypt_cost: u32,
}

/// Where the web frontend lives. Used for CORS and for links in emails.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct WebConfig {
    pub origin: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct VotingConfig {
    /// Reject vote values other than 1 and -1 instead of treating them as up-votes
    pub strict: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_delay_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "qid".to_string(),
            // ten years
            session_hours: 24 * 365 * 10,
            reset_token_hours: 24,
            bcrypt_cost: 12,
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { batch_delay_ms: 1 }
    }
}

impl LoaderConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let data_dir = Self::data_dir(cli);
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| data_dir.join("config.toml"));

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        if config.database.path.is_none() {
            config.database.path = Some(data_dir.join("updoot.db"));
        }

        Ok(config)
    }

    pub fn data_dir(cli: &Cli) -> PathBuf {
        cli.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".updoot")
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| PathBuf::from("updoot.db"))
    }
}
