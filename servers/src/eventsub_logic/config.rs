use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lib_eventsub::EventSubConfig;
use lib_eventsub::loggers::LogOptions;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "server_eventsub.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "EventSub session pool server", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "EVENTSUB_PORT", help = "Port for the health/status HTTP endpoint.")]
    pub port: Option<u16>,

    #[clap(long, env = "EVENTSUB_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "EVENTSUB_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "EVENTSUB_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "EVENTSUB_CLIENT_ID", help = "Application client id sent with every REST call.")]
    pub client_id: Option<String>,

    #[clap(long, env = "EVENTSUB_ACCESS_TOKEN", help = "User access token for the in-memory token source.")]
    pub access_token: Option<String>,

    #[clap(long, env = "EVENTSUB_DATABASE_URL", help = "PostgreSQL URL. Subscriptions are kept in memory when unset.")]
    pub database_url: Option<String>,

    #[clap(long, env = "EVENTSUB_DATABASE_MAX_CONNECTIONS", help = "Maximum PostgreSQL pool size.")]
    pub database_max_connections: Option<usize>,

    #[clap(long, env = "EVENTSUB_WS_URL", help = "EventSub WebSocket endpoint.")]
    pub eventsub_ws_url: Option<String>,

    #[clap(long, env = "EVENTSUB_SUBSCRIPTIONS_URL", help = "REST endpoint for subscription create/delete.")]
    pub subscriptions_url: Option<String>,

    #[clap(long, env = "EVENTSUB_MAX_SUBSCRIPTIONS_PER_POOL", help = "Subscriptions per WebSocket session.")]
    pub max_subscriptions_per_pool: Option<usize>,

    #[clap(long, env = "EVENTSUB_AUTHORIZER_ID", help = "Account whose token authorizes the default subscriptions.")]
    pub authorizer_id: Option<String>,

    #[clap(long, env = "EVENTSUB_DEFAULT_USER_ID", help = "Broadcaster to create the default subscription set for.")]
    pub default_user_id: Option<String>,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            client_id: other.client_id.or(self.client_id),
            access_token: other.access_token.or(self.access_token),
            database_url: other.database_url.or(self.database_url),
            database_max_connections: other.database_max_connections.or(self.database_max_connections),
            eventsub_ws_url: other.eventsub_ws_url.or(self.eventsub_ws_url),
            subscriptions_url: other.subscriptions_url.or(self.subscriptions_url),
            max_subscriptions_per_pool: other.max_subscriptions_per_pool.or(self.max_subscriptions_per_pool),
            authorizer_id: other.authorizer_id.or(self.authorizer_id),
            default_user_id: other.default_user_id.or(self.default_user_id),
        }
    }

    fn defaults() -> Config {
        let eventsub = EventSubConfig::default();
        Config {
            port: Some(9003),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            database_max_connections: Some(8),
            eventsub_ws_url: Some(eventsub.eventsub_ws_url),
            subscriptions_url: Some(eventsub.subscriptions_url),
            max_subscriptions_per_pool: Some(eventsub.max_subscriptions_per_pool),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(9003)
    }

    pub fn log_options(&self) -> LogOptions {
        let mut options = LogOptions {
            file_prefix: "server_eventsub".to_string(),
            ..Default::default()
        };
        if let Some(dir) = &self.log_dir {
            options.dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            options.level = level.clone();
        }
        options
    }

    pub fn database_max_connections(&self) -> usize {
        self.database_max_connections.unwrap_or(8)
    }

    pub fn database_connect_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    /// Library settings with this layer's values applied; validated before use.
    pub fn eventsub_config(&self) -> Result<EventSubConfig> {
        let mut eventsub = EventSubConfig::default();
        if let Some(client_id) = &self.client_id {
            eventsub.client_id = client_id.clone();
        }
        if let Some(url) = &self.eventsub_ws_url {
            eventsub.eventsub_ws_url = url.clone();
        }
        if let Some(url) = &self.subscriptions_url {
            eventsub.subscriptions_url = url.clone();
        }
        if let Some(max) = self.max_subscriptions_per_pool {
            eventsub.max_subscriptions_per_pool = max;
        }
        eventsub.validate().context("invalid eventsub configuration")?;
        Ok(eventsub)
    }

    /// The account and broadcaster the default subscription set is created for, when both are set.
    pub fn default_subscription_target(&self) -> Option<(&str, &str)> {
        match (&self.authorizer_id, &self.default_user_id) {
            (Some(authorizer), Some(user)) => Some((authorizer.as_str(), user.as_str())),
            _ => None,
        }
    }
}

fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str::<Config>(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(config))
}

/// Defaults, then the JSON config file, then environment variables and CLI flags.
pub fn load_config() -> Result<Config> {
    let cli = Config::parse();
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        config = config.merge(file_config);
    }
    config = config.merge(cli);
    if config.config_path.is_none() {
        config.config_path = Some(config_file_path);
    }
    Ok(config)
}
