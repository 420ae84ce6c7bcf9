use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// colorchat presence and relay server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "colorchat-server", version, about = "colorchat presence and relay server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "COLORCHAT_PORT", default_value = "3000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "COLORCHAT_BIND_ADDRESS", default_value = "127.0.0.1")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./colorchat.toml")]
    pub config: String,

    /// Enable structured JSON logging
    #[arg(long, env = "COLORCHAT_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Events a connection may fall behind before it starts losing the oldest
    /// (rounded up to a power of two)
    #[arg(long, env = "COLORCHAT_BUS_CAPACITY", default_value = "64")]
    pub bus_capacity: usize,

    /// Seconds a new connection has to send its startup frame
    #[arg(long, env = "COLORCHAT_HANDSHAKE_TIMEOUT_SECS", default_value = "10")]
    pub handshake_timeout_secs: u64,

    /// Seconds between presence log lines
    #[arg(long, env = "COLORCHAT_PRESENCE_INTERVAL_SECS", default_value = "1")]
    pub presence_interval_secs: u64,

    /// Seconds to wait for connections to close on shutdown
    #[arg(long, env = "COLORCHAT_SHUTDOWN_GRACE_SECS", default_value = "5")]
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "127.0.0.1".to_string(),
            config: "./colorchat.toml".to_string(),
            json_logs: false,
            generate_config: false,
            bus_capacity: 64,
            handshake_timeout_secs: 10,
            presence_interval_secs: 1,
            shutdown_grace_secs: 5,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COLORCHAT_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Config::parse())
    }

    fn load_from(cli: Config) -> Result<Self, figment::Error> {
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("COLORCHAT_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn presence_interval(&self) -> Duration {
        // interval() panics on a zero period
        Duration::from_secs(self.presence_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# colorchat server configuration
# Place this file at ./colorchat.toml or specify with --config <path>
# All settings can be overridden via environment variables (COLORCHAT_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 3000)
# port = 3000

# Bind address (default: 127.0.0.1)
# bind_address = "127.0.0.1"

# Enable structured JSON logging
# json_logs = false

# Per-connection event window, rounded up to a power of two. A connection
# that falls further behind loses the oldest events (default: 64)
# bus_capacity = 64

# Seconds a new connection has to send its startup frame (default: 10)
# handshake_timeout_secs = 10

# Seconds between presence log lines, logged at debug level (default: 1)
# presence_interval_secs = 1

# Seconds to wait for open connections on shutdown (default: 5)
# shutdown_grace_secs = 5
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.addr(), "127.0.0.1:3000");
        assert_eq!(config.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.presence_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_cli_parse() {
        let config = Config::parse_from([
            "colorchat-server",
            "--port",
            "4000",
            "--bus-capacity",
            "8",
            "--presence-interval-secs",
            "0",
        ]);
        assert_eq!(config.port, 4000);
        assert_eq!(config.bus_capacity, 8);
        assert_eq!(config.presence_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_template_mentions_every_setting() {
        let template = generate_config_template();
        for key in [
            "port",
            "bind_address",
            "json_logs",
            "bus_capacity",
            "handshake_timeout_secs",
            "presence_interval_secs",
            "shutdown_grace_secs",
        ] {
            assert!(template.contains(key), "template is missing {}", key);
        }
    }

    #[test]
    fn test_template_parses_as_toml_defaults() {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::string(&generate_config_template()))
            .extract()
            .unwrap();
        assert_eq!(config.port, 3000);
    }
}
