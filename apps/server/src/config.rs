// SPDX-FileCopyrightText: © 2025 StreamKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::Level;

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    5555
}

/// TCP listener configuration (C9).
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ServerConfig {
    /// Address to bind the listening socket to.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// TCP port to accept connections on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind(), port: default_port() }
    }
}

fn default_users_file_path() -> String {
    "users.json".to_string()
}

/// User store configuration (C2).
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct UsersConfig {
    /// Path to the JSON file backing the user store, relative to the
    /// working directory unless absolute.
    #[serde(default = "default_users_file_path")]
    pub file_path: String,
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self { file_path: default_users_file_path() }
    }
}

fn default_tick_seconds() -> f64 {
    1.0
}

/// Environment simulation configuration (C3/C6).
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
pub struct SimConfig {
    /// Seconds of simulated time advanced per sensor engine tick.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: f64,
    /// When set, the environment model's noise terms become deterministic
    /// (seeded from this value) instead of drawing from the thread-local
    /// RNG. Intended for integration tests that assert exact trends.
    #[serde(default)]
    pub test_seed: Option<u64>,
}

/// Log level for filtering messages.
#[derive(Deserialize, Serialize, Debug, Clone, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Log file format options.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (faster, lower CPU overhead).
    #[default]
    Text,
    /// JSON format (structured, better for log aggregation).
    Json,
}

fn default_log_file_path() -> String {
    "./greenhouse.log".to_string()
}

/// Logging configuration for console and file output.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub console_enable: bool,
    #[serde(default)]
    pub file_enable: bool,
    #[serde(default)]
    pub console_level: LogLevel,
    #[serde(default)]
    pub file_level: LogLevel,
    #[serde(default = "default_log_file_path")]
    pub file_path: String,
    #[serde(default)]
    pub file_format: LogFormat,
}

const fn default_true() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enable: true,
            file_enable: false,
            console_level: LogLevel::default(),
            file_level: LogLevel::Info,
            file_path: default_log_file_path(),
            file_format: LogFormat::default(),
        }
    }
}

/// Root configuration for the greenhouse server.
#[derive(Deserialize, Serialize, Default, Debug, Clone, JsonSchema)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub users: UsersConfig,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub file_missing: Option<String>,
}

/// Loads configuration from compiled-in defaults, an optional TOML file,
/// and `GH_`-prefixed environment variables (`__` as the nesting
/// separator, e.g. `GH_SERVER__PORT`). A missing config file is not an
/// error; a malformed one, or an invalid environment value, is.
///
/// # Errors
///
/// Returns an error if the configuration file contains invalid TOML, or
/// an environment variable holds a value that does not fit its field's
/// type.
pub fn load(config_path: &str) -> Result<ConfigLoadResult, Box<figment::Error>> {
    let mut figment =
        Figment::new().merge(figment::providers::Serialized::defaults(Config::default()));

    let mut file_missing = None;
    if std::path::Path::new(config_path).exists() {
        figment = figment.merge(Toml::file(config_path));
    } else {
        file_missing = Some(config_path.to_string());
    }

    let config: Config = figment.merge(Env::prefixed("GH_").split("__")).extract().map_err(Box::new)?;

    Ok(ConfigLoadResult { config, file_missing })
}

/// Generates the default configuration as a pretty-printed TOML string.
///
/// # Errors
///
/// Returns an error if the default configuration cannot be serialized to
/// TOML. Extremely unlikely in practice; would indicate a programming
/// error in this module.
pub fn generate_default() -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(&Config::default())
}
