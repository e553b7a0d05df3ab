use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions \
asked in a Slack workspace. Keep answers concise and format them with Slack mrkdwn.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub slack: SlackConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub signing_secret: Option<SecretString>,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub system_prompt: String,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub events_path: String,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            slack: SlackConfig {
                bot_token: String::new().into(),
                signing_secret: None,
                api_base_url: "https://slack.com/api".to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Anthropic,
                api_key: None,
                base_url: None,
                model: "claude-sonnet-4-5".to_string(),
                max_tokens: 1024,
                timeout_secs: 120,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                events_path: "/slack/events".to_string(),
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LlmConfig {
    /// Base URL to call, falling back to the provider's public endpoint.
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_base_url())
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("mentionbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        let ConfigPatch { slack, llm, server, logging } = patch;

        if let Some(slack) = slack {
            merge(&mut self.slack.bot_token, slack.bot_token.map(SecretString::from));
            merge_some(
                &mut self.slack.signing_secret,
                slack.signing_secret.map(SecretString::from),
            );
            merge(&mut self.slack.api_base_url, slack.api_base_url);
        }
        if let Some(llm) = llm {
            merge(&mut self.llm.provider, llm.provider);
            merge_some(&mut self.llm.api_key, llm.api_key.map(SecretString::from));
            merge_some(&mut self.llm.base_url, llm.base_url);
            merge(&mut self.llm.model, llm.model);
            merge(&mut self.llm.max_tokens, llm.max_tokens);
            merge(&mut self.llm.timeout_secs, llm.timeout_secs);
            merge(&mut self.llm.system_prompt, llm.system_prompt);
        }
        if let Some(server) = server {
            merge(&mut self.server.bind_address, server.bind_address);
            merge(&mut self.server.port, server.port);
            merge(&mut self.server.events_path, server.events_path);
            merge(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);
        }
        if let Some(logging) = logging {
            merge(&mut self.logging.level, logging.level);
            merge(&mut self.logging.format, logging.format);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        merge(&mut self.slack.bot_token, env_secret("MENTIONBOT_SLACK_BOT_TOKEN"));
        merge_some(&mut self.slack.signing_secret, env_secret("MENTIONBOT_SLACK_SIGNING_SECRET"));
        merge(&mut self.slack.api_base_url, read_env("MENTIONBOT_SLACK_API_BASE_URL"));

        merge(&mut self.llm.provider, env_parsed("MENTIONBOT_LLM_PROVIDER")?);
        merge_some(&mut self.llm.api_key, env_secret("MENTIONBOT_LLM_API_KEY"));
        merge_some(&mut self.llm.base_url, read_env("MENTIONBOT_LLM_BASE_URL"));
        merge(&mut self.llm.model, read_env("MENTIONBOT_LLM_MODEL"));
        merge(&mut self.llm.max_tokens, env_parsed("MENTIONBOT_LLM_MAX_TOKENS")?);
        merge(&mut self.llm.timeout_secs, env_parsed("MENTIONBOT_LLM_TIMEOUT_SECS")?);
        merge(&mut self.llm.system_prompt, read_env("MENTIONBOT_LLM_SYSTEM_PROMPT"));

        merge(&mut self.server.bind_address, read_env("MENTIONBOT_SERVER_BIND_ADDRESS"));
        // PORT is what most container platforms inject.
        let port = match env_parsed("MENTIONBOT_SERVER_PORT")? {
            Some(port) => Some(port),
            None => env_parsed("PORT")?,
        };
        merge(&mut self.server.port, port);
        merge(&mut self.server.events_path, read_env("MENTIONBOT_SERVER_EVENTS_PATH"));
        merge(
            &mut self.server.graceful_shutdown_secs,
            env_parsed("MENTIONBOT_SERVER_GRACEFUL_SHUTDOWN_SECS")?,
        );

        let level =
            read_env("MENTIONBOT_LOGGING_LEVEL").or_else(|| read_env("MENTIONBOT_LOG_LEVEL"));
        merge(&mut self.logging.level, level);
        let format = match env_parsed("MENTIONBOT_LOGGING_FORMAT")? {
            Some(format) => Some(format),
            None => env_parsed("MENTIONBOT_LOG_FORMAT")?,
        };
        merge(&mut self.logging.format, format);

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        merge(&mut self.logging.level, overrides.log_level);
        merge(&mut self.llm.provider, overrides.llm_provider);
        merge(&mut self.llm.model, overrides.llm_model);
        merge_some(&mut self.llm.api_key, overrides.llm_api_key.map(SecretString::from));
        merge(&mut self.slack.bot_token, overrides.slack_bot_token.map(SecretString::from));
        merge_some(
            &mut self.slack.signing_secret,
            overrides.slack_signing_secret.map(SecretString::from),
        );
        merge(&mut self.server.port, overrides.server_port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_slack(&self.slack)?;
        validate_llm(&self.llm)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("mentionbot.toml"), PathBuf::from("config/mentionbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used the app-level token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    let empty_secret = slack
        .signing_secret
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if empty_secret {
        return Err(ConfigError::Validation(
            "slack.signing_secret must not be blank when set".to_string(),
        ));
    }

    let base_url = slack.api_base_url.trim();
    if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if llm.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "llm.max_tokens must be greater than zero".to_string(),
        ));
    }

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {}
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if !server.events_path.starts_with('/') {
        return Err(ConfigError::Validation(
            "server.events_path must start with `/`".to_string(),
        ));
    }

    if server.events_path == "/health" {
        return Err(ConfigError::Validation(
            "server.events_path must not shadow the `/health` route".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

/// Later layers replace a value only when they actually provide one.
fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn merge_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_secret(key: &str) -> Option<SecretString> {
    read_env(key).map(SecretString::from)
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    read_env(key)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value,
            })
        })
        .transpose()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    slack: Option<SlackPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    signing_secret: Option<String>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    timeout_secs: Option<u64>,
    system_prompt: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    events_path: Option<String>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
