use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::CallPolicy;
use crate::region::{self, Endpoints};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub channel: ChannelConfig,
    pub credentials: CredentialsConfig,
    pub nlp: NlpConfig,
    pub policy: PolicyConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub region: String,
    pub deployment_id: Option<String>,
    pub open_messaging_integration_id: Option<String>,
    pub websocket_endpoint: Option<String>,
    pub api_endpoint: Option<String>,
    pub auth_endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct CredentialsConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<SecretString>,
}

#[derive(Clone, Debug)]
pub struct NlpConfig {
    pub enabled: bool,
    pub inbound_flow_name: Option<String>,
    /// Conversation attribute naming the bot flow that handled a turn.
    pub bot_flow_attribute_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PolicyConfig {
    /// Zero disables the per-call timeout.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    WebMessaging,
    OpenMessaging,
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
    pub channel_kind: Option<ChannelKind>,
    pub region: Option<String>,
    pub deployment_id: Option<String>,
    pub open_messaging_integration_id: Option<String>,
    pub websocket_endpoint: Option<String>,
    pub api_endpoint: Option<String>,
    pub auth_endpoint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub nlp_enabled: Option<bool>,
    pub inbound_flow_name: Option<String>,
    pub bot_flow_attribute_name: Option<String>,
    pub log_level: Option<String>,
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
            channel: ChannelConfig {
                kind: ChannelKind::WebMessaging,
                region: String::new(),
                deployment_id: None,
                open_messaging_integration_id: None,
                websocket_endpoint: None,
                api_endpoint: None,
                auth_endpoint: None,
            },
            credentials: CredentialsConfig { client_id: None, client_secret: None },
            nlp: NlpConfig { enabled: false, inbound_flow_name: None, bot_flow_attribute_name: None },
            policy: PolicyConfig {
                timeout_secs: 0,
                max_retries: 0,
                base_delay_ms: 250,
                max_delay_ms: 5_000,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for ChannelKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "web_messaging" => Ok(Self::WebMessaging),
            "open_messaging" => Ok(Self::OpenMessaging),
            other => Err(ConfigError::Validation(format!(
                "unsupported messaging channel `{other}` (expected web_messaging|open_messaging)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
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

impl PolicyConfig {
    pub fn call_policy(&self) -> CallPolicy {
        CallPolicy {
            timeout: (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs)),
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
        }
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cxbridge.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Endpoints for the configured region, with explicit endpoint settings taking precedence.
    pub fn endpoints(&self) -> Endpoints {
        let table = region::endpoints_for(&self.channel.region);
        Endpoints {
            websocket: self
                .channel
                .websocket_endpoint
                .clone()
                .or_else(|| table.and_then(|entry| entry.websocket).map(str::to_owned)),
            auth: self
                .channel
                .auth_endpoint
                .clone()
                .or_else(|| table.map(|entry| entry.auth.to_owned())),
            api: self.channel.api_endpoint.clone().or_else(|| table.map(|entry| entry.api.to_owned())),
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(channel) = patch.channel {
            if let Some(kind) = channel.kind {
                self.channel.kind = kind;
            }
            if let Some(region) = channel.region {
                self.channel.region = region;
            }
            if let Some(deployment_id) = channel.deployment_id {
                self.channel.deployment_id = Some(deployment_id);
            }
            if let Some(integration_id) = channel.open_messaging_integration_id {
                self.channel.open_messaging_integration_id = Some(integration_id);
            }
            if let Some(websocket_endpoint) = channel.websocket_endpoint {
                self.channel.websocket_endpoint = Some(websocket_endpoint);
            }
            if let Some(api_endpoint) = channel.api_endpoint {
                self.channel.api_endpoint = Some(api_endpoint);
            }
            if let Some(auth_endpoint) = channel.auth_endpoint {
                self.channel.auth_endpoint = Some(auth_endpoint);
            }
        }

        if let Some(credentials) = patch.credentials {
            if let Some(client_id) = credentials.client_id {
                self.credentials.client_id = Some(client_id);
            }
            if let Some(client_secret_value) = credentials.client_secret {
                self.credentials.client_secret = Some(secret_value(client_secret_value));
            }
        }

        if let Some(nlp) = patch.nlp {
            if let Some(enabled) = nlp.enabled {
                self.nlp.enabled = enabled;
            }
            if let Some(inbound_flow_name) = nlp.inbound_flow_name {
                self.nlp.inbound_flow_name = Some(inbound_flow_name);
            }
            if let Some(attribute_name) = nlp.bot_flow_attribute_name {
                self.nlp.bot_flow_attribute_name = Some(attribute_name);
            }
        }

        if let Some(policy) = patch.policy {
            if let Some(timeout_secs) = policy.timeout_secs {
                self.policy.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = policy.max_retries {
                self.policy.max_retries = max_retries;
            }
            if let Some(base_delay_ms) = policy.base_delay_ms {
                self.policy.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = policy.max_delay_ms {
                self.policy.max_delay_ms = max_delay_ms;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CXBRIDGE_CHANNEL_KIND") {
            self.channel.kind = value.parse()?;
        }
        if let Some(value) = read_env("CXBRIDGE_REGION") {
            self.channel.region = value;
        }
        if let Some(value) = read_env("CXBRIDGE_DEPLOYMENT_ID") {
            self.channel.deployment_id = Some(value);
        }
        if let Some(value) = read_env("CXBRIDGE_OPEN_MESSAGING_INTEGRATION_ID") {
            self.channel.open_messaging_integration_id = Some(value);
        }
        if let Some(value) = read_env("CXBRIDGE_WEBSOCKET_ENDPOINT") {
            self.channel.websocket_endpoint = Some(value);
        }
        if let Some(value) = read_env("CXBRIDGE_API_ENDPOINT") {
            self.channel.api_endpoint = Some(value);
        }
        if let Some(value) = read_env("CXBRIDGE_AUTH_ENDPOINT") {
            self.channel.auth_endpoint = Some(value);
        }

        if let Some(value) = read_env("CXBRIDGE_CLIENT_ID") {
            self.credentials.client_id = Some(value);
        }
        if let Some(value) = read_env("CXBRIDGE_CLIENT_SECRET") {
            self.credentials.client_secret = Some(secret_value(value));
        }

        if let Some(value) = read_env("CXBRIDGE_NLP_ENABLED") {
            self.nlp.enabled = parse_bool("CXBRIDGE_NLP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CXBRIDGE_INBOUND_FLOW_NAME") {
            self.nlp.inbound_flow_name = Some(value);
        }
        if let Some(value) = read_env("CXBRIDGE_BOT_FLOW_ATTRIBUTE_NAME") {
            self.nlp.bot_flow_attribute_name = Some(value);
        }

        if let Some(value) = read_env("CXBRIDGE_CALL_TIMEOUT_SECS") {
            self.policy.timeout_secs = parse_u64("CXBRIDGE_CALL_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CXBRIDGE_CALL_MAX_RETRIES") {
            self.policy.max_retries = parse_u32("CXBRIDGE_CALL_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("CXBRIDGE_CALL_BASE_DELAY_MS") {
            self.policy.base_delay_ms = parse_u64("CXBRIDGE_CALL_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("CXBRIDGE_CALL_MAX_DELAY_MS") {
            self.policy.max_delay_ms = parse_u64("CXBRIDGE_CALL_MAX_DELAY_MS", &value)?;
        }

        let log_level =
            read_env("CXBRIDGE_LOGGING_LEVEL").or_else(|| read_env("CXBRIDGE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CXBRIDGE_LOGGING_FORMAT").or_else(|| read_env("CXBRIDGE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(kind) = overrides.channel_kind {
            self.channel.kind = kind;
        }
        if let Some(region) = overrides.region {
            self.channel.region = region;
        }
        if let Some(deployment_id) = overrides.deployment_id {
            self.channel.deployment_id = Some(deployment_id);
        }
        if let Some(integration_id) = overrides.open_messaging_integration_id {
            self.channel.open_messaging_integration_id = Some(integration_id);
        }
        if let Some(websocket_endpoint) = overrides.websocket_endpoint {
            self.channel.websocket_endpoint = Some(websocket_endpoint);
        }
        if let Some(api_endpoint) = overrides.api_endpoint {
            self.channel.api_endpoint = Some(api_endpoint);
        }
        if let Some(auth_endpoint) = overrides.auth_endpoint {
            self.channel.auth_endpoint = Some(auth_endpoint);
        }
        if let Some(client_id) = overrides.client_id {
            self.credentials.client_id = Some(client_id);
        }
        if let Some(client_secret) = overrides.client_secret {
            self.credentials.client_secret = Some(secret_value(client_secret));
        }
        if let Some(enabled) = overrides.nlp_enabled {
            self.nlp.enabled = enabled;
        }
        if let Some(inbound_flow_name) = overrides.inbound_flow_name {
            self.nlp.inbound_flow_name = Some(inbound_flow_name);
        }
        if let Some(attribute_name) = overrides.bot_flow_attribute_name {
            self.nlp.bot_flow_attribute_name = Some(attribute_name);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_channel(self)?;
        validate_policy(&self.policy)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cxbridge.toml"), PathBuf::from("config/cxbridge.toml")]
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

fn is_blank(value: Option<&str>) -> bool {
    value.map(|value| value.trim().is_empty()).unwrap_or(true)
}

fn validate_channel(config: &AppConfig) -> Result<(), ConfigError> {
    let channel = &config.channel;
    if channel.region.trim().is_empty() {
        return Err(ConfigError::Validation(format!(
            "channel.region is required (known regions: {})",
            region::known_regions().collect::<Vec<_>>().join(", ")
        )));
    }

    for (key, value, schemes) in [
        ("channel.websocket_endpoint", &channel.websocket_endpoint, ["wss://", "ws://"]),
        ("channel.api_endpoint", &channel.api_endpoint, ["https://", "http://"]),
        ("channel.auth_endpoint", &channel.auth_endpoint, ["https://", "http://"]),
    ] {
        if let Some(url) = value {
            if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
                return Err(ConfigError::Validation(format!(
                    "{key} must start with {} or {}",
                    schemes[0], schemes[1]
                )));
            }
        }
    }

    let endpoints = config.endpoints();
    let needs_platform_api = match channel.kind {
        ChannelKind::WebMessaging => {
            if is_blank(channel.deployment_id.as_deref()) {
                return Err(ConfigError::Validation(
                    "channel.deployment_id is required for web messaging".to_string(),
                ));
            }
            if endpoints.websocket.is_none() {
                return Err(ConfigError::Validation(format!(
                    "no websocket address found for `{}` region",
                    channel.region
                )));
            }
            config.nlp.enabled
        }
        ChannelKind::OpenMessaging => {
            if is_blank(channel.open_messaging_integration_id.as_deref()) {
                return Err(ConfigError::Validation(
                    "channel.open_messaging_integration_id is required for open messaging"
                        .to_string(),
                ));
            }
            true
        }
    };

    if !needs_platform_api {
        return Ok(());
    }

    let purpose = match channel.kind {
        ChannelKind::WebMessaging => "nlp analytics",
        ChannelKind::OpenMessaging => "open messaging",
    };
    if is_blank(config.credentials.client_id.as_deref()) {
        return Err(ConfigError::Validation(format!(
            "credentials.client_id is required for {purpose}"
        )));
    }
    let missing_secret = config
        .credentials
        .client_secret
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing_secret {
        return Err(ConfigError::Validation(format!(
            "credentials.client_secret is required for {purpose}"
        )));
    }
    if channel.kind == ChannelKind::WebMessaging
        && is_blank(config.nlp.inbound_flow_name.as_deref())
    {
        return Err(ConfigError::Validation(
            "nlp.inbound_flow_name is required for nlp analytics".to_string(),
        ));
    }
    if endpoints.api.is_none() {
        return Err(ConfigError::Validation(format!(
            "no api endpoint found for `{}` region",
            channel.region
        )));
    }
    if endpoints.auth.is_none() {
        return Err(ConfigError::Validation(format!(
            "no auth endpoint found for `{}` region",
            channel.region
        )));
    }

    Ok(())
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    if policy.timeout_secs > 3_600 {
        return Err(ConfigError::Validation(
            "policy.timeout_secs must be in range 0..=3600".to_string(),
        ));
    }

    if policy.max_delay_ms < policy.base_delay_ms {
        return Err(ConfigError::Validation(
            "policy.max_delay_ms must not be smaller than policy.base_delay_ms".to_string(),
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    channel: Option<ChannelPatch>,
    credentials: Option<CredentialsPatch>,
    nlp: Option<NlpPatch>,
    policy: Option<PolicyPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    kind: Option<ChannelKind>,
    region: Option<String>,
    deployment_id: Option<String>,
    open_messaging_integration_id: Option<String>,
    websocket_endpoint: Option<String>,
    api_endpoint: Option<String>,
    auth_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CredentialsPatch {
    client_id: Option<String>,
    client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NlpPatch {
    enabled: Option<bool>,
    inbound_flow_name: Option<String>,
    bot_flow_attribute_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
