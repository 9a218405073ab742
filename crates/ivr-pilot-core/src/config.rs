//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, IvrError};
use crate::flow::{default_steps, FlowDefinition, StepConfig};

/// Top-level IVR Pilot configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub telephony: Option<TelephonyConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<FlowConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Public host (e.g. "ivr.example.com") used in the media stream URL.
    /// Falls back to the request's Host header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    #[serde(default = "default_media_path")]
    pub media_path: String,
}

/// Routes served by the gateway besides the media stream.
const RESERVED_PATHS: &[&str] = &["/", "/voice", "/status", "/health", "/metrics"];

fn default_media_path() -> String {
    "/media".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: None,
            bind: None,
            public_url: None,
            media_path: default_media_path(),
        }
    }
}

/// What to do with the step pointer when a digit send fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailurePolicy {
    /// Keep the advanced pointer.
    #[default]
    Advance,
    /// Move back to the step that issued the send, so its prompt can match again.
    Rewind,
}

/// Telephony provider (call control + call origination) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelephonyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_sid: Option<String>,

    #[serde(default = "default_account_sid_env")]
    pub account_sid_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: Option<String>,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Destination dialed alongside the media stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dial_number: Option<String>,

    #[serde(default = "default_dial_number_env")]
    pub dial_number_env: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub on_send_failure: SendFailurePolicy,
}

fn default_account_sid_env() -> Option<String> {
    Some("TWILIO_ACCOUNT_SID".into())
}

fn default_auth_token_env() -> Option<String> {
    Some("TWILIO_AUTH_TOKEN".into())
}

fn default_dial_number_env() -> Option<String> {
    Some("DIAL_NUMBER".into())
}

fn default_api_base_url() -> String {
    "https://api.twilio.com".into()
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            account_sid: None,
            account_sid_env: default_account_sid_env(),
            auth_token: None,
            auth_token_env: default_auth_token_env(),
            api_base_url: default_api_base_url(),
            dial_number: None,
            dial_number_env: default_dial_number_env(),
            request_timeout_secs: default_request_timeout(),
            on_send_failure: SendFailurePolicy::default(),
        }
    }
}

impl TelephonyConfig {
    pub fn resolve_account_sid(&self) -> Option<String> {
        resolve_secret_field(&self.account_sid, &self.account_sid_env)
    }

    pub fn resolve_auth_token(&self) -> Option<String> {
        resolve_secret_field(&self.auth_token, &self.auth_token_env)
    }

    pub fn resolve_dial_number(&self) -> Option<String> {
        resolve_secret_field(&self.dial_number, &self.dial_number_env)
    }
}

/// Streaming speech-to-text configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: only "deepgram" is supported.
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_transcription_key_env")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_transcription_url")]
    pub url: String,

    /// Model name; telephony-tuned by default.
    #[serde(default = "default_transcription_model")]
    pub model: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_true")]
    pub punctuate: bool,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds between keepalive messages; 0 disables them.
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

fn default_transcription_provider() -> String {
    "deepgram".into()
}

fn default_transcription_key_env() -> Option<String> {
    Some("DEEPGRAM_API_KEY".into())
}

fn default_transcription_url() -> String {
    "wss://api.deepgram.com/v1/listen".into()
}

fn default_transcription_model() -> String {
    "nova-2-phonecall".into()
}

fn default_language() -> String {
    "en-US".into()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_keepalive() -> u64 {
    8
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            api_key: None,
            api_key_env: default_transcription_key_env(),
            url: default_transcription_url(),
            model: default_transcription_model(),
            language: default_language(),
            punctuate: true,
            connect_timeout_secs: default_connect_timeout(),
            keepalive_secs: default_keepalive(),
        }
    }
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "ivr_pilot_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(IvrError::Io)?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw);
        json5::from_str(&substituted).map_err(|e| IvrError::Config(e.to_string()))
    }

    /// Default config file path.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Listen port: config, then the `PORT` env var, then 3000.
    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .and_then(|g| g.port)
            .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
            .unwrap_or(3000)
    }

    pub fn gateway_bind(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    pub fn media_path(&self) -> String {
        self.gateway
            .as_ref()
            .map(|g| g.media_path.clone())
            .unwrap_or_else(default_media_path)
    }

    pub fn telephony(&self) -> TelephonyConfig {
        self.telephony.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Configured steps, or the built-in flow when none are configured.
    pub fn flow_steps(&self) -> Vec<StepConfig> {
        match &self.flow {
            Some(flow) if !flow.steps.is_empty() => flow.steps.clone(),
            _ => default_steps(),
        }
    }

    /// Build and validate the flow definition.
    pub fn flow_definition(&self) -> Result<FlowDefinition, FlowError> {
        FlowDefinition::from_steps(self.flow_steps())
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "transcription.model").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let transcription = self.transcription();
        if transcription.provider != "deepgram" {
            errors.push(format!(
                "Unknown transcription provider '{}'",
                transcription.provider
            ));
        }
        if transcription.resolve_api_key().is_none() {
            warnings.push("Transcription has no API key configured".to_string());
        }

        let telephony = self.telephony();
        if telephony.resolve_account_sid().is_none() || telephony.resolve_auth_token().is_none() {
            warnings.push("Telephony account SID or auth token not configured".to_string());
        }
        if telephony.resolve_dial_number().is_none() {
            warnings.push("No dial number configured; /voice will only stream".to_string());
        }

        if let Some(gw) = &self.gateway {
            if gw.port == Some(0) {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if !gw.media_path.starts_with('/') {
                errors.push(format!("Media path must start with '/': {}", gw.media_path));
            } else if RESERVED_PATHS.contains(&gw.media_path.as_str()) {
                errors.push(format!("Media path {} collides with a built-in route", gw.media_path));
            }
        }

        if let Some(flow) = &self.flow {
            if flow.steps.is_empty() {
                warnings.push("Flow section has no steps; using the built-in flow".to_string());
            }
        }
        if let Err(e) = self.flow_definition() {
            errors.push(format!("Invalid flow: {e}"));
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for IVR Pilot data: `~/.ivr_pilot/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ivr_pilot")
}
