use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `DRIPFORGE__` and TOML config files.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub sendgrid: SendGridConfig,
}

/// Tuning for the periodic dispatch tick.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum due messages claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound on a single provider call.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
}

/// Twilio SMS provider credentials and sender identity.
#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    #[serde(default)]
    pub account_sid: String,
    #[serde(default)]
    pub auth_token: String,
    #[serde(default = "default_from_number")]
    pub from_number: String,
    #[serde(default)]
    pub status_callback_url: Option<String>,
}

/// SendGrid email provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SendGridConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default = "default_true")]
    pub open_tracking: bool,
    #[serde(default = "default_true")]
    pub click_tracking: bool,
}

// Default functions
fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_batch_size() -> usize {
    50
}
fn default_tick_interval_secs() -> u64 {
    60
}
fn default_send_timeout_ms() -> u64 {
    5000
}
fn default_from_number() -> String {
    "+15550000000".to_string()
}
fn default_from_email() -> String {
    "hello@dripforge.io".to_string()
}
fn default_from_name() -> String {
    "DripForge".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            dispatch: DispatchConfig::default(),
            twilio: TwilioConfig::default(),
            sendgrid: SendGridConfig::default(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            tick_interval_secs: default_tick_interval_secs(),
            send_timeout_ms: default_send_timeout_ms(),
        }
    }
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: String::new(),
            auth_token: String::new(),
            from_number: default_from_number(),
            status_callback_url: None,
        }
    }
}

impl Default for SendGridConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            from_email: default_from_email(),
            from_name: default_from_name(),
            open_tracking: true,
            click_tracking: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("DRIPFORGE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }
}
