use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use roundtable_core::RetryPolicy;
use roundtable_mcp::{HeaderMap, HeaderName, HeaderValue, ServerConfig, Url};
use roundtable_openai_model::{DEFAULT_BASE_URL, DEFAULT_MODEL};

/// The question asked when no task is given.
pub const DEFAULT_TASK: &str = "Whats the weather of Texas?";

/// Configuration that cannot be used.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// No model credential was supplied.
    #[error("no API key given, set GEMINI_API_KEY or pass --api-key")]
    MissingApiKey,
    /// The tool server URL does not parse.
    #[error("invalid tool server URL `{url}`: {reason}")]
    InvalidUrl {
        /// The rejected input.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A `--header` value is not a valid HTTP header.
    #[error("invalid header `{0}`")]
    InvalidHeader(String),
    /// A timeout of zero seconds.
    #[error("`{0}` must be at least one second")]
    ZeroTimeout(&'static str),
    /// The termination sentinel is empty.
    #[error("the sentinel must not be empty")]
    EmptySentinel,
}

/// Command line arguments, with environment fallbacks.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "roundtable",
    version,
    about = "Runs a tool-augmented conversation between a model and you"
)]
pub struct Args {
    /// Chat completion model name
    #[arg(long, env = "ROUNDTABLE_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Model API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint
    #[arg(long, env = "ROUNDTABLE_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Event stream URL of the MCP tool server
    #[arg(
        long,
        env = "ROUNDTABLE_SERVER_URL",
        default_value = "http://127.0.0.1:8000/sse"
    )]
    pub server_url: String,

    /// Header sent to the tool server, as KEY=VALUE (repeatable)
    #[arg(
        long = "header",
        value_name = "KEY=VALUE",
        value_parser = parse_key_value,
        default_value = "Content-Type=application/json"
    )]
    pub headers: Vec<(String, String)>,

    /// Tool server timeout, for discovery and for each tool call
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Timeout of a single model request
    #[arg(long, default_value_t = 60)]
    pub model_timeout_secs: u64,

    /// Text that ends the conversation when a message mentions it
    #[arg(long, default_value = "TERMINATE")]
    pub sentinel: String,

    /// Retries of a rate-limited model request
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Stop after this many messages
    #[arg(long)]
    pub max_messages: Option<usize>,

    /// Also write debug logs to this file
    #[arg(long, env = "ROUNDTABLE_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// The task that opens the conversation
    #[arg(default_value = DEFAULT_TASK)]
    pub task: String,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    Ok((key.trim().to_owned(), value.trim().to_owned()))
}

impl Args {
    /// Loads `.env` if present, then parses the process arguments.
    pub fn load() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            if !err.not_found() {
                eprintln!("ignoring .env: {err}");
            }
        }
        Self::parse()
    }

    /// Validates the arguments.
    ///
    /// Only looks at the values, nothing is connected to.
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let api_key = self
            .api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let url = Url::parse(&self.server_url).map_err(|err| {
            ConfigError::InvalidUrl {
                url: self.server_url.clone(),
                reason: err.to_string(),
            }
        })?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (key, value) in &self.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| ConfigError::InvalidHeader(key.clone()))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::InvalidHeader(key.clone()))?;
            headers.append(name, value);
        }

        if self.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("--timeout-secs"));
        }
        if self.model_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("--model-timeout-secs"));
        }
        if self.sentinel.is_empty() {
            return Err(ConfigError::EmptySentinel);
        }

        Ok(Config {
            model: self.model,
            api_key,
            base_url: self.base_url,
            server: ServerConfig::new(url)
                .with_headers(headers)
                .with_timeout(Duration::from_secs(self.timeout_secs)),
            model_timeout: Duration::from_secs(self.model_timeout_secs),
            retry_policy: RetryPolicy::default()
                .with_max_attempts(self.max_retries.saturating_add(1)),
            sentinel: self.sentinel,
            max_messages: self.max_messages,
            log_file: self.log_file,
            task: self.task,
        })
    }
}

/// A validated configuration.
#[derive(Clone)]
pub struct Config {
    /// Chat completion model name.
    pub model: String,
    /// Model API key.
    pub api_key: String,
    /// Base URL of the model endpoint.
    pub base_url: String,
    /// How to reach the tool server.
    pub server: ServerConfig,
    /// Timeout of a single model request.
    pub model_timeout: Duration,
    /// Retries of rate-limited model requests.
    pub retry_policy: RetryPolicy,
    /// Text that ends the conversation.
    pub sentinel: String,
    /// Optional bound on the transcript length.
    pub max_messages: Option<usize>,
    /// Optional debug log file.
    pub log_file: Option<PathBuf>,
    /// The opening task.
    pub task: String,
}
