use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dirs::home_dir;

use crate::error::{Error, Result};

pub const DEFAULT_YOUTUBE_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_PERSONA: &str = "You are the streamer's assistant and take part in the live \
chat on their behalf. Answer in the language of the chat with exactly one short, friendly sentence.";

/// Settings for one run, built once at startup and passed down by reference.
#[derive(Debug, Clone)]
pub struct Config {
    pub youtube_api_key: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_base_url: String,
    pub youtube_base_url: String,
    /// Holds `secret.json` and `token.json`.
    pub home: PathBuf,
    pub poll_interval: Duration,
    pub max_reply_tokens: u32,
    pub persona: String,
    pub redirect_port: u16,
    pub request_timeout: Duration,
    pub max_transcript: usize,
    pub max_consecutive_failures: u32,
    pub auth_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| Error::Configuration(format!("{} is not set", key)))
        };

        let home = match get("YTCHATBOT_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let mut path = home_dir().ok_or_else(|| {
                    Error::Configuration("could not find home directory".to_string())
                })?;
                path.push(".ytchatbot");
                path
            }
        };

        Ok(Config {
            youtube_api_key: required("YOUTUBE_DATA_API_KEY")?,
            openai_api_key: required("OPENAI_API_KEY")?,
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openai_base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            youtube_base_url: get("YOUTUBE_API_BASE_URL")
                .unwrap_or_else(|| DEFAULT_YOUTUBE_BASE_URL.to_string()),
            home,
            poll_interval: Duration::from_secs(parse_or(
                get("YTCHATBOT_POLL_INTERVAL_SECS"),
                "YTCHATBOT_POLL_INTERVAL_SECS",
                5,
            )?),
            max_reply_tokens: parse_or(
                get("YTCHATBOT_MAX_REPLY_TOKENS"),
                "YTCHATBOT_MAX_REPLY_TOKENS",
                60,
            )?,
            persona: get("YTCHATBOT_PERSONA").unwrap_or_else(|| DEFAULT_PERSONA.to_string()),
            redirect_port: parse_or(get("YTCHATBOT_REDIRECT_PORT"), "YTCHATBOT_REDIRECT_PORT", 8080)?,
            request_timeout: Duration::from_secs(parse_or(
                get("YTCHATBOT_REQUEST_TIMEOUT_SECS"),
                "YTCHATBOT_REQUEST_TIMEOUT_SECS",
                30,
            )?),
            max_transcript: parse_or(get("YTCHATBOT_MAX_TRANSCRIPT"), "YTCHATBOT_MAX_TRANSCRIPT", 200)?,
            max_consecutive_failures: parse_or(
                get("YTCHATBOT_MAX_FAILURES"),
                "YTCHATBOT_MAX_FAILURES",
                3,
            )?,
            auth_timeout: Duration::from_secs(parse_or(
                get("YTCHATBOT_AUTH_TIMEOUT_SECS"),
                "YTCHATBOT_AUTH_TIMEOUT_SECS",
                120,
            )?),
        })
    }

    pub fn token_path(&self) -> PathBuf {
        self.home.join("token.json")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.home.join("secret.json")
    }

    pub fn redirect_url(&self) -> String {
        format!("http://localhost:{}", self.redirect_port)
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Configuration(format!("{} has an invalid value: {:?}", key, raw))),
    }
}
