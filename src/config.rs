//! Runtime configuration
//!
//! Read from the process environment; binaries load `.env` first.
//!
//! - OPENAI_API_KEY: chat-completions key (unset → offline analyst)
//! - OPENAI_BASE_URL: endpoint base (default https://api.openai.com/v1)
//! - ESG_MODEL: model id used by both agents (default gpt-4o)
//! - ESG_AGENT_TEMPERATURE / ESG_REVIEWER_TEMPERATURE
//! - ESG_MAX_ITERATIONS / ESG_MAX_REVISIONS
//! - ESG_REQUEST_TIMEOUT_SECS, ESG_CONCURRENCY
//! - PORT or API_PORT: HTTP port for the API server

use crate::error::OrchestrationError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_ITERATIONS: u32 = 15;
pub const DEFAULT_MAX_REVISIONS: u32 = 3;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub agent_temperature: f32,
    pub reviewer_temperature: f32,
    pub max_iterations: u32,
    pub max_revisions: u32,
    pub request_timeout: Duration,
    pub concurrency: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            agent_temperature: 0.2,
            reviewer_temperature: 0.0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_revisions: DEFAULT_MAX_REVISIONS,
            request_timeout: Duration::from_secs(90),
            concurrency: 4,
            port: 8080,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparseable values fail fast.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let config = Self {
            api_key: get("OPENAI_API_KEY"),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            model: get("ESG_MODEL").unwrap_or(defaults.model),
            agent_temperature: parse_or(get("ESG_AGENT_TEMPERATURE"), "ESG_AGENT_TEMPERATURE", defaults.agent_temperature)?,
            reviewer_temperature: parse_or(get("ESG_REVIEWER_TEMPERATURE"), "ESG_REVIEWER_TEMPERATURE", defaults.reviewer_temperature)?,
            max_iterations: parse_or(get("ESG_MAX_ITERATIONS"), "ESG_MAX_ITERATIONS", defaults.max_iterations)?,
            max_revisions: parse_or(get("ESG_MAX_REVISIONS"), "ESG_MAX_REVISIONS", defaults.max_revisions)?,
            request_timeout: Duration::from_secs(parse_or(
                get("ESG_REQUEST_TIMEOUT_SECS"),
                "ESG_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            concurrency: parse_or(get("ESG_CONCURRENCY"), "ESG_CONCURRENCY", defaults.concurrency)?,
            port: parse_or(get("PORT").or_else(|| get("API_PORT")), "PORT", defaults.port)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(OrchestrationError::Config(
                "ESG_MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }
        if self.concurrency == 0 {
            return Err(OrchestrationError::Config(
                "ESG_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(OrchestrationError::Config(
                "ESG_REQUEST_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| {
            OrchestrationError::Config(format!("{} has invalid value '{}'", key, value))
        }),
    }
}
