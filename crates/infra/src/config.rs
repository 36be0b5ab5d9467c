//! Configuration loading and representation.
//!
//! Every knob is read from a `PHONESCAN_*` environment variable; anything
//! unset keeps its [`Settings::default`] value.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::worker::{RetryPolicy, WorkerConfig};

const ENV_PREFIX: &str = "PHONESCAN_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: `{value}` ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Inconsistent(String),
}

/// Which queue/store implementation to run against.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Process-local; state is lost on restart.
    Memory,
    Redis,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Backend::Memory),
            "redis" => Ok(Backend::Redis),
            _ => Err("expected `memory` or `redis`".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub backend: Backend,
    pub redis_url: String,
    /// Key of the pending-id list; the delayed and processing sets derive from it.
    pub input_queue: String,
    /// Prefix of the per-task record keys (`{prefix}:{task_id}`).
    pub output_prefix: String,
    pub result_ttl: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    /// Bound on each outbound call: download, recognition, webhook.
    pub request_timeout: Duration,
    /// How long one dequeue waits before the worker loops again.
    pub poll_interval: Duration,
    /// How long a claimed task may stay in flight before it is handed out again.
    pub lease_timeout: Duration,
    /// Run the worker inside the API process. With a shared Redis queue only
    /// one worker (embedded or standalone) consumes at a time; the rest stand by.
    pub run_worker: bool,
    pub recognizer_url: String,
    pub min_confidence: f64,
    pub max_image_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            backend: Backend::Memory,
            redis_url: "redis://localhost:6379/0".to_string(),
            input_queue: "ocr:input".to_string(),
            output_prefix: "ocr:output".to_string(),
            result_ttl: Duration::from_secs(3600),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(60_000),
            request_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
            lease_timeout: Duration::from_secs(300),
            run_worker: true,
            recognizer_url: "http://localhost:8868/recognize".to_string(),
            min_confidence: 0.3,
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (full variable names, prefix included).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut s = Settings::default();

        env.parse("BIND_ADDR", &mut s.bind_addr)?;
        env.parse("BACKEND", &mut s.backend)?;
        env.string("REDIS_URL", &mut s.redis_url);
        env.string("INPUT_QUEUE", &mut s.input_queue);
        env.string("OUTPUT_PREFIX", &mut s.output_prefix);
        env.secs("RESULT_TTL_SECS", &mut s.result_ttl)?;
        env.parse("MAX_RETRIES", &mut s.max_retries)?;
        env.millis("RETRY_BASE_DELAY_MS", &mut s.retry_base_delay)?;
        env.millis("RETRY_MAX_DELAY_MS", &mut s.retry_max_delay)?;
        env.secs("REQUEST_TIMEOUT_SECS", &mut s.request_timeout)?;
        env.millis("POLL_INTERVAL_MS", &mut s.poll_interval)?;
        env.secs("LEASE_TIMEOUT_SECS", &mut s.lease_timeout)?;
        env.parse("RUN_WORKER", &mut s.run_worker)?;
        env.string("RECOGNIZER_URL", &mut s.recognizer_url);
        env.parse("MIN_CONFIDENCE", &mut s.min_confidence)?;
        env.parse("MAX_IMAGE_BYTES", &mut s.max_image_bytes)?;

        s.validate()?;
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("result_ttl", self.result_ttl),
            ("request_timeout", self.request_timeout),
            ("poll_interval", self.poll_interval),
            ("lease_timeout", self.lease_timeout),
        ];
        for (name, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::Inconsistent(format!("{name} must be positive")));
            }
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(ConfigError::Inconsistent(
                "retry base delay exceeds retry max delay".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::Inconsistent(
                "min_confidence must be within [0, 1]".to_string(),
            ));
        }
        if self.max_image_bytes == 0 {
            return Err(ConfigError::Inconsistent("max_image_bytes must be positive".to_string()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.max_retries, self.retry_base_delay, self.retry_max_delay)
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: self.poll_interval,
            consumer_ttl: self.lease_timeout,
            retry: self.retry_policy(),
            ..WorkerConfig::default()
        }
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<(String, String)> {
        let full = format!("{ENV_PREFIX}{key}");
        let value = (self.lookup)(&full)?;
        Some((full, value))
    }

    fn string(&self, key: &str, slot: &mut String) {
        if let Some((_, value)) = self.raw(key) {
            *slot = value;
        }
    }

    fn parse<T>(&self, key: &str, slot: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some((full, value)) = self.raw(key) {
            *slot = value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key: full,
                value: value.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn secs(&self, key: &str, slot: &mut Duration) -> Result<(), ConfigError> {
        let mut secs = slot.as_secs();
        self.parse(key, &mut secs)?;
        *slot = Duration::from_secs(secs);
        Ok(())
    }

    fn millis(&self, key: &str, slot: &mut Duration) -> Result<(), ConfigError> {
        let mut ms = slot.as_millis() as u64;
        self.parse(key, &mut ms)?;
        *slot = Duration::from_millis(ms);
        Ok(())
    }
}
