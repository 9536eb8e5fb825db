//! Worker configuration from environment variables

use anyhow::{Context, Result};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::analysis::SecurityPolicy;

pub const DEFAULT_PYTHON_BIN: &str = "python3";
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 512;
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;
pub const DEFAULT_EXERCISE_STORE: &str = "dir:./exercises";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub python_bin: String,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub memory_limit_mb: u64,
    pub max_output_bytes: usize,
    pub policy: SecurityPolicy,
    /// `dir:<path>` or `s3:<prefix>`
    pub exercise_store: String,
    pub redis_url: String,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            python_bin: DEFAULT_PYTHON_BIN.to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_timeout_secs: DEFAULT_MAX_TIMEOUT_SECS,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            policy: SecurityPolicy::default(),
            exercise_store: DEFAULT_EXERCISE_STORE.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", name, raw)),
        Err(_) => Ok(default),
    }
}

impl GraderConfig {
    /// Read configuration from the environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let policy = match std::env::var("GRADER_POLICY_FILE") {
            Ok(path) => {
                let policy = load_policy(Path::new(&path))?;
                info!("Loaded security policy from {}", path);
                policy
            }
            Err(_) => defaults.policy,
        };

        let config = Self {
            python_bin: std::env::var("PYTHON_BIN").unwrap_or(defaults.python_bin),
            default_timeout_secs: env_or("GRADER_DEFAULT_TIMEOUT_SECS", defaults.default_timeout_secs)?,
            max_timeout_secs: env_or("GRADER_MAX_TIMEOUT_SECS", defaults.max_timeout_secs)?.max(1),
            memory_limit_mb: env_or("GRADER_MEMORY_LIMIT_MB", defaults.memory_limit_mb)?,
            max_output_bytes: env_or("GRADER_MAX_OUTPUT_BYTES", defaults.max_output_bytes)?,
            policy,
            exercise_store: std::env::var("EXERCISE_STORE").unwrap_or(defaults.exercise_store),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
        };
        Ok(config)
    }

    /// Caller timeout clamped to `[1, max_timeout_secs]`; `None` means the default
    pub fn clamp_timeout(&self, requested: Option<f64>) -> Duration {
        let max = self.max_timeout_secs as f64;
        let secs = requested
            .filter(|s| s.is_finite())
            .unwrap_or(self.default_timeout_secs as f64)
            .clamp(1.0, max.max(1.0));
        Duration::from_secs_f64(secs)
    }
}

/// Parse a deployment policy file
///
/// ```toml
/// disallowed_imports = ["os", "subprocess"]
/// disallowed_calls = ["eval", "exec"]
/// ```
pub fn load_policy(path: &Path) -> Result<SecurityPolicy> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read policy file {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Failed to parse policy file {}", path.display()))
}
