use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs::File, io::BufReader, path::Path, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to open config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Nested subtag calls (and nested tag runs) allowed before the execution aborts.
    #[serde(default = "default_max_stack_depth")]
    pub max_stack_depth: usize,

    /// Steps between cooperative yields to the scheduler.
    #[serde(default = "default_yield_interval")]
    pub yield_interval: u64,

    #[serde(default = "default_cooldown", with = "duration_ms")]
    pub default_cooldown: Duration,

    #[serde(default = "default_lock_timeout", with = "duration_ms")]
    pub lock_timeout: Duration,

    /// Shown in place of any internal failure.
    #[serde(default = "default_internal_error_message")]
    pub internal_error_message: String,

    #[serde(default)]
    pub limits: LimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitConfig {
    #[serde(default = "default_tag_loops")]
    pub tag_loops: u32,

    #[serde(default = "default_custom_command_loops")]
    pub custom_command_loops: u32,

    /// Per-execution invocation caps keyed by subtag name.
    #[serde(default)]
    pub subtag_quotas: HashMap<String, u32>,

    #[serde(default)]
    pub disabled_subtags: Vec<String>,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            tag_loops: default_tag_loops(),
            custom_command_loops: default_custom_command_loops(),
            subtag_quotas: HashMap::new(),
            disabled_subtags: Vec::new(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: default_max_stack_depth(),
            yield_interval: default_yield_interval(),
            default_cooldown: default_cooldown(),
            lock_timeout: default_lock_timeout(),
            internal_error_message: default_internal_error_message(),
            limits: LimitConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        from_file(path)
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        from_str(s)
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, ConfigError> {
    let config = serde_json::from_str(s)?;
    Ok(config)
}

fn default_max_stack_depth() -> usize {
    200
}
fn default_yield_interval() -> u64 {
    1000
}
fn default_cooldown() -> Duration {
    Duration::ZERO
}
fn default_lock_timeout() -> Duration {
    Duration::from_secs(10)
}
fn default_internal_error_message() -> String {
    "An internal server error has occurred".to_string()
}
fn default_tag_loops() -> u32 {
    1500
}
fn default_custom_command_loops() -> u32 {
    5000
}

pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
