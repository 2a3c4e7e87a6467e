//! Job configuration.
//!
//! A job is an already-partitioned list of task groups. Partitioning and
//! multi-source merging happen before this point; the core only validates
//! and runs what it is given.

use crate::channel::ChannelConfig;
use crate::plugin::Parameters;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Top-level job definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// How often the scheduler polls the communicator.
    #[serde(default = "default_interval_ms")]
    pub poll_interval_ms: u64,

    /// Task groups, each run by one scheduler worker.
    pub task_groups: Vec<TaskGroupConfig>,
}

/// One task group: a fixed set of tasks plus its execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroupConfig {
    pub id: u32,

    /// Maximum tasks of this group running at once. Defaults to all of them.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Number of failed tasks at which the whole group fails.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: usize,

    /// Extra attempts for a failed task before it counts as an error.
    #[serde(default)]
    pub max_task_retries: u32,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Cadence of communicator reports.
    #[serde(default = "default_interval_ms")]
    pub report_interval_ms: u64,

    #[serde(default)]
    pub channel: ChannelConfig,

    pub tasks: Vec<TaskConfig>,
}

/// A reader/writer pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub id: u32,
    pub reader: PluginSpec,
    pub writer: PluginSpec,
}

/// Plugin name plus its parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(default)]
    pub parameters: Parameters,
}

fn default_interval_ms() -> u64 {
    100
}

fn default_error_threshold() -> usize {
    1
}

fn default_retry_interval_ms() -> u64 {
    1000
}

impl PluginSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }
}

impl TaskConfig {
    pub fn new(id: u32, reader: PluginSpec, writer: PluginSpec) -> Self {
        Self { id, reader, writer }
    }
}

impl TaskGroupConfig {
    /// A group with default policy and no tasks.
    pub fn new(id: u32) -> Self {
        Self {
            id,
            concurrency: None,
            error_threshold: default_error_threshold(),
            max_task_retries: 0,
            retry_interval_ms: default_retry_interval_ms(),
            report_interval_ms: default_interval_ms(),
            channel: ChannelConfig::default(),
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, task: TaskConfig) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = Some(n);
        self
    }

    pub fn error_threshold(mut self, n: usize) -> Self {
        self.error_threshold = n;
        self
    }

    pub fn retries(mut self, max: u32, interval: Duration) -> Self {
        self.max_task_retries = max;
        self.retry_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn report_interval(mut self, interval: Duration) -> Self {
        self.report_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Effective concurrent task limit.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency
            .unwrap_or(self.tasks.len())
            .clamp(1, self.tasks.len().max(1))
    }

    pub fn report_interval_duration(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    /// Check the group on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.error_threshold == 0 {
            return Err(ConfigError::Invalid(format!(
                "task group {}: error_threshold must be at least 1",
                self.id
            )));
        }
        if self.channel.capacity == 0 || self.channel.byte_capacity == 0 {
            return Err(ConfigError::Invalid(format!(
                "task group {}: channel capacities must be non-zero",
                self.id
            )));
        }
        if self.concurrency == Some(0) {
            return Err(ConfigError::Invalid(format!(
                "task group {}: concurrency must be at least 1",
                self.id
            )));
        }
        let mut seen = HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id) {
                return Err(ConfigError::DuplicateTask {
                    group: self.id,
                    task: task.id,
                });
            }
        }
        Ok(())
    }
}

/// Check a list of groups as a whole: non-empty, unique ids, each valid.
pub fn validate_task_groups(groups: &[TaskGroupConfig]) -> Result<(), ConfigError> {
    if groups.is_empty() {
        return Err(ConfigError::Empty);
    }
    let mut seen = HashSet::new();
    for group in groups {
        if !seen.insert(group.id) {
            return Err(ConfigError::DuplicateTaskGroup(group.id));
        }
        group.validate()?;
    }
    Ok(())
}

impl JobConfig {
    pub fn new(task_groups: Vec<TaskGroupConfig>) -> Self {
        Self {
            poll_interval_ms: default_interval_ms(),
            task_groups,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_task_groups(&self.task_groups)
    }

    /// Total number of tasks across all groups.
    pub fn task_count(&self) -> usize {
        self.task_groups.iter().map(|g| g.tasks.len()).sum()
    }

    /// Parse a job from bytes, picking the format from the path extension.
    ///
    /// Defaults to YAML when no path or extension is available.
    pub fn from_bytes(data: &[u8], path: Option<&str>) -> Result<Self, ConfigError> {
        let format = path
            .and_then(detect_format)
            .unwrap_or_else(|| "yaml".to_string());

        Self::from_bytes_format(data, &format)
    }

    /// Parse a job from bytes with an explicit format.
    pub fn from_bytes_format(data: &[u8], format: &str) -> Result<Self, ConfigError> {
        match format {
            "json" => serde_json::from_slice(data).map_err(|e| ConfigError::Parse(e.to_string())),
            "yaml" | "yml" => {
                serde_yaml::from_slice(data).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            "toml" => {
                let s = std::str::from_utf8(data)
                    .map_err(|e| ConfigError::Parse(format!("Invalid UTF-8: {}", e)))?;
                toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            _ => Err(ConfigError::Parse(format!(
                "Unsupported job format: {}",
                format
            ))),
        }
    }

    /// Serialize the job to bytes.
    pub fn to_bytes(&self, format: &str) -> Result<Vec<u8>, ConfigError> {
        match format {
            "json" => {
                serde_json::to_vec_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
            }
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map(String::into_bytes)
                .map_err(|e| ConfigError::Parse(e.to_string())),
            "toml" => toml::to_string_pretty(self)
                .map(String::into_bytes)
                .map_err(|e| ConfigError::Parse(e.to_string())),
            _ => Err(ConfigError::Parse(format!(
                "Unsupported job format: {}",
                format
            ))),
        }
    }
}

/// Errors in job configuration. All are raised before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse job: {0}")]
    Parse(String),

    #[error("job has no task groups")]
    Empty,

    #[error("duplicate task group id {0}")]
    DuplicateTaskGroup(u32),

    #[error("duplicate task id {task} in task group {group}")]
    DuplicateTask { group: u32, task: u32 },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown reader plugin '{0}'")]
    UnknownReader(String),

    #[error("unknown writer plugin '{0}'")]
    UnknownWriter(String),
}

fn detect_format(path: &str) -> Option<String> {
    let ext = path.rsplit('.').next()?;
    match ext.to_lowercase().as_str() {
        "json" => Some("json".into()),
        "yaml" | "yml" => Some("yaml".into()),
        "toml" => Some("toml".into()),
        _ => None,
    }
}
