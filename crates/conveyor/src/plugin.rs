//! Reader and writer plugin traits.
//!
//! The core never reasons about connector semantics: a reader populates
//! records and sends them, a writer receives and consumes them. Concrete
//! implementations are created per task attempt by factories that live in
//! the [`PluginRegistry`](crate::PluginRegistry).

use crate::channel::ChannelError;
use crate::exchanger::{RecordReceiver, RecordSender};
use indexmap::IndexMap;
use serde_json::Value;

/// Free-form plugin configuration.
pub type Parameters = IndexMap<String, Value>;

/// Extension trait for reading typed plugin parameters.
pub trait ParametersExt {
    fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self;
    fn get_u64(&self, key: &str) -> Result<Option<u64>, PluginError>;
    fn get_bool(&self, key: &str) -> Result<Option<bool>, PluginError>;
    fn get_str(&self, key: &str) -> Result<Option<&str>, PluginError>;
}

impl ParametersExt for Parameters {
    fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key.into(), value.into());
        self
    }

    fn get_u64(&self, key: &str) -> Result<Option<u64>, PluginError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(Some)
                .ok_or_else(|| PluginError::invalid(key, "expected a non-negative integer")),
        }
    }

    fn get_bool(&self, key: &str) -> Result<Option<bool>, PluginError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| PluginError::invalid(key, "expected a boolean")),
        }
    }

    fn get_str(&self, key: &str) -> Result<Option<&str>, PluginError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| PluginError::invalid(key, "expected a string")),
        }
    }
}

/// Identifies the task attempt a plugin instance is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskContext {
    pub group_id: u32,
    pub task_id: u32,
    /// Zero for the first run, incremented on each retry.
    pub attempt: u32,
}

/// Reader half of a task.
pub trait Reader: Send {
    /// Produce every record of this task through `sender`.
    ///
    /// Returning `Ok` means the stream is complete; the container flushes and
    /// closes the channel afterwards.
    fn start_read(&mut self, sender: &mut RecordSender) -> Result<(), PluginError>;
}

/// Writer half of a task.
pub trait Writer: Send {
    /// Consume records from `receiver` until it reports end of stream.
    fn start_write(&mut self, receiver: &mut RecordReceiver) -> Result<(), PluginError>;
}

/// Creates reader instances for a named plugin.
pub trait ReaderFactory: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn create(&self, ctx: &TaskContext, params: &Parameters)
    -> Result<Box<dyn Reader>, PluginError>;
}

/// Creates writer instances for a named plugin.
pub trait WriterFactory: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn create(&self, ctx: &TaskContext, params: &Parameters)
    -> Result<Box<dyn Writer>, PluginError>;
}

/// Errors raised by plugins.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin failed: {0}")]
    Failed(String),

    #[error("invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl PluginError {
    pub fn failed(msg: impl Into<String>) -> Self {
        PluginError::Failed(msg.into())
    }

    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        PluginError::InvalidParameter {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// True when the error only reflects the channel being torn down.
    pub fn is_abort(&self) -> bool {
        matches!(self, PluginError::Channel(ChannelError::Aborted))
    }
}
