//! Task- and job-level errors, and how they map to exit codes.

use crate::config::ConfigError;
use crate::plugin::PluginError;
use std::fmt;
use std::sync::Arc;

/// Exit code for a job stopped by a kill request.
pub const KILLED_EXIT_CODE: i32 = 143;

/// Exit code for every other job failure.
pub const FAILED_EXIT_CODE: i32 = 1;

/// Which half of a task an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Half {
    Reader,
    Writer,
}

impl fmt::Display for Half {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Half::Reader => f.write_str("reader"),
            Half::Writer => f.write_str("writer"),
        }
    }
}

/// Failure of a single task, or of the container running it.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task {task} {half} failed: {source}")]
    Plugin {
        task: u32,
        half: Half,
        #[source]
        source: PluginError,
    },

    #[error("task {task} {half} panicked: {message}")]
    Panicked {
        task: u32,
        half: Half,
        message: String,
    },

    #[error("failed to spawn {half} thread for task {task}: {source}")]
    Spawn {
        task: u32,
        half: Half,
        #[source]
        source: std::io::Error,
    },

    #[error("task group container panicked: {0}")]
    ContainerPanicked(String),
}

impl TaskError {
    /// True when the error only reflects the channel being torn down.
    pub fn is_abort(&self) -> bool {
        matches!(self, TaskError::Plugin { source, .. } if source.is_abort())
    }

    /// Resource errors fail the group regardless of its threshold.
    pub fn is_resource(&self) -> bool {
        matches!(self, TaskError::Spawn { .. })
    }
}

/// Stable error classification for reporting layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Argument,
    Config,
    PluginRuntime,
    Resource,
    Killed,
}

impl ErrorKind {
    /// Short code for logs and user-facing reports.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Argument => "Conveyor-01",
            ErrorKind::Config => "Conveyor-03",
            ErrorKind::PluginRuntime => "Conveyor-13",
            ErrorKind::Resource => "Conveyor-14",
            ErrorKind::Killed => "Conveyor-143",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorKind::Argument => "invalid argument",
            ErrorKind::Config => "invalid job configuration",
            ErrorKind::PluginRuntime => "plugin runtime error",
            ErrorKind::Resource => "resource exhausted",
            ErrorKind::Killed => "job killed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.description())
    }
}

/// Terminal, job-level failure.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("task group {group} failed: {cause}")]
    PluginRuntime {
        group: u32,
        #[source]
        cause: Arc<TaskError>,
    },

    #[error("job killed")]
    Killed,

    #[error("resource exhausted: {0}")]
    Resource(String),

    #[error("scheduler has already started its task groups")]
    AlreadyStarted,
}

impl JobError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JobError::Config(_) => ErrorKind::Config,
            JobError::PluginRuntime { cause, .. } if cause.is_resource() => ErrorKind::Resource,
            JobError::PluginRuntime { .. } => ErrorKind::PluginRuntime,
            JobError::Killed => ErrorKind::Killed,
            JobError::Resource(_) => ErrorKind::Resource,
            JobError::AlreadyStarted => ErrorKind::Argument,
        }
    }

    /// Process exit code; a kill is distinct from every other failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            JobError::Killed => KILLED_EXIT_CODE,
            _ => FAILED_EXIT_CODE,
        }
    }
}
