//! Conveyor: execution core for reader-to-writer data synchronization
//!
//! A job is split into task groups; each group runs reader/writer task pairs
//! connected by bounded in-memory channels. The scheduler starts every group
//! on its own worker, supervises them through a communicator, and maps the
//! aggregate state onto SUCCEEDED, FAILED or KILLED.

mod cancel;
mod channel;
mod column;
mod communicator;
mod config;
mod container;
mod error;
mod exchanger;
mod plugin;
mod record;
mod registry;
mod runner;
mod scheduler;

pub use cancel::CancellationToken;
pub use channel::{Channel, ChannelConfig, ChannelError, ChannelStats};
pub use column::{Column, ColumnType, ColumnValue};
pub use communicator::{
    Communicator, GroupReport, GroupStats, InProcessCommunicator, JobSnapshot, State,
};
pub use config::{
    ConfigError, JobConfig, PluginSpec, TaskConfig, TaskGroupConfig, validate_task_groups,
};
pub use container::{ContainerOutcome, ContainerResult, TaskGroupContainer};
pub use error::{ErrorKind, FAILED_EXIT_CODE, Half, JobError, KILLED_EXIT_CODE, TaskError};
pub use exchanger::{RecordReceiver, RecordSender};
pub use plugin::{
    Parameters, ParametersExt, PluginError, Reader, ReaderFactory, TaskContext, Writer,
    WriterFactory,
};
pub use record::{COLUMN_HEAD, RECORD_HEAD, Record, RecordError};
pub use registry::PluginRegistry;
pub use runner::TaskGroupContainerRunner;
pub use scheduler::{JobReport, KillSwitch, ProcessInnerScheduler, Scheduler};
