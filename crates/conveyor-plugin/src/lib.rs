//! Plugin authoring helpers for Conveyor.
//!
//! Everything a reader or writer implementation needs, without pulling in
//! the scheduler and container types.

pub use conveyor::{
    COLUMN_HEAD, ChannelError, Column, ColumnType, ColumnValue, Parameters, ParametersExt,
    PluginError, PluginRegistry, RECORD_HEAD, Reader, ReaderFactory, Record, RecordError,
    RecordReceiver, RecordSender, TaskContext, Writer, WriterFactory,
};
pub use serde_json::Value;

/// Register a plugin that is both a reader and a writer factory.
pub fn register_both<F>(registry: &mut PluginRegistry, factory: F)
where
    F: ReaderFactory + WriterFactory + Clone + 'static,
{
    registry.register_reader(factory.clone());
    registry.register_writer(factory);
}
