//! In-memory `stream` reader and writer for Conveyor.
//!
//! The `stream` reader generates records from constant column templates and
//! the `stream` writer consumes them, optionally printing each record. Both
//! are useful for smoke-testing jobs and measuring raw transport throughput.
//!
//! # Reader parameters
//! - `count` - records to emit per task (default 1)
//! - `columns` - list of `{ "type": ..., "value": ... }` templates. When
//!   absent, each record carries a single `long` column holding its sequence
//!   number.
//!
//! # Writer parameters
//! - `print` - write every record to stdout (default false)

use conveyor::{
    Column, ColumnType, Parameters, ParametersExt, PluginError, PluginRegistry, Reader,
    ReaderFactory, RecordReceiver, RecordSender, TaskContext, Writer, WriterFactory,
};
use serde_json::Value;
use std::io::Write;
use tracing::{debug, info};

/// Register the stream reader and writer with the registry.
pub fn register_all(registry: &mut PluginRegistry) {
    registry.register_reader(StreamReaderFactory);
    registry.register_writer(StreamWriterFactory);
}

// ============================================================================
// Reader
// ============================================================================

/// Creates [`StreamReader`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamReaderFactory;

impl ReaderFactory for StreamReaderFactory {
    fn name(&self) -> &str {
        "stream"
    }

    fn description(&self) -> &str {
        "Generates records from constant column templates"
    }

    fn create(&self, ctx: &TaskContext, params: &Parameters) -> Result<Box<dyn Reader>, PluginError> {
        let count = params.get_u64("count")?.unwrap_or(1);
        let columns = match params.get("columns") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| column_template(i, item))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Some(_) => return Err(PluginError::invalid("columns", "expected a list")),
        };
        debug!(
            group = ctx.group_id,
            task = ctx.task_id,
            count,
            "stream reader created"
        );
        Ok(Box::new(StreamReader { count, columns }))
    }
}

/// Parse one `{ "type", "value" }` template into a column.
fn column_template(index: usize, item: &Value) -> Result<Column, PluginError> {
    let key = format!("columns[{index}]");
    let Value::Object(fields) = item else {
        return Err(PluginError::invalid(key, "expected an object"));
    };
    let column_type: ColumnType = match fields.get("type") {
        Some(ty) => serde_json::from_value(ty.clone())
            .map_err(|e| PluginError::invalid(&key, format!("bad type: {e}")))?,
        None => return Err(PluginError::invalid(key, "missing 'type'")),
    };
    let value = fields.get("value").unwrap_or(&Value::Null);
    if value.is_null() {
        return Ok(Column::null(column_type));
    }

    let mismatch = || PluginError::invalid(&key, format!("value does not fit type {column_type}"));
    let column = match column_type {
        ColumnType::Long => Column::long(value.as_i64().ok_or_else(mismatch)?),
        ColumnType::Double => Column::double(value.as_f64().ok_or_else(mismatch)?),
        ColumnType::String => Column::string(value.as_str().ok_or_else(mismatch)?),
        ColumnType::Bool => Column::bool(value.as_bool().ok_or_else(mismatch)?),
        ColumnType::Date => Column::date(value.as_i64().ok_or_else(mismatch)?),
        ColumnType::Bytes => Column::bytes(value.as_str().ok_or_else(mismatch)?.as_bytes().to_vec()),
    };
    Ok(column)
}

/// Emits `count` copies of its column templates.
#[derive(Debug)]
pub struct StreamReader {
    count: u64,
    columns: Option<Vec<Column>>,
}

impl Reader for StreamReader {
    fn start_read(&mut self, sender: &mut RecordSender) -> Result<(), PluginError> {
        for seq in 0..self.count {
            let mut record = sender.create_record();
            match &self.columns {
                Some(columns) => {
                    for column in columns {
                        record.add_column(column.clone());
                    }
                }
                None => record.add_column(Column::long(seq as i64)),
            }
            sender.send_to_writer(record)?;
        }
        Ok(())
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Creates [`StreamWriter`]s printing to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamWriterFactory;

impl WriterFactory for StreamWriterFactory {
    fn name(&self) -> &str {
        "stream"
    }

    fn description(&self) -> &str {
        "Consumes records, optionally printing them to stdout"
    }

    fn create(&self, _ctx: &TaskContext, params: &Parameters) -> Result<Box<dyn Writer>, PluginError> {
        let print = params.get_bool("print")?.unwrap_or(false);
        let out: Option<Box<dyn Write + Send>> = if print {
            Some(Box::new(std::io::stdout()))
        } else {
            None
        };
        Ok(Box::new(StreamWriter::new(out)))
    }
}

/// Drains its receiver, optionally writing one line per record.
pub struct StreamWriter {
    out: Option<Box<dyn Write + Send>>,
    records: u64,
    bytes: u64,
}

impl StreamWriter {
    pub fn new(out: Option<Box<dyn Write + Send>>) -> Self {
        Self {
            out,
            records: 0,
            bytes: 0,
        }
    }

    /// Records consumed so far.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Writer for StreamWriter {
    fn start_write(&mut self, receiver: &mut RecordReceiver) -> Result<(), PluginError> {
        while let Some(record) = receiver.get_from_reader()? {
            if let Some(out) = self.out.as_mut() {
                writeln!(out, "{record}").map_err(|e| PluginError::Other(Box::new(e)))?;
            }
            self.records += 1;
            self.bytes += record.byte_size() as u64;
        }
        if let Some(out) = self.out.as_mut() {
            out.flush().map_err(|e| PluginError::Other(Box::new(e)))?;
        }
        info!(records = self.records, bytes = self.bytes, "stream writer finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conveyor::{CancellationToken, Channel, ChannelConfig};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn ctx() -> TaskContext {
        TaskContext {
            group_id: 0,
            task_id: 0,
            attempt: 0,
        }
    }

    /// Shared in-memory sink.
    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Run reader then writer on one thread through a roomy channel.
    fn pump(reader: &mut dyn Reader, writer: &mut StreamWriter) {
        let config = ChannelConfig::default();
        let token = CancellationToken::new();
        let channel = Channel::new(&config, &token);
        let mut sender = RecordSender::new(channel.clone(), &config, token);
        let mut receiver = RecordReceiver::new(channel, &config);
        reader.start_read(&mut sender).unwrap();
        sender.terminate().unwrap();
        writer.start_write(&mut receiver).unwrap();
    }

    #[test]
    fn test_register_all() {
        let mut registry = PluginRegistry::new();
        register_all(&mut registry);
        assert!(registry.reader("stream").is_some());
        assert!(registry.writer("stream").is_some());
    }

    #[test]
    fn test_templates_repeated() {
        let params = Parameters::new().with("count", 3).with(
            "columns",
            json!([
                {"type": "long", "value": 42},
                {"type": "string", "value": "héllo"},
                {"type": "bool", "value": null},
            ]),
        );
        let mut reader = StreamReaderFactory.create(&ctx(), &params).unwrap();
        let sink = Sink::default();
        let mut writer = StreamWriter::new(Some(Box::new(sink.clone())));

        pump(reader.as_mut(), &mut writer);

        assert_eq!(writer.records(), 3);
        // 8 for the long, 6 UTF-8 bytes for the string, 0 for the null.
        assert_eq!(writer.bytes(), 3 * 14);
        let text = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("héllo"));
    }

    #[test]
    fn test_default_sequence_column() {
        let params = Parameters::new().with("count", 5);
        let mut reader = StreamReaderFactory.create(&ctx(), &params).unwrap();
        let mut writer = StreamWriter::new(None);

        pump(reader.as_mut(), &mut writer);

        assert_eq!(writer.records(), 5);
        assert_eq!(writer.bytes(), 5 * 8);
    }

    #[test]
    fn test_bad_templates_rejected() {
        let cases = [
            json!("not a list"),
            json!([{"value": 1}]),
            json!([{"type": "decimal", "value": 1}]),
            json!([{"type": "long", "value": "x"}]),
        ];
        for columns in cases {
            let params = Parameters::new().with("columns", columns.clone());
            let err = StreamReaderFactory.create(&ctx(), &params).err();
            assert!(
                matches!(err, Some(PluginError::InvalidParameter { .. })),
                "accepted {columns}"
            );
        }
    }

    #[test]
    fn test_writer_print_flag_type_checked() {
        let params = Parameters::new().with("print", "yes");
        assert!(StreamWriterFactory.create(&ctx(), &params).is_err());
    }
}
