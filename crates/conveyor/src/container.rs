//! Task group container: runs the reader/writer pairs of one task group.
//!
//! Each task gets a private [`Channel`] per attempt and two threads, one per
//! half. Halves report completion over an mpsc queue; the container loop
//! launches tasks up to the group's concurrency, applies retry and error
//! threshold policy, and pushes counters to the communicator on a fixed
//! cadence.

use crate::cancel::CancellationToken;
use crate::channel::{Channel, ChannelStats};
use crate::communicator::{Communicator, GroupReport, GroupStats};
use crate::config::{ConfigError, TaskGroupConfig};
use crate::error::{Half, TaskError};
use crate::exchanger::{RecordReceiver, RecordSender};
use crate::plugin::{Parameters, PluginError, ReaderFactory, TaskContext, WriterFactory};
use crate::registry::PluginRegistry;
use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a container run ended.
#[derive(Debug, Clone)]
pub enum ContainerOutcome {
    /// Every task succeeded.
    Succeeded,
    /// All tasks finished but some failed, fewer than the error threshold.
    PartiallyFailed { errors: usize },
    /// The error threshold was reached, or a resource error occurred.
    Failed(Arc<TaskError>),
    /// The container was cancelled from outside.
    Cancelled,
}

/// Final result of [`TaskGroupContainer::start`].
#[derive(Debug, Clone)]
pub struct ContainerResult {
    pub outcome: ContainerOutcome,
    pub stats: GroupStats,
}

/// A task with its plugin factories resolved.
struct ResolvedTask {
    id: u32,
    reader: Arc<dyn ReaderFactory>,
    reader_params: Parameters,
    writer: Arc<dyn WriterFactory>,
    writer_params: Parameters,
}

enum Event {
    HalfDone {
        slot: usize,
        half: Half,
        result: Result<(), TaskError>,
    },
    Cancelled,
}

/// One in-flight attempt of a task.
struct Attempt {
    attempt: u32,
    channel: Channel,
    halves_left: u8,
    error: Option<TaskError>,
}

impl Attempt {
    fn record(&mut self, result: Result<(), TaskError>) {
        self.halves_left -= 1;
        if let Err(err) = result {
            // Keep the first real error; an abort only wins if nothing else failed.
            match &self.error {
                None => self.error = Some(err),
                Some(prev) if prev.is_abort() && !err.is_abort() => self.error = Some(err),
                _ => {}
            }
        }
    }
}

struct Pending {
    slot: usize,
    attempt: u32,
    not_before: Instant,
}

/// Runs every task of one group to a terminal state.
pub struct TaskGroupContainer {
    config: TaskGroupConfig,
    tasks: Vec<ResolvedTask>,
    communicator: Arc<dyn Communicator>,
    token: CancellationToken,
}

impl TaskGroupContainer {
    /// Bind the group's tasks to plugin factories.
    ///
    /// `token` is the job token; the container derives a child from it so it
    /// can stop its own tasks without affecting sibling groups.
    pub fn new(
        config: TaskGroupConfig,
        registry: &PluginRegistry,
        communicator: Arc<dyn Communicator>,
        token: &CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let tasks = config
            .tasks
            .iter()
            .map(|task| {
                let reader = registry
                    .reader(&task.reader.name)
                    .ok_or_else(|| ConfigError::UnknownReader(task.reader.name.clone()))?;
                let writer = registry
                    .writer(&task.writer.name)
                    .ok_or_else(|| ConfigError::UnknownWriter(task.writer.name.clone()))?;
                Ok(ResolvedTask {
                    id: task.id,
                    reader,
                    reader_params: task.reader.parameters.clone(),
                    writer,
                    writer_params: task.writer.parameters.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            config,
            tasks,
            communicator,
            token: token.child_token(),
        })
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn communicator(&self) -> &Arc<dyn Communicator> {
        &self.communicator
    }

    /// Run all tasks to completion, failure, or cancellation.
    pub fn start(self) -> ContainerResult {
        let group = self.config.id;
        let concurrency = self.config.effective_concurrency();
        let interval = self.config.report_interval_duration();
        let (tx, rx) = mpsc::channel();

        {
            let tx = tx.clone();
            self.token.on_cancel(move || {
                let _ = tx.send(Event::Cancelled);
            });
        }

        info!(
            group,
            tasks = self.tasks.len(),
            concurrency,
            "task group started"
        );

        let mut run = Run {
            container: &self,
            tx,
            pending: (0..self.tasks.len())
                .map(|slot| Pending {
                    slot,
                    attempt: 0,
                    not_before: Instant::now(),
                })
                .collect(),
            running: HashMap::new(),
            finished: GroupStats {
                tasks_total: self.tasks.len() as u64,
                ..Default::default()
            },
            errors: 0,
            kill_acked: false,
        };

        run.report();
        let mut next_report = Instant::now() + interval;

        loop {
            if self.token.is_cancelled() {
                info!(group, "task group cancelled");
                return run.finish(ContainerOutcome::Cancelled);
            }

            if let Err(cause) = run.launch_ready(concurrency) {
                self.token.cancel();
                return run.finish(ContainerOutcome::Failed(cause));
            }

            if run.pending.is_empty() && run.running.is_empty() {
                let outcome = match run.errors {
                    0 => ContainerOutcome::Succeeded,
                    errors => ContainerOutcome::PartiallyFailed { errors },
                };
                info!(group, errors = run.errors, "task group finished");
                return run.finish(outcome);
            }

            let now = Instant::now();
            let mut deadline = next_report;
            if run.running.len() < concurrency {
                if let Some(due) = run.pending.iter().map(|p| p.not_before).min() {
                    deadline = deadline.min(due);
                }
            }
            let timeout = deadline.saturating_duration_since(now);

            match rx.recv_timeout(timeout) {
                Ok(event) => {
                    if let Some(cause) = run.handle(event) {
                        self.token.cancel();
                        return run.finish(ContainerOutcome::Failed(cause));
                    }
                    while let Ok(event) = rx.try_recv() {
                        if let Some(cause) = run.handle(event) {
                            self.token.cancel();
                            return run.finish(ContainerOutcome::Failed(cause));
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(group, "task event queue disconnected");
                    self.token.cancel();
                    return run.finish(ContainerOutcome::Failed(queue_lost()));
                }
            }

            if Instant::now() >= next_report {
                run.report();
                next_report = Instant::now() + interval;
            }
        }
    }

    fn context(&self, slot: usize, attempt: u32) -> TaskContext {
        TaskContext {
            group_id: self.config.id,
            task_id: self.tasks[slot].id,
            attempt,
        }
    }
}

/// Mutable state of one `start` call.
struct Run<'a> {
    container: &'a TaskGroupContainer,
    tx: Sender<Event>,
    pending: VecDeque<Pending>,
    running: HashMap<usize, Attempt>,
    /// Counters of attempts that will not run again.
    finished: GroupStats,
    errors: usize,
    kill_acked: bool,
}

impl Run<'_> {
    fn launch_ready(&mut self, concurrency: usize) -> Result<(), Arc<TaskError>> {
        let now = Instant::now();
        while self.running.len() < concurrency {
            let Some(pos) = self.pending.iter().position(|p| p.not_before <= now) else {
                break;
            };
            let Some(next) = self.pending.remove(pos) else {
                break;
            };
            match self.launch(next.slot, next.attempt) {
                Ok(attempt) => {
                    self.running.insert(next.slot, attempt);
                }
                Err(err) if err.is_resource() => return Err(Arc::new(err)),
                Err(err) => {
                    // Plugin construction failed; treat it like a failed run.
                    let stats = ChannelStats::default();
                    if let Some(cause) = self.settle(next.slot, next.attempt, stats, Some(err)) {
                        return Err(cause);
                    }
                }
            }
        }
        Ok(())
    }

    fn launch(&mut self, slot: usize, attempt: u32) -> Result<Attempt, TaskError> {
        let container = self.container;
        let task = &container.tasks[slot];
        let ctx = container.context(slot, attempt);
        let config = &container.config.channel;

        let mut reader = task
            .reader
            .create(&ctx, &task.reader_params)
            .map_err(|source| TaskError::Plugin {
                task: task.id,
                half: Half::Reader,
                source,
            })?;
        let mut writer = task
            .writer
            .create(&ctx, &task.writer_params)
            .map_err(|source| TaskError::Plugin {
                task: task.id,
                half: Half::Writer,
                source,
            })?;

        let channel = Channel::new(config, &container.token);
        let mut sender = RecordSender::new(channel.clone(), config, container.token.clone());
        let mut receiver = RecordReceiver::new(channel.clone(), config);

        debug!(group = ctx.group_id, task = ctx.task_id, attempt, "launching task");

        let task_id = task.id;
        {
            let channel = channel.clone();
            let tx = self.tx.clone();
            thread::Builder::new()
                .name(format!("tg{}-t{}-writer", ctx.group_id, task_id))
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        writer.start_write(&mut receiver)?;
                        if !receiver.is_drained() {
                            return Err(PluginError::failed(
                                "writer returned before end of stream",
                            ));
                        }
                        Ok(())
                    }));
                    let result = settle_half(task_id, Half::Writer, result);
                    if result.is_err() {
                        channel.abort();
                    }
                    let _ = tx.send(Event::HalfDone {
                        slot,
                        half: Half::Writer,
                        result,
                    });
                })
                .map_err(|source| TaskError::Spawn {
                    task: task_id,
                    half: Half::Writer,
                    source,
                })?;
        }

        {
            let reader_channel = channel.clone();
            let tx = self.tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("tg{}-t{}-reader", ctx.group_id, task_id))
                .spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        reader.start_read(&mut sender)?;
                        sender.terminate()?;
                        Ok(())
                    }));
                    let result = settle_half(task_id, Half::Reader, result);
                    if result.is_err() {
                        reader_channel.abort();
                    }
                    let _ = tx.send(Event::HalfDone {
                        slot,
                        half: Half::Reader,
                        result,
                    });
                });
            if let Err(source) = spawned {
                // The writer is already running; release it.
                channel.abort();
                return Err(TaskError::Spawn {
                    task: task_id,
                    half: Half::Reader,
                    source,
                });
            }
        }

        Ok(Attempt {
            attempt,
            channel,
            halves_left: 2,
            error: None,
        })
    }

    /// Apply one event. Returns a cause when the group must fail.
    fn handle(&mut self, event: Event) -> Option<Arc<TaskError>> {
        let Event::HalfDone { slot, half, result } = event else {
            return None;
        };
        if let Err(err) = &result {
            debug!(group = self.container.config.id, slot, %half, error = %err, "task half failed");
        }
        let attempt = self.running.get_mut(&slot)?;
        attempt.record(result);
        if attempt.halves_left > 0 {
            return None;
        }
        let attempt = self.running.remove(&slot)?;
        self.settle(slot, attempt.attempt, attempt.channel.stats(), attempt.error)
    }

    /// Account for an attempt that has fully stopped.
    fn settle(
        &mut self,
        slot: usize,
        attempt: u32,
        stats: ChannelStats,
        error: Option<TaskError>,
    ) -> Option<Arc<TaskError>> {
        let container = self.container;
        let config = &container.config;
        let task_id = container.tasks[slot].id;

        let Some(err) = error else {
            self.finished += channel_stats(stats);
            self.finished.tasks_finished += 1;
            debug!(group = config.id, task = task_id, "task succeeded");
            return None;
        };

        if container.token.is_cancelled() {
            return None;
        }

        if attempt < config.max_task_retries {
            warn!(
                group = config.id,
                task = task_id,
                attempt,
                error = %err,
                "task failed, retrying"
            );
            self.pending.push_back(Pending {
                slot,
                attempt: attempt + 1,
                not_before: Instant::now() + config.retry_interval(),
            });
            return None;
        }

        warn!(group = config.id, task = task_id, error = %err, "task failed");
        self.finished += channel_stats(stats);
        self.finished.tasks_finished += 1;
        self.finished.error_count += 1;
        self.errors += 1;

        if self.errors >= config.error_threshold || err.is_resource() {
            return Some(Arc::new(err));
        }
        None
    }

    fn stats(&self) -> GroupStats {
        let mut stats = self.finished;
        for attempt in self.running.values() {
            stats += channel_stats(attempt.channel.stats());
        }
        stats
    }

    /// Push current counters and observe the kill flag.
    fn report(&mut self) {
        let container = self.container;
        let group = container.config.id;
        container
            .communicator
            .report(group, GroupReport::running(self.stats()));

        if !self.kill_acked && container.communicator.is_kill_requested() {
            info!(group, "kill requested");
            container.communicator.acknowledge_kill(group);
            self.kill_acked = true;
        }
    }

    fn finish(self, outcome: ContainerOutcome) -> ContainerResult {
        ContainerResult {
            stats: self.stats(),
            outcome,
        }
    }
}

fn queue_lost() -> Arc<TaskError> {
    Arc::new(TaskError::ContainerPanicked(
        "task event queue disconnected".into(),
    ))
}

fn channel_stats(c: ChannelStats) -> GroupStats {
    GroupStats {
        records_read: c.records_pushed,
        bytes_read: c.bytes_pushed,
        records_written: c.records_pulled,
        bytes_written: c.bytes_pulled,
        ..Default::default()
    }
}

fn settle_half(
    task: u32,
    half: Half,
    result: Result<Result<(), PluginError>, Box<dyn Any + Send>>,
) -> Result<(), TaskError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(source)) => Err(TaskError::Plugin { task, half, source }),
        Err(payload) => Err(TaskError::Panicked {
            task,
            half,
            message: panic_message(payload.as_ref()),
        }),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
