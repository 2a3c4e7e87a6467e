//! Status and statistics shared between task groups and the scheduler.
//!
//! Task groups push reports on a fixed cadence; the scheduler polls the
//! aggregate to decide FAILED/KILLED transitions. The [`Communicator`] trait is
//! the seam for a distributed implementation; [`InProcessCommunicator`] keeps
//! everything in atomics for a single process.

use crate::error::TaskError;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Instant;

/// Lifecycle state of a task group or of the job as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Created,
    Running,
    Succeeded,
    Failed,
    Killed,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Succeeded | State::Failed | State::Killed)
    }

    fn to_u8(self) -> u8 {
        match self {
            State::Created => 0,
            State::Running => 1,
            State::Succeeded => 2,
            State::Failed => 3,
            State::Killed => 4,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => State::Running,
            2 => State::Succeeded,
            3 => State::Failed,
            4 => State::Killed,
            _ => State::Created,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Created => "CREATED",
            State::Running => "RUNNING",
            State::Succeeded => "SUCCEEDED",
            State::Failed => "FAILED",
            State::Killed => "KILLED",
        };
        f.write_str(s)
    }
}

/// Counters for one task group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    pub records_read: u64,
    pub bytes_read: u64,
    pub records_written: u64,
    pub bytes_written: u64,
    /// Tasks that failed after exhausting their retries.
    pub error_count: u64,
    pub tasks_total: u64,
    pub tasks_finished: u64,
}

impl std::ops::AddAssign for GroupStats {
    fn add_assign(&mut self, rhs: Self) {
        self.records_read += rhs.records_read;
        self.bytes_read += rhs.bytes_read;
        self.records_written += rhs.records_written;
        self.bytes_written += rhs.bytes_written;
        self.error_count += rhs.error_count;
        self.tasks_total += rhs.tasks_total;
        self.tasks_finished += rhs.tasks_finished;
    }
}

/// One report pushed by a task group.
#[derive(Debug, Clone)]
pub struct GroupReport {
    pub state: State,
    pub stats: GroupStats,
    /// Set when `state` is [`State::Failed`].
    pub cause: Option<Arc<TaskError>>,
}

impl GroupReport {
    pub fn running(stats: GroupStats) -> Self {
        Self {
            state: State::Running,
            stats,
            cause: None,
        }
    }
}

/// Aggregate view over all registered groups.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    pub state: State,
    pub stats: GroupStats,
    pub groups_total: usize,
    pub groups_terminal: usize,
    /// Groups that have acknowledged a kill request or already terminated.
    pub groups_kill_settled: usize,
    /// First failed group in registration order, with its cause.
    pub failure: Option<(u32, Arc<TaskError>)>,
    pub timestamp: Instant,
}

impl JobSnapshot {
    /// Every group has either seen the kill flag or stopped on its own.
    pub fn kill_confirmed(&self) -> bool {
        self.groups_kill_settled >= self.groups_total
    }
}

/// Sink for task group status, queried by the scheduler.
pub trait Communicator: Send + Sync {
    /// Declare the groups of this job run. Unregistered groups are ignored.
    fn register(&self, group_ids: &[u32]);

    /// Store the latest report for a group.
    fn report(&self, group_id: u32, report: GroupReport);

    /// Latest report for one group.
    fn group(&self, group_id: u32) -> Option<GroupReport>;

    /// Aggregate all groups.
    fn collect(&self) -> JobSnapshot;

    /// Ask every group to stop. Irreversible for this job run.
    fn request_kill(&self);

    fn is_kill_requested(&self) -> bool;

    /// Record that a group has observed the kill flag.
    fn acknowledge_kill(&self, group_id: u32);
}

#[derive(Default)]
struct GroupSlot {
    state: AtomicU8,
    records_read: AtomicU64,
    bytes_read: AtomicU64,
    records_written: AtomicU64,
    bytes_written: AtomicU64,
    error_count: AtomicU64,
    tasks_total: AtomicU64,
    tasks_finished: AtomicU64,
    kill_acked: AtomicBool,
    cause: Mutex<Option<Arc<TaskError>>>,
}

impl GroupSlot {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    fn stats(&self) -> GroupStats {
        GroupStats {
            records_read: self.records_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            tasks_total: self.tasks_total.load(Ordering::Relaxed),
            tasks_finished: self.tasks_finished.load(Ordering::Relaxed),
        }
    }

    fn store(&self, report: GroupReport) {
        let s = report.stats;
        self.records_read.store(s.records_read, Ordering::Relaxed);
        self.bytes_read.store(s.bytes_read, Ordering::Relaxed);
        self.records_written
            .store(s.records_written, Ordering::Relaxed);
        self.bytes_written.store(s.bytes_written, Ordering::Relaxed);
        self.error_count.store(s.error_count, Ordering::Relaxed);
        self.tasks_total.store(s.tasks_total, Ordering::Relaxed);
        self.tasks_finished.store(s.tasks_finished, Ordering::Relaxed);
        if report.cause.is_some() {
            *self.cause.lock() = report.cause;
        }
        // Published last so a reader seeing FAILED also sees the cause.
        self.state.store(report.state.to_u8(), Ordering::Release);
    }
}

/// Communicator for a single process, backed by atomics.
#[derive(Default)]
pub struct InProcessCommunicator {
    groups: RwLock<IndexMap<u32, Arc<GroupSlot>>>,
    kill_requested: AtomicBool,
}

impl fmt::Debug for InProcessCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessCommunicator")
            .field("groups", &self.groups.read().len())
            .field("kill_requested", &self.is_kill_requested())
            .finish()
    }
}

impl InProcessCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, group_id: u32) -> Option<Arc<GroupSlot>> {
        self.groups.read().get(&group_id).cloned()
    }
}

impl Communicator for InProcessCommunicator {
    fn register(&self, group_ids: &[u32]) {
        let mut groups = self.groups.write();
        for id in group_ids {
            groups.entry(*id).or_default();
        }
    }

    fn report(&self, group_id: u32, report: GroupReport) {
        if let Some(slot) = self.slot(group_id) {
            // A terminal state is final; late RUNNING reports are dropped.
            if !slot.state().is_terminal() {
                slot.store(report);
            }
        }
    }

    fn group(&self, group_id: u32) -> Option<GroupReport> {
        self.slot(group_id).map(|slot| GroupReport {
            state: slot.state(),
            stats: slot.stats(),
            cause: slot.cause.lock().clone(),
        })
    }

    fn collect(&self) -> JobSnapshot {
        let groups = self.groups.read();
        let mut stats = GroupStats::default();
        let mut terminal = 0;
        let mut settled = 0;
        let mut succeeded = 0;
        let mut failure = None;

        for (id, slot) in groups.iter() {
            let state = slot.state();
            stats += slot.stats();
            if state.is_terminal() {
                terminal += 1;
            }
            if state.is_terminal() || slot.kill_acked.load(Ordering::Acquire) {
                settled += 1;
            }
            match state {
                State::Succeeded => succeeded += 1,
                State::Failed if failure.is_none() => {
                    let cause = slot.cause.lock().clone().unwrap_or_else(|| {
                        Arc::new(TaskError::ContainerPanicked("failed without a cause".into()))
                    });
                    failure = Some((*id, cause));
                }
                _ => {}
            }
        }

        let state = if failure.is_some() {
            State::Failed
        } else if !groups.is_empty() && succeeded == groups.len() {
            State::Succeeded
        } else if terminal == groups.len() && !groups.is_empty() {
            State::Killed
        } else if groups.values().any(|s| s.state() != State::Created) {
            State::Running
        } else {
            State::Created
        };

        JobSnapshot {
            state,
            stats,
            groups_total: groups.len(),
            groups_terminal: terminal,
            groups_kill_settled: settled,
            failure,
            timestamp: Instant::now(),
        }
    }

    fn request_kill(&self) {
        self.kill_requested.store(true, Ordering::Release);
    }

    fn is_kill_requested(&self) -> bool {
        self.kill_requested.load(Ordering::Acquire)
    }

    fn acknowledge_kill(&self, group_id: u32) {
        if let Some(slot) = self.slot(group_id) {
            slot.kill_acked.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Half;
    use crate::plugin::PluginError;
    use std::thread;

    fn stats(records: u64) -> GroupStats {
        GroupStats {
            records_written: records,
            bytes_written: records * 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_aggregate_states() {
        let comm = InProcessCommunicator::new();
        comm.register(&[0, 1]);
        assert_eq!(comm.collect().state, State::Created);

        comm.report(0, GroupReport::running(stats(5)));
        assert_eq!(comm.collect().state, State::Running);

        comm.report(
            0,
            GroupReport {
                state: State::Succeeded,
                stats: stats(10),
                cause: None,
            },
        );
        comm.report(
            1,
            GroupReport {
                state: State::Succeeded,
                stats: stats(20),
                cause: None,
            },
        );
        let snapshot = comm.collect();
        assert_eq!(snapshot.state, State::Succeeded);
        assert_eq!(snapshot.stats.records_written, 30);
        assert_eq!(snapshot.groups_terminal, 2);
    }

    #[test]
    fn test_failure_carries_cause() {
        let comm = InProcessCommunicator::new();
        comm.register(&[0, 1]);
        let cause = Arc::new(TaskError::Plugin {
            task: 3,
            half: Half::Writer,
            source: PluginError::failed("disk full"),
        });
        comm.report(
            1,
            GroupReport {
                state: State::Failed,
                stats: GroupStats::default(),
                cause: Some(cause),
            },
        );

        let snapshot = comm.collect();
        assert_eq!(snapshot.state, State::Failed);
        let (group, cause) = snapshot.failure.unwrap();
        assert_eq!(group, 1);
        assert!(cause.to_string().contains("disk full"));
    }

    #[test]
    fn test_terminal_state_is_final() {
        let comm = InProcessCommunicator::new();
        comm.register(&[0]);
        comm.report(
            0,
            GroupReport {
                state: State::Succeeded,
                stats: stats(1),
                cause: None,
            },
        );
        comm.report(0, GroupReport::running(stats(0)));
        assert_eq!(comm.group(0).unwrap().state, State::Succeeded);
        assert_eq!(comm.group(0).unwrap().stats.records_written, 1);
    }

    #[test]
    fn test_unregistered_reports_ignored() {
        let comm = InProcessCommunicator::new();
        comm.register(&[0]);
        comm.report(9, GroupReport::running(stats(1)));
        assert!(comm.group(9).is_none());
        assert_eq!(comm.collect().groups_total, 1);
    }

    #[test]
    fn test_kill_confirmation() {
        let comm = InProcessCommunicator::new();
        comm.register(&[0, 1, 2]);
        comm.request_kill();
        assert!(comm.is_kill_requested());
        assert!(!comm.collect().kill_confirmed());

        comm.acknowledge_kill(0);
        comm.report(
            1,
            GroupReport {
                state: State::Succeeded,
                stats: stats(1),
                cause: None,
            },
        );
        assert!(!comm.collect().kill_confirmed());

        comm.acknowledge_kill(2);
        assert!(comm.collect().kill_confirmed());
    }

    #[test]
    fn test_concurrent_reports() {
        let comm = Arc::new(InProcessCommunicator::new());
        let ids: Vec<u32> = (0..8).collect();
        comm.register(&ids);

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let comm = Arc::clone(&comm);
                thread::spawn(move || {
                    for n in 1..=100 {
                        comm.report(id, GroupReport::running(stats(n)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(comm.collect().stats.records_written, 800);
    }
}
