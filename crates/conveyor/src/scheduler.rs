//! Job scheduling: start every task group, then supervise until terminal.
//!
//! [`Scheduler`] splits the policy in two. Implementations decide how task
//! groups are started ([`Scheduler::start_all_task_groups`]); the provided
//! [`Scheduler::schedule`] loop polls the communicator and maps the aggregate
//! state onto the job outcome.

use crate::cancel::CancellationToken;
use crate::communicator::{Communicator, GroupStats, JobSnapshot, State};
use crate::config::{JobConfig, TaskGroupConfig, validate_task_groups};
use crate::container::TaskGroupContainer;
use crate::error::JobError;
use crate::registry::PluginRegistry;
use crate::runner::TaskGroupContainerRunner;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Summary of a job that ran to SUCCEEDED.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub state: State,
    pub stats: GroupStats,
    pub elapsed: Duration,
}

/// Drives a job from CREATED to a terminal state.
pub trait Scheduler {
    /// Start every task group and return without waiting for them.
    ///
    /// Must validate everything before starting anything: on error no group
    /// has been registered or launched.
    fn start_all_task_groups(&mut self, configs: Vec<TaskGroupConfig>) -> Result<(), JobError>;

    fn communicator(&self) -> &Arc<dyn Communicator>;

    /// Token that stops every running group when cancelled.
    fn token(&self) -> &CancellationToken;

    fn poll_interval(&self) -> Duration;

    /// Record a job state transition.
    fn transition(&mut self, state: State);

    /// Run the job to completion.
    ///
    /// A confirmed kill takes precedence over a failure observed in the same
    /// poll.
    fn schedule(&mut self, configs: Vec<TaskGroupConfig>) -> Result<JobReport, JobError> {
        let started = Instant::now();
        let groups = configs.len();
        let tasks: usize = configs.iter().map(|g| g.tasks.len()).sum();

        self.start_all_task_groups(configs)?;
        info!(groups, tasks, "job started");
        self.supervise(started)
    }

    /// Poll the communicator until the job reaches a terminal state.
    fn supervise(&mut self, started: Instant) -> Result<JobReport, JobError> {
        loop {
            let snapshot = self.communicator().collect();

            if self.communicator().is_kill_requested() && snapshot.kill_confirmed() {
                return Err(self.deal_killing_stat(&snapshot));
            }

            match snapshot.state {
                State::Failed => return Err(self.deal_failed_stat(&snapshot)),
                State::Succeeded => {
                    self.transition(State::Succeeded);
                    let report = JobReport {
                        state: State::Succeeded,
                        stats: snapshot.stats,
                        elapsed: started.elapsed(),
                    };
                    info!(
                        records = report.stats.records_written,
                        bytes = report.stats.bytes_written,
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        "job succeeded"
                    );
                    return Ok(report);
                }
                // Every group stopped without failing but not all succeeded:
                // the job token was cancelled from outside.
                State::Killed => return Err(self.deal_killing_stat(&snapshot)),
                State::Created | State::Running => {}
            }

            let secs = started.elapsed().as_secs_f64().max(1e-3);
            info!(
                records = snapshot.stats.records_written,
                bytes = snapshot.stats.bytes_written,
                errors = snapshot.stats.error_count,
                records_per_sec = (snapshot.stats.records_written as f64 / secs) as u64,
                groups_done = snapshot.groups_terminal,
                groups = snapshot.groups_total,
                "job progress"
            );
            std::thread::sleep(self.poll_interval());
        }
    }

    /// Stop the remaining groups and surface the first failure.
    fn deal_failed_stat(&mut self, snapshot: &JobSnapshot) -> JobError {
        self.token().cancel();
        self.transition(State::Failed);
        match &snapshot.failure {
            Some((group, cause)) => {
                error!(group, error = %cause, "job failed");
                JobError::PluginRuntime {
                    group: *group,
                    cause: Arc::clone(cause),
                }
            }
            None => JobError::Resource("job failed without a recorded cause".into()),
        }
    }

    /// Stop the remaining groups after a kill.
    fn deal_killing_stat(&mut self, snapshot: &JobSnapshot) -> JobError {
        self.token().cancel();
        self.transition(State::Killed);
        warn!(
            groups_done = snapshot.groups_terminal,
            groups = snapshot.groups_total,
            "job killed"
        );
        JobError::Killed
    }
}

/// Requests a kill of a running job from any thread.
#[derive(Clone)]
pub struct KillSwitch {
    communicator: Arc<dyn Communicator>,
}

impl KillSwitch {
    pub fn kill(&self) {
        self.communicator.request_kill();
    }
}

/// Runs every task group of a job on a worker pool inside this process.
pub struct ProcessInnerScheduler {
    registry: Arc<PluginRegistry>,
    communicator: Arc<dyn Communicator>,
    token: CancellationToken,
    poll_interval: Duration,
    state: State,
    pool: Option<rayon::ThreadPool>,
}

impl ProcessInnerScheduler {
    pub fn new(registry: Arc<PluginRegistry>, communicator: Arc<dyn Communicator>) -> Self {
        Self {
            registry,
            communicator,
            token: CancellationToken::new(),
            poll_interval: Duration::from_millis(100),
            state: State::Created,
            pool: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Current job state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Threads in the task group pool; zero before start.
    pub fn worker_count(&self) -> usize {
        self.pool.as_ref().map_or(0, |p| p.current_num_threads())
    }

    pub fn kill_switch(&self) -> KillSwitch {
        KillSwitch {
            communicator: Arc::clone(&self.communicator),
        }
    }

    /// Ask every group to stop; the job ends as KILLED once all confirm.
    pub fn request_kill(&self) {
        self.communicator.request_kill();
    }

    /// Validate and run a whole job config.
    pub fn run_job(&mut self, job: JobConfig) -> Result<JobReport, JobError> {
        self.poll_interval = job.poll_interval();
        self.schedule(job.task_groups)
    }
}

impl Scheduler for ProcessInnerScheduler {
    fn start_all_task_groups(&mut self, configs: Vec<TaskGroupConfig>) -> Result<(), JobError> {
        if self.state != State::Created {
            return Err(JobError::AlreadyStarted);
        }
        validate_task_groups(&configs)?;

        let ids: Vec<u32> = configs.iter().map(|g| g.id).collect();
        let containers = configs
            .into_iter()
            .map(|config| {
                TaskGroupContainer::new(
                    config,
                    &self.registry,
                    Arc::clone(&self.communicator),
                    &self.token,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        // One worker per group; a smaller pool would serialize groups.
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(containers.len())
            .thread_name(|i| format!("conveyor-taskgroup-{i}"))
            .build()
            .map_err(|e| JobError::Resource(format!("cannot build task group pool: {e}")))?;

        self.communicator.register(&ids);
        self.transition(State::Running);

        for container in containers {
            pool.spawn(move || {
                TaskGroupContainerRunner::new(container).run();
            });
        }
        self.pool = Some(pool);
        Ok(())
    }

    fn communicator(&self) -> &Arc<dyn Communicator> {
        &self.communicator
    }

    fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    fn transition(&mut self, state: State) {
        debug!(from = %self.state, to = %state, "job state");
        self.state = state;
    }
}
