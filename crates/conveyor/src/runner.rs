//! Wraps a container so its terminal state always reaches the communicator.

use crate::communicator::{GroupReport, State};
use crate::container::{ContainerOutcome, ContainerResult, TaskGroupContainer, panic_message};
use crate::error::TaskError;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::{error, info};

/// Runs one [`TaskGroupContainer`] on a worker thread.
pub struct TaskGroupContainerRunner {
    container: TaskGroupContainer,
}

impl TaskGroupContainerRunner {
    pub fn new(container: TaskGroupContainer) -> Self {
        Self { container }
    }

    /// Run the container and publish exactly one terminal report.
    ///
    /// A panic escaping the container is reported as FAILED instead of
    /// unwinding into the worker pool.
    pub fn run(self) -> ContainerOutcome {
        let group = self.container.id();
        let communicator = Arc::clone(self.container.communicator());
        let container = self.container;

        let (report, outcome) = match catch_unwind(AssertUnwindSafe(move || container.start())) {
            Ok(ContainerResult { outcome, stats }) => {
                let report = match &outcome {
                    ContainerOutcome::Succeeded | ContainerOutcome::PartiallyFailed { .. } => {
                        GroupReport {
                            state: State::Succeeded,
                            stats,
                            cause: None,
                        }
                    }
                    ContainerOutcome::Failed(cause) => GroupReport {
                        state: State::Failed,
                        stats,
                        cause: Some(Arc::clone(cause)),
                    },
                    ContainerOutcome::Cancelled => GroupReport {
                        state: State::Killed,
                        stats,
                        cause: None,
                    },
                };
                (report, outcome)
            }
            Err(payload) => {
                let cause = Arc::new(TaskError::ContainerPanicked(panic_message(
                    payload.as_ref(),
                )));
                error!(group, error = %cause, "task group container panicked");
                let report = GroupReport {
                    state: State::Failed,
                    stats: communicator
                        .group(group)
                        .map(|r| r.stats)
                        .unwrap_or_default(),
                    cause: Some(Arc::clone(&cause)),
                };
                (report, ContainerOutcome::Failed(cause))
            }
        };

        info!(group, state = %report.state, "task group terminated");
        communicator.report(group, report);
        outcome
    }
}
