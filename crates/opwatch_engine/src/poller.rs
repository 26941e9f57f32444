use std::sync::Arc;
use std::time::Duration;

use opwatch_core::{JobStatus, PollTicket, RunSnapshot};
use opwatch_logging::{op_debug, op_warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::JobTransport;

/// How a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// The run reached a terminal status; it was observed exactly once.
    Finished(JobStatus),
    Cancelled,
}

/// Periodically checks the status of one run.
#[derive(Clone)]
pub struct Poller {
    transport: Arc<dyn JobTransport>,
    interval: Duration,
}

impl Poller {
    pub fn new(transport: Arc<dyn JobTransport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
        }
    }

    /// Checks immediately, then once per interval, until the run is terminal
    /// or `cancel` fires. Cancellation also aborts an in-flight request and
    /// never reaches `observe`.
    ///
    /// Transport errors are logged and retried on the next tick.
    pub async fn run<F>(
        &self,
        ticket: &PollTicket,
        cancel: CancellationToken,
        mut observe: F,
    ) -> PollExit
    where
        F: FnMut(&PollTicket, RunSnapshot) + Send,
    {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollExit::Cancelled,
                _ = interval.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollExit::Cancelled,
                fetched = self.transport.fetch_run(&ticket.workspace, &ticket.run_id) => fetched,
            };

            match fetched {
                Ok(snapshot) => {
                    let status = snapshot.status;
                    if cancel.is_cancelled() {
                        return PollExit::Cancelled;
                    }
                    observe(ticket, snapshot);
                    if status.is_terminal() {
                        op_debug!(
                            "Poller for {} {} finished with {:?}",
                            ticket.workspace,
                            ticket.run_id,
                            status
                        );
                        return PollExit::Finished(status);
                    }
                }
                Err(err) => {
                    op_warn!(
                        "Status check of {} run {} failed: {}; retrying",
                        ticket.kind,
                        ticket.run_id,
                        err
                    );
                }
            }
        }
    }
}
