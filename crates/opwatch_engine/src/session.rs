use std::collections::HashMap;
use std::sync::Arc;

use opwatch_core::{
    update, Effect, JobKind, Msg, PollTicket, RegistrySnapshot, SessionEvent, SessionState,
    WorkspaceId,
};
use opwatch_logging::{op_debug, op_info, op_trace, op_warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::poller::{PollExit, Poller};
use crate::{ClientSettings, JobTransport};

pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

pub struct ChannelEventSink {
    tx: std::sync::mpsc::Sender<SessionEvent>,
}

impl ChannelEventSink {
    pub fn new(tx: std::sync::mpsc::Sender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}

enum Command {
    Dispatch(Msg),
    Inspect(oneshot::Sender<SessionState>),
    Pollers(oneshot::Sender<Vec<PollTicket>>),
    Shutdown(oneshot::Sender<()>),
}

/// Front door of the session loop.
///
/// The loop task exclusively owns the [`SessionState`]; everything else talks
/// to it through messages. Dropping the handle stops the loop and cancels
/// every poller.
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Spawns the session loop on the current Tokio runtime.
    pub fn spawn(
        transport: Arc<dyn JobTransport>,
        settings: &ClientSettings,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let runner = EffectRunner {
            poller: Poller::new(transport.clone(), settings.poll_interval),
            transport,
            sink,
            msg_tx,
            refresh_partial_results: settings.refresh_partial_results,
            running: HashMap::new(),
        };
        let task = tokio::spawn(run_loop(cmd_rx, msg_rx, runner));
        Self { cmd_tx, task }
    }

    pub fn select_workspace(&self, workspace: WorkspaceId) {
        self.dispatch(Msg::SelectWorkspace(workspace));
    }

    pub fn start_job(&self, workspace: WorkspaceId, kind: JobKind) {
        self.dispatch(Msg::StartJob { workspace, kind });
    }

    pub fn delete_workspace(&self, workspace: WorkspaceId) {
        self.dispatch(Msg::DeleteWorkspace(workspace));
    }

    pub fn restore(&self, snapshot: RegistrySnapshot) {
        self.dispatch(Msg::RestoreSnapshot(snapshot));
    }

    pub fn dispatch(&self, msg: Msg) {
        if self.cmd_tx.send(Command::Dispatch(msg)).is_err() {
            op_warn!("Session loop is gone; message dropped");
        }
    }

    /// Copy of the controller state after every message sent so far.
    pub async fn state(&self) -> Option<SessionState> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Inspect(tx)).ok()?;
        rx.await.ok()
    }

    /// Tickets of poller tasks that are still running.
    pub async fn live_pollers(&self) -> Vec<PollTicket> {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Pollers(tx)).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

async fn run_loop(
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut msg_rx: mpsc::UnboundedReceiver<Msg>,
    mut runner: EffectRunner,
) {
    let mut state = SessionState::new();
    loop {
        let msg = tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(Command::Dispatch(msg)) => msg,
                Some(Command::Inspect(reply)) => {
                    let _ = reply.send(state.clone());
                    continue;
                }
                Some(Command::Pollers(reply)) => {
                    let _ = reply.send(runner.live_tickets());
                    continue;
                }
                Some(Command::Shutdown(reply)) => {
                    runner.cancel_all();
                    let _ = reply.send(());
                    break;
                }
                None => break,
            },
            Some(msg) = msg_rx.recv() => msg,
        };

        let (next, effects) = update(state, msg);
        state = next;
        for effect in effects {
            runner.execute(effect);
        }
    }
    runner.cancel_all();
    op_info!("Session loop stopped");
}

struct RunningPoller {
    ticket: PollTicket,
    cancel: CancellationToken,
    task: JoinHandle<PollExit>,
}

/// Turns effects into spawned IO whose results come back as messages.
struct EffectRunner {
    transport: Arc<dyn JobTransport>,
    poller: Poller,
    sink: Arc<dyn EventSink>,
    msg_tx: mpsc::UnboundedSender<Msg>,
    refresh_partial_results: bool,
    running: HashMap<(WorkspaceId, JobKind), RunningPoller>,
}

impl EffectRunner {
    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::StopPoller(ticket) => self.stop_poller(&ticket),
            Effect::StartPoller(ticket) => self.start_poller(ticket),
            Effect::FetchLatestRuns {
                workspace,
                generation,
            } => {
                let transport = self.transport.clone();
                let tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let msg = match transport.fetch_latest_runs(&workspace).await {
                        Ok(runs) => Msg::LatestRunsLoaded {
                            workspace,
                            generation,
                            runs,
                        },
                        Err(err) => Msg::LatestRunsFailed {
                            workspace,
                            generation,
                            message: err.user_message().to_string(),
                        },
                    };
                    let _ = tx.send(msg);
                });
            }
            Effect::SubmitJob { workspace, kind } => {
                let transport = self.transport.clone();
                let tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    let msg = match transport.start_job(&workspace, kind).await {
                        Ok(run_id) => Msg::JobAccepted {
                            workspace,
                            kind,
                            run_id,
                        },
                        Err(err) => Msg::JobRejected {
                            workspace,
                            kind,
                            message: err.user_message().to_string(),
                        },
                    };
                    let _ = tx.send(msg);
                });
            }
            Effect::RefreshReadModel {
                workspace,
                kind,
                run_id,
                partial,
            } => {
                if partial && !self.refresh_partial_results {
                    op_trace!("Partial refresh of {} disabled", kind);
                    return;
                }
                let transport = self.transport.clone();
                let tx = self.msg_tx.clone();
                tokio::spawn(async move {
                    match transport.fetch_read_model(&workspace, kind).await {
                        Ok(value) => {
                            let _ = tx.send(Msg::ReadModelLoaded {
                                workspace,
                                kind,
                                run_id,
                                partial,
                                value,
                            });
                        }
                        Err(err) if partial => {
                            op_debug!("Partial {} refresh for {} failed: {}", kind, workspace, err);
                        }
                        Err(err) => {
                            op_warn!("Loading {} for {} failed: {}", kind, workspace, err);
                        }
                    }
                });
            }
            Effect::Notify(event) => self.sink.emit(event),
        }
    }

    fn start_poller(&mut self, ticket: PollTicket) {
        let key = (ticket.workspace.clone(), ticket.kind);
        if let Some(previous) = self.running.remove(&key) {
            previous.cancel.cancel();
        }

        op_debug!(
            "Polling {} run {} in {}",
            ticket.kind,
            ticket.run_id,
            ticket.workspace
        );
        let cancel = CancellationToken::new();
        let poller = self.poller.clone();
        let tx = self.msg_tx.clone();
        let task_ticket = ticket.clone();
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            poller
                .run(&task_ticket, task_cancel, |ticket, snapshot| {
                    let _ = tx.send(Msg::PollObserved {
                        ticket: ticket.clone(),
                        snapshot,
                    });
                })
                .await
        });

        self.running.insert(
            key,
            RunningPoller {
                ticket,
                cancel,
                task,
            },
        );
    }

    fn stop_poller(&mut self, ticket: &PollTicket) {
        let key = (ticket.workspace.clone(), ticket.kind);
        let matches = self
            .running
            .get(&key)
            .is_some_and(|running| &running.ticket == ticket);
        if matches {
            if let Some(running) = self.running.remove(&key) {
                running.cancel.cancel();
            }
        }
    }

    fn live_tickets(&mut self) -> Vec<PollTicket> {
        self.running.retain(|_, running| !running.task.is_finished());
        self.running
            .values()
            .map(|running| running.ticket.clone())
            .collect()
    }

    fn cancel_all(&mut self) {
        for (_, running) in self.running.drain() {
            running.cancel.cancel();
        }
    }
}
