//! Owns at most one running inbox loop.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ledger::ReplyLedger;
use super::processor::{InboxProcessor, LoopMonitor, spawn_inbox_processor};
use super::report::CycleReport;
use crate::config::ProcessorConfig;
use crate::mailbox::MailboxClient;
use crate::responder::Responder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub running: bool,
    /// Cycles completed across every run of the loop.
    pub cycles: u64,
    /// Replies sent whose mark-read or label step is still outstanding.
    pub pending_bookkeeping: usize,
    pub last_report: Option<CycleReport>,
}

struct RunningLoop {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

pub struct InboxSupervisor {
    mailbox: Arc<dyn MailboxClient>,
    responder: Arc<dyn Responder>,
    config: ProcessorConfig,
    ledger: ReplyLedger,
    monitor: LoopMonitor,
    running: Mutex<Option<RunningLoop>>,
}

impl InboxSupervisor {
    pub fn new(
        mailbox: Arc<dyn MailboxClient>,
        responder: Arc<dyn Responder>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            mailbox,
            responder,
            config,
            ledger: ReplyLedger::new(),
            monitor: LoopMonitor::new(),
            running: Mutex::new(None),
        }
    }

    /// Spawn the loop unless one is already running. A loop that exited on
    /// its own is replaced.
    pub async fn start(&self) -> StartOutcome {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref()
            && !current.handle.is_finished()
        {
            return StartOutcome::AlreadyRunning;
        }

        let processor = InboxProcessor::new(
            Arc::clone(&self.mailbox),
            Arc::clone(&self.responder),
            self.config.clone(),
        )
        .with_ledger(self.ledger.clone())
        .with_monitor(self.monitor.clone());

        let (handle, cancel) = spawn_inbox_processor(processor);
        *running = Some(RunningLoop { handle, cancel });
        info!("Inbox loop started");
        StartOutcome::Started
    }

    /// Cancel the loop and wait for it to exit. Returns whether a loop was
    /// running.
    ///
    /// The lock is held until the task has exited, so a concurrent `start`
    /// waits instead of spawning a second loop next to one still finishing
    /// a send.
    pub async fn stop(&self) -> bool {
        let mut running = self.running.lock().await;
        let Some(current) = running.take() else {
            return false;
        };
        let was_running = !current.handle.is_finished();
        current.cancel.cancel();
        if let Err(e) = current.handle.await {
            warn!(error = %e, "Inbox loop task ended abnormally");
        }
        drop(running);
        if was_running {
            info!("Inbox loop stopped");
        }
        was_running
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    pub async fn status(&self) -> SupervisorStatus {
        let running = self.is_running().await;
        let snapshot = self.monitor.snapshot();
        SupervisorStatus {
            running,
            cycles: snapshot.cycles,
            pending_bookkeeping: self.ledger.len(),
            last_report: snapshot.last_report,
        }
    }
}
