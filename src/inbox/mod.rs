//! Inbox auto-reply loop and its supervisor.

pub mod ledger;
pub mod processor;
pub mod report;
pub mod supervisor;

pub use ledger::ReplyLedger;
pub use processor::{InboxProcessor, LoopMonitor, spawn_inbox_processor};
pub use report::{BookkeepingStage, CycleReport, MessageOutcome, ProcessingResult};
pub use supervisor::{InboxSupervisor, StartOutcome, SupervisorStatus};
