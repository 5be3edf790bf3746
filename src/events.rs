//! Run states and the progress events a run emits.

use crate::ledger::Outcome;
use crate::mutator::PlannedAction;
use log::{debug, error};
use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

/// Lifecycle of one orchestrated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Validating,
    CheckingHistory,
    BackingUp,
    Executing,
    Recording,
    Done,
    Failed,
    Restoring,
}

impl RunState {
    /// Whether `self -> next` is a legal move.
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Idle, Restoring)
                | (Validating, CheckingHistory)
                | (Validating, Idle)
                | (CheckingHistory, BackingUp)
                | (CheckingHistory, Done)
                | (CheckingHistory, Idle)
                | (BackingUp, Executing)
                | (BackingUp, Failed)
                | (Executing, Recording)
                | (Executing, Failed)
                | (Recording, Done)
                | (Failed, Restoring)
                | (Failed, Idle)
                | (Restoring, Idle)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Validating => "validating",
            RunState::CheckingHistory => "checking-history",
            RunState::BackingUp => "backing-up",
            RunState::Executing => "executing",
            RunState::Recording => "recording",
            RunState::Done => "done",
            RunState::Failed => "failed",
            RunState::Restoring => "restoring",
        };
        f.write_str(name)
    }
}

/// One discrete step of a run, in the order it happened.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    StateChanged { from: RunState, to: RunState },
    FileScanned(PathBuf),
    EntrySkipped { path: PathBuf, reason: String },
    FileHashed(PathBuf),
    GroupFormed { fingerprint: String, members: usize },
    PlanReady { actions: usize },
    BackupCreated { id: String, files: usize },
    ActionApplied { index: usize, total: usize, action: PlannedAction },
    Warning(String),
    Finished { outcome: Outcome },
}

/// Sending half of the progress channel. Without a receiver, events are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<ProgressEvent>>,
}

impl EventSink {
    pub fn new(sender: Sender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            // A gone receiver means nobody is watching.
            let _ = sender.send(event);
        }
    }
}

/// Current state of a run plus the sink its transitions are reported to.
#[derive(Debug, Clone)]
pub(crate) struct StateMachine {
    state: RunState,
    events: EventSink,
}

impl StateMachine {
    pub(crate) fn new(events: EventSink) -> Self {
        Self {
            state: RunState::Idle,
            events,
        }
    }

    pub(crate) fn state(&self) -> RunState {
        self.state
    }

    pub(crate) fn transition(&mut self, to: RunState) {
        let from = self.state;
        let legal = from.can_transition_to(to);
        if !legal {
            error!("Illegal run state transition {} -> {}", from, to);
        }
        debug_assert!(legal, "illegal transition {} -> {}", from, to);
        debug!("Run state {} -> {}", from, to);
        self.state = to;
        self.events.emit(ProgressEvent::StateChanged { from, to });
    }
}
