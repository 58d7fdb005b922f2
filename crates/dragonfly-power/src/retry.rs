//! Completion handling and the confirmation state machine
//!
//! Every completed operation is routed through the handler for its
//! [`OpKind`]. Stat reports what it read, cycle reports `ok`, and on/off
//! keep polling the status path until the goal state shows up or the
//! chain's deadline passes.

use std::time::Duration;

use dragonfly_bmc::{BmcError, InterpretError, PowerState};
use tokio::time::Instant;

use crate::operation::{OpKind, Operation};

/// Result word printed for a host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerResult {
    /// Action accepted, or on/off confirmed by a later status read
    Ok,
    /// Stat read `On`
    On,
    /// Stat read `Off`
    Off,
    /// Stat read a state other than on or off
    Unknown,
    /// Body was not a JSON object
    ParseError,
    /// Body had no `PowerState` string
    NoPowerState,
    /// Exchange succeeded with an empty body
    NoOutput,
    /// Chain deadline passed before the goal state showed up
    Timeout,
    /// Transport failure, HTTP error status or unusable configuration
    Error,
}

impl PowerResult {
    /// The word printed after `<host>: `
    pub fn as_str(self) -> &'static str {
        match self {
            PowerResult::Ok => "ok",
            PowerResult::On => "on",
            PowerResult::Off => "off",
            PowerResult::Unknown => "unknown",
            PowerResult::ParseError => "parse error",
            PowerResult::NoPowerState => "no powerstate",
            PowerResult::NoOutput => "no output error",
            PowerResult::Timeout => "timeout",
            PowerResult::Error => "error",
        }
    }
}

impl std::fmt::Display for PowerResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PowerState> for PowerResult {
    fn from(state: PowerState) -> Self {
        match state {
            PowerState::On => PowerResult::On,
            PowerState::Off => PowerResult::Off,
            PowerState::Unknown => PowerResult::Unknown,
        }
    }
}

impl From<&InterpretError> for PowerResult {
    fn from(err: &InterpretError) -> Self {
        match err {
            InterpretError::EmptyResponse => PowerResult::NoOutput,
            InterpretError::MalformedPayload(_) => PowerResult::ParseError,
            InterpretError::MissingField => PowerResult::NoPowerState,
        }
    }
}

/// Where a chain goes after one of its operations completes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Terminal, report the result
    Confirmed(PowerResult),
    /// Terminal, the chain ran past its deadline
    TimedOut,
    /// Terminal, the exchange itself failed
    Failed,
    /// Poll the status path again at `fire_at`
    Pending { fire_at: Instant },
}

impl Transition {
    /// Result to print, `None` while the chain continues
    pub fn result(&self) -> Option<PowerResult> {
        match self {
            Transition::Confirmed(result) => Some(*result),
            Transition::TimedOut => Some(PowerResult::Timeout),
            Transition::Failed => Some(PowerResult::Error),
            Transition::Pending { .. } => None,
        }
    }
}

/// A transition plus the detail lines printed in verbose mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub transition: Transition,
    pub details: Vec<String>,
}

impl Resolution {
    fn new(transition: Transition) -> Self {
        Self {
            transition,
            details: Vec::new(),
        }
    }

    fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

type Handler = fn(&Operation, Duration, Instant) -> Resolution;

fn handler(kind: OpKind) -> Handler {
    match kind {
        OpKind::Stat => stat_complete,
        OpKind::On | OpKind::Off => confirm_complete,
        OpKind::Cycle => cycle_complete,
    }
}

/// Decide what happens to a completed operation
///
/// A transport failure ends the chain for every kind; only a successful
/// exchange that has not reached the goal state is retried.
pub fn on_complete(
    op: &Operation,
    outcome: &Result<(), BmcError>,
    poll_delay: Duration,
    now: Instant,
) -> Resolution {
    match outcome {
        Err(err) => Resolution::new(Transition::Failed).with_details(vec![err.to_string()]),
        Ok(()) => handler(op.kind())(op, poll_delay, now),
    }
}

/// Interpret the body, collecting verbose detail lines
fn read_state(op: &Operation) -> (PowerResult, Vec<String>) {
    match op.interpret() {
        Ok(state) => (state.into(), Vec::new()),
        Err(err) => {
            let details = match &err {
                InterpretError::MalformedPayload(detail) => {
                    vec![format!("parse response error {}", detail)]
                }
                InterpretError::MissingField => vec!["no PowerState".to_string()],
                InterpretError::EmptyResponse => Vec::new(),
            };
            (PowerResult::from(&err), details)
        }
    }
}

fn stat_complete(op: &Operation, _poll_delay: Duration, _now: Instant) -> Resolution {
    let (result, details) = read_state(op);
    Resolution::new(Transition::Confirmed(result)).with_details(details)
}

fn cycle_complete(_op: &Operation, _poll_delay: Duration, _now: Instant) -> Resolution {
    Resolution::new(Transition::Confirmed(PowerResult::Ok))
}

fn confirm_complete(op: &Operation, poll_delay: Duration, now: Instant) -> Resolution {
    let mut details = Vec::new();
    if op.awaiting_confirmation() {
        let (result, notes) = read_state(op);
        details = notes;
        if op.kind().goal().map(PowerResult::from) == Some(result) {
            return Resolution::new(Transition::Confirmed(PowerResult::Ok)).with_details(details);
        }
    }

    let transition = if op.chain().is_expired(now) {
        Transition::TimedOut
    } else {
        Transition::Pending {
            fire_at: now + poll_delay,
        }
    };
    Resolution::new(transition).with_details(details)
}
