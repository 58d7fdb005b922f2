//! Operations and their lifecycle
//!
//! An [`Operation`] is one outstanding exchange with one host. Operations
//! belonging to the same on/off request form a retry chain: the original
//! POST plus any confirmation polls created after it. Every member of a
//! chain shares one [`Chain`], so the deadline is fixed when the chain
//! starts and is never recomputed.

use std::time::Duration;

use bytes::BytesMut;
use dragonfly_bmc::{interpret, InterpretError, PowerRequest, PowerState, RequestId, Transport};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{PowerError, Result};
use crate::session::Session;

/// What an operation does. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Query power state
    Stat,
    /// Power on, then confirm
    On,
    /// Power off, then confirm
    Off,
    /// Power cycle, fire and forget
    Cycle,
}

impl OpKind {
    /// Every kind, in shell order
    pub const ALL: [OpKind; 4] = [OpKind::Stat, OpKind::On, OpKind::Off, OpKind::Cycle];

    /// Command word
    pub fn as_str(self) -> &'static str {
        match self {
            OpKind::Stat => "stat",
            OpKind::On => "on",
            OpKind::Off => "off",
            OpKind::Cycle => "cycle",
        }
    }

    /// Parse a command word
    pub fn from_command(word: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == word)
    }

    /// State a confirmation poll waits for
    pub fn goal(self) -> Option<PowerState> {
        match self {
            OpKind::On => Some(PowerState::On),
            OpKind::Off => Some(PowerState::Off),
            OpKind::Stat | OpKind::Cycle => None,
        }
    }

    /// On and off are confirmed by polling the status path
    pub fn needs_confirmation(self) -> bool {
        self.goal().is_some()
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start time and deadline shared by a retry chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chain {
    start: Instant,
    deadline: Instant,
}

impl Chain {
    /// Start a chain now, reading the timeout exactly once
    pub fn begin(now: Instant, timeout: Duration) -> Result<Self> {
        let deadline = now
            .checked_add(timeout)
            .ok_or(PowerError::DeadlineOverflow)?;
        Ok(Self {
            start: now,
            deadline,
        })
    }

    /// When the original operation was created
    pub fn start(&self) -> Instant {
        self.start
    }

    /// When the chain gives up
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Strictly past the deadline
    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.deadline
    }
}

/// One outstanding exchange with one host
#[derive(Debug)]
pub struct Operation {
    id: RequestId,
    target: String,
    kind: OpKind,
    request: PowerRequest,
    output: BytesMut,
    chain: Chain,
    awaiting_confirmation: bool,
    fire_at: Option<Instant>,
}

impl Operation {
    /// Transport identity
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Host this operation talks to
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Operation kind
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    /// Fully resolved URL
    pub fn endpoint(&self) -> &str {
        &self.request.url
    }

    /// POST body, if any
    pub fn body(&self) -> Option<&str> {
        self.request.body.as_deref()
    }

    /// Request handed to the transport
    pub fn request(&self) -> &PowerRequest {
        &self.request
    }

    /// Retry chain this operation belongs to
    pub fn chain(&self) -> Chain {
        self.chain
    }

    /// True for confirmation polls
    pub fn awaiting_confirmation(&self) -> bool {
        self.awaiting_confirmation
    }

    /// When a delayed operation becomes due
    pub fn fire_at(&self) -> Option<Instant> {
        self.fire_at
    }

    /// Response bytes received so far
    pub fn output(&self) -> &[u8] {
        &self.output
    }

    /// Append a chunk delivered by the transport
    pub fn append_output(&mut self, chunk: &[u8]) {
        self.output.extend_from_slice(chunk);
    }

    /// Interpret the accumulated response
    pub fn interpret(&self) -> std::result::Result<PowerState, InterpretError> {
        interpret(&self.output)
    }

    /// Clear the fire time once the operation leaves the delayed queue
    pub(crate) fn mark_released(&mut self) {
        self.fire_at = None;
    }
}

/// Creates, submits and destroys operations
///
/// Holds no collection of operations, only the id counter and a count of
/// operations that were created but not yet destroyed.
#[derive(Debug, Default)]
pub struct Lifecycle {
    next_id: u64,
    live: usize,
}

impl Lifecycle {
    /// Create a lifecycle manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations created and not yet destroyed
    pub fn live(&self) -> usize {
        self.live
    }

    /// Create the original operation of a chain
    ///
    /// Stamps `now` as the chain start and computes the deadline from the
    /// session's current command timeout.
    pub fn create(
        &mut self,
        session: &Session,
        target: &str,
        kind: OpKind,
        now: Instant,
    ) -> Result<Operation> {
        let (path, body) = session.request_parts(kind)?;
        let chain = Chain::begin(now, session.command_timeout)?;
        Ok(self.build(session, target, kind, path, body, chain, None, false))
    }

    /// Create a confirmation poll following `predecessor`
    ///
    /// The poll inherits the predecessor's chain unchanged and is parked
    /// until `fire_at`.
    pub fn follow_up(
        &mut self,
        session: &Session,
        predecessor: &Operation,
        fire_at: Instant,
    ) -> Result<Operation> {
        let path = session
            .stat_path
            .as_deref()
            .ok_or(PowerError::StatPathNotSet)?;
        Ok(self.build(
            session,
            &predecessor.target,
            predecessor.kind,
            path,
            None,
            predecessor.chain,
            Some(fire_at),
            true,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &mut self,
        session: &Session,
        target: &str,
        kind: OpKind,
        path: &str,
        body: Option<&str>,
        chain: Chain,
        fire_at: Option<Instant>,
        awaiting_confirmation: bool,
    ) -> Operation {
        self.next_id += 1;
        self.live += 1;
        let id = RequestId(self.next_id);

        let request = match body {
            Some(body) if !awaiting_confirmation => PowerRequest::post(target, path, body),
            _ => PowerRequest::get(target, path),
        }
        .with_header(session.header.clone())
        .with_credentials(session.credentials.clone());

        debug!(
            id = %id,
            host = %target,
            kind = %kind,
            url = %request.url,
            confirm = awaiting_confirmation,
            "operation created"
        );

        Operation {
            id,
            target: target.to_string(),
            kind,
            request,
            output: BytesMut::new(),
            chain,
            awaiting_confirmation,
            fire_at,
        }
    }

    /// Hand an operation to the transport
    pub fn submit<T: Transport + ?Sized>(&self, transport: &mut T, op: &Operation) {
        debug_assert!(op.fire_at.is_none() || op.awaiting_confirmation);
        debug!(id = %op.id, host = %op.target, method = %op.request.method, "operation submitted");
        transport.submit(op.id, op.request.clone());
    }

    /// Release an operation and deregister it from the transport
    ///
    /// Takes the operation by value, so it cannot be destroyed twice.
    pub fn destroy<T: Transport + ?Sized>(&mut self, transport: &mut T, op: Operation) {
        transport.cancel(op.id);
        self.live = self.live.saturating_sub(1);
        debug!(id = %op.id, host = %op.target, "operation destroyed");
    }
}
