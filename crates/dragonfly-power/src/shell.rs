//! The event loop
//!
//! [`Shell`] owns the session, the in-flight set and the delayed queue, and
//! multiplexes three event sources behind one wait per iteration: operator
//! input, transport readiness and the earliest delayed fire time. All
//! processing between waits runs to completion.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use dragonfly_bmc::{BmcError, RequestId, Transport, TransportEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::delayed::DelayedQueue;
use crate::dispatch::{dispatch, Command, Reply};
use crate::error::Result;
use crate::operation::{Lifecycle, Operation};
use crate::retry::{on_complete, PowerResult, Resolution, Transition};
use crate::session::{Session, INCREMENTAL_WAIT};

/// Shown when nothing is outstanding
pub const PROMPT: &str = "redfishpower> ";

enum Wake {
    /// Bytes read into the line buffer; zero with an empty buffer is EOF
    Input(std::io::Result<usize>),
    Transport,
    Timer,
}

/// Interactive power control shell
pub struct Shell<T: Transport, W: Write> {
    session: Session,
    lifecycle: Lifecycle,
    transport: T,
    in_flight: HashMap<RequestId, Operation>,
    delayed: DelayedQueue,
    out: W,
}

impl<T: Transport, W: Write> Shell<T, W> {
    /// Create a shell writing results to `out`
    pub fn new(session: Session, transport: T, out: W) -> Self {
        Self {
            session,
            lifecycle: Lifecycle::new(),
            transport,
            in_flight: HashMap::new(),
            delayed: DelayedQueue::new(),
            out,
        }
    }

    /// Session settings
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Operation bookkeeping
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// The transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Result output
    pub fn output(&self) -> &W {
        &self.out
    }

    /// Consume the shell, returning the transport and output
    pub fn into_parts(self) -> (T, W) {
        (self.transport, self.out)
    }

    /// Operations submitted and not yet resolved
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Operations waiting for their fire time
    pub fn delayed(&self) -> usize {
        self.delayed.len()
    }

    /// Run until `quit` or end of input
    ///
    /// Anything still outstanding on exit is discarded without printing,
    /// including when the loop stops on an I/O error.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        let result = self.event_loop(input).await;
        self.discard_all();
        result
    }

    async fn event_loop<R: AsyncBufRead + Unpin>(&mut self, mut input: R) -> Result<()> {
        // Partial lines survive a read that loses the select
        let mut buf = Vec::new();

        loop {
            let wake = if self.is_idle() {
                write!(self.out, "{}", PROMPT)?;
                self.out.flush()?;
                Wake::Input(input.read_until(b'\n', &mut buf).await)
            } else {
                let now = Instant::now();
                self.release_due(now);
                let transport_wait = self.transport.next_timeout();
                let wait = effective_wait(self.delayed.next_wait(now), transport_wait);
                let busy = !self.in_flight.is_empty();

                tokio::select! {
                    read = input.read_until(b'\n', &mut buf) => Wake::Input(read),
                    _ = self.transport.ready(), if busy => Wake::Transport,
                    _ = sleep(wait) => Wake::Timer,
                }
            };

            match wake {
                Wake::Input(Ok(0)) if buf.is_empty() => {
                    info!("end of input");
                    return Ok(());
                }
                Wake::Input(Ok(_)) => {
                    let line = decode_line(&buf);
                    buf.clear();
                    if !self.handle_line(&line)? {
                        info!("quit requested");
                        return Ok(());
                    }
                }
                Wake::Input(Err(err)) => return Err(err.into()),
                Wake::Transport | Wake::Timer => {}
            }

            if !self.in_flight.is_empty() {
                self.process_events()?;
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && self.delayed.is_empty()
    }

    /// Submit every delayed operation whose fire time has passed
    fn release_due(&mut self, now: Instant) {
        for op in self.delayed.pop_due(now) {
            debug!(id = %op.id(), host = %op.target(), "delayed operation due");
            self.submit(op);
        }
    }

    fn submit(&mut self, op: Operation) {
        self.lifecycle.submit(&mut self.transport, &op);
        self.in_flight.insert(op.id(), op);
    }

    /// Dispatch one line; `false` means leave the loop
    fn handle_line(&mut self, line: &str) -> Result<bool> {
        let command = Command::parse(line);
        let now = Instant::now();

        match dispatch(command, &mut self.session, &mut self.lifecycle, now) {
            Ok(Reply::Done) => {}
            Ok(Reply::Message(text)) => writeln!(self.out, "{}", text)?,
            Ok(Reply::Submit(ops)) => {
                for op in ops {
                    self.submit(op);
                }
            }
            Ok(Reply::Quit) => return Ok(false),
            Err(err) => writeln!(self.out, "{}", err)?,
        }
        self.out.flush()?;
        Ok(true)
    }

    /// Harvest transport events and resolve completed operations
    fn process_events(&mut self) -> Result<()> {
        for event in self.transport.harvest() {
            match event {
                TransportEvent::Data { id, chunk } => match self.in_flight.get_mut(&id) {
                    Some(op) => op.append_output(&chunk),
                    None => warn!(id = %id, "data for unknown operation"),
                },
                TransportEvent::Done { id, result } => match self.in_flight.remove(&id) {
                    Some(op) => self.resolve(op, result)?,
                    None => warn!(id = %id, "completion for unknown operation"),
                },
            }
        }
        Ok(())
    }

    fn resolve(&mut self, op: Operation, result: std::result::Result<(), BmcError>) -> Result<()> {
        let now = Instant::now();
        let resolution = on_complete(&op, &result, self.session.poll_delay, now);
        debug!(
            id = %op.id(),
            host = %op.target(),
            transition = ?resolution.transition,
            "operation completed"
        );

        // The operation is gone whether or not the report reaches the operator
        let reported = self.report(&op, resolution, now);
        self.lifecycle.destroy(&mut self.transport, op);
        reported
    }

    fn report(&mut self, op: &Operation, resolution: Resolution, now: Instant) -> Result<()> {
        match resolution.transition {
            Transition::Pending { fire_at } => {
                self.print_details(op.target(), &resolution.details)?;
                match self.lifecycle.follow_up(&self.session, op, fire_at) {
                    Ok(next) => self.delayed.push(next, now),
                    Err(err) => {
                        warn!(
                            host = %op.target(),
                            error = %err,
                            "cannot schedule confirmation poll"
                        );
                        self.print_result(op.target(), PowerResult::Error)?;
                        self.print_details(op.target(), &[err.to_string()])?;
                    }
                }
            }
            Transition::Failed => {
                self.print_result(op.target(), PowerResult::Error)?;
                self.print_details(op.target(), &resolution.details)?;
            }
            ref terminal => {
                self.print_details(op.target(), &resolution.details)?;
                if let Some(result) = terminal.result() {
                    self.print_result(op.target(), result)?;
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }

    fn print_result(&mut self, host: &str, result: PowerResult) -> Result<()> {
        writeln!(self.out, "{}: {}", host, result)?;
        Ok(())
    }

    fn print_details(&mut self, host: &str, details: &[String]) -> Result<()> {
        if self.session.verbose {
            for detail in details {
                writeln!(self.out, "{}: {}", host, detail)?;
            }
        }
        Ok(())
    }

    /// Destroy every unresolved operation without waiting for it
    fn discard_all(&mut self) {
        let in_flight: Vec<_> = self.in_flight.drain().map(|(_, op)| op).collect();
        let delayed = self.delayed.drain();
        if !in_flight.is_empty() || !delayed.is_empty() {
            info!(
                in_flight = in_flight.len(),
                delayed = delayed.len(),
                "discarding outstanding operations"
            );
        }
        for op in in_flight.into_iter().chain(delayed) {
            self.lifecycle.destroy(&mut self.transport, op);
        }
    }
}

impl<T: Transport, W: Write> std::fmt::Debug for Shell<T, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shell")
            .field("in_flight", &self.in_flight.len())
            .field("delayed", &self.delayed)
            .field("live", &self.lifecycle.live())
            .finish()
    }
}

/// Operator input is not required to be UTF-8; bad bytes become U+FFFD and
/// the line is dispatched like any other
fn decode_line(buf: &[u8]) -> String {
    let line = String::from_utf8_lossy(buf);
    line.trim_end_matches(['\n', '\r']).to_string()
}

/// Minimum of the earliest delayed fire time and the transport's own
/// preference, which falls back to [`INCREMENTAL_WAIT`]
fn effective_wait(delayed: Option<Duration>, transport: Option<Duration>) -> Duration {
    // A zero transport wait would spin
    let transport = transport
        .filter(|wait| !wait.is_zero())
        .unwrap_or(INCREMENTAL_WAIT);
    match delayed {
        Some(delayed) => delayed.min(transport),
        None => transport,
    }
}
