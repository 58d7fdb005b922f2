//! Scripted transport for driving the shell deterministically
//!
//! Each host has a queue of replies consumed one per submitted request;
//! the last reply repeats forever. Replies are released after their delay
//! on tokio's clock, so tests run with paused time.

#![allow(dead_code)]

use std::cell::Cell;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dragonfly_bmc::{BmcError, PowerRequest, RequestId, Transport, TransportEvent};
use dragonfly_power::{HostRegistry, Session, Shell};
use tokio::io::BufReader;
use tokio::time::{sleep_until, Instant};

/// Latency of every scripted reply unless stated otherwise
pub const LATENCY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub enum Scripted {
    /// Successful exchange delivering the body in several chunks
    Body { delay: Duration, body: String },
    /// Transport-level failure
    Fail { delay: Duration, error: BmcError },
}

impl Scripted {
    pub fn body(body: &str) -> Self {
        Scripted::Body {
            delay: LATENCY,
            body: body.to_string(),
        }
    }

    pub fn slow(body: &str, delay: Duration) -> Self {
        Scripted::Body {
            delay,
            body: body.to_string(),
        }
    }

    pub fn power(state: &str) -> Self {
        Self::body(&format!(r#"{{"PowerState":"{}"}}"#, state))
    }

    pub fn fail(error: BmcError) -> Self {
        Scripted::Fail {
            delay: LATENCY,
            error,
        }
    }

    fn delay(&self) -> Duration {
        match self {
            Scripted::Body { delay, .. } | Scripted::Fail { delay, .. } => *delay,
        }
    }
}

/// A request as the transport saw it
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: RequestId,
    pub host: String,
    pub request: PowerRequest,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    scripts: HashMap<String, VecDeque<Scripted>>,
    pending: Vec<(RequestId, Instant, Scripted)>,
    timeout_hint: Option<Duration>,
    timeout_queries: Cell<usize>,
    pub submissions: Vec<Submission>,
    pub cancels: Vec<RequestId>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(mut self, host: &str, replies: Vec<Scripted>) -> Self {
        self.scripts.insert(host.to_string(), replies.into());
        self
    }

    /// Wait the transport asks the loop to honor while busy
    pub fn with_next_timeout(mut self, hint: Option<Duration>) -> Self {
        self.timeout_hint = hint;
        self
    }

    /// How often the loop asked for a wait, i.e. busy iterations
    pub fn timeout_queries(&self) -> usize {
        self.timeout_queries.get()
    }

    fn next_reply(&mut self, host: &str) -> Scripted {
        let Some(queue) = self.scripts.get_mut(host) else {
            return Scripted::fail(BmcError::ConnectionFailed(format!("no script for {}", host)));
        };
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue
                .front()
                .cloned()
                .unwrap_or_else(|| Scripted::body(""))
        }
    }

    fn earliest(&self) -> Option<Instant> {
        self.pending.iter().map(|(_, due, _)| *due).min()
    }
}

fn host_of(url: &str) -> String {
    let rest = url.trim_start_matches("https://");
    rest.split('/').next().unwrap_or(rest).to_string()
}

#[async_trait]
impl Transport for FakeTransport {
    fn submit(&mut self, id: RequestId, request: PowerRequest) {
        let host = host_of(&request.url);
        let reply = self.next_reply(&host);
        let now = Instant::now();
        self.pending.push((id, now + reply.delay(), reply));
        self.submissions.push(Submission {
            id,
            host,
            request,
            at: now,
        });
    }

    fn cancel(&mut self, id: RequestId) {
        self.pending.retain(|(pending, _, _)| *pending != id);
        self.cancels.push(id);
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.timeout_queries.set(self.timeout_queries.get() + 1);
        self.timeout_hint
    }

    async fn ready(&mut self) {
        match self.earliest() {
            Some(due) => sleep_until(due).await,
            None => std::future::pending::<()>().await,
        }
    }

    fn harvest(&mut self) -> Vec<TransportEvent> {
        let now = Instant::now();
        let mut due: Vec<_> = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].1 <= now {
                due.push(self.pending.remove(i));
            } else {
                i += 1;
            }
        }
        due.sort_by_key(|(_, at, _)| *at);

        let mut events = Vec::new();
        for (id, _, reply) in due {
            match reply {
                Scripted::Body { body, .. } => {
                    // Split the body to exercise accumulation
                    let bytes = body.into_bytes();
                    let mid = bytes.len() / 2;
                    for chunk in [&bytes[..mid], &bytes[mid..]] {
                        if !chunk.is_empty() {
                            events.push(TransportEvent::Data {
                                id,
                                chunk: Bytes::copy_from_slice(chunk),
                            });
                        }
                    }
                    events.push(TransportEvent::Done { id, result: Ok(()) });
                }
                Scripted::Fail { error, .. } => {
                    events.push(TransportEvent::Done {
                        id,
                        result: Err(error),
                    });
                }
            }
        }
        events
    }

    fn outstanding(&self) -> usize {
        self.pending.len()
    }
}

/// Session over `hosts` with every path configured
pub fn session(hosts: &str) -> Session {
    use dragonfly_power::{ActionPath, OpKind};

    const RESET: &str = "redfish/v1/Systems/1/Actions/ComputerSystem.Reset";

    Session::new(HostRegistry::from_hostlist(hosts).unwrap())
        .with_stat_path("redfish/v1/Systems/1")
        .with_action(OpKind::On, ActionPath::new(RESET, r#"{"ResetType":"On"}"#))
        .with_action(OpKind::Off, ActionPath::new(RESET, r#"{"ResetType":"ForceOff"}"#))
        .with_action(OpKind::Cycle, ActionPath::new(RESET, r#"{"ResetType":"ForceRestart"}"#))
}

/// Run a shell to completion over scripted input
pub async fn run_shell(
    session: Session,
    transport: FakeTransport,
    input: tokio_test::io::Mock,
) -> Shell<FakeTransport, Vec<u8>> {
    let mut shell = Shell::new(session, transport, Vec::new());
    shell.run(BufReader::new(input)).await.unwrap();
    shell
}

/// Output lines with prompts removed
pub fn output_lines(shell: &Shell<FakeTransport, Vec<u8>>) -> Vec<String> {
    String::from_utf8_lossy(shell.output())
        .replace(dragonfly_power::PROMPT, "")
        .lines()
        .map(str::to_string)
        .collect()
}
