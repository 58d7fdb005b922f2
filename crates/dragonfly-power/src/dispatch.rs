//! Shell command parsing and dispatch
//!
//! A line is split on whitespace into a command word and its arguments.
//! Configuration commands change the [`Session`] in place; power commands
//! fan out into one [`Operation`] per target host.

use tokio::time::Instant;
use tracing::debug;

use crate::error::{PowerError, Result};
use crate::operation::{Chain, Lifecycle, OpKind, Operation};
use crate::session::Session;

/// Text printed by `help`
pub const HELP: &str = "\
Valid commands are:
  auth user:passwd
  setheader string
  setstatpath url
  setonpath url [data]
  setoffpath url [data]
  setcyclepath url [data]
  settimeout seconds
  stat [nodes]
  on [nodes]
  off [nodes]
  cycle [nodes]
  quit";

/// One parsed shell line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Blank line
    Empty,
    Help,
    Quit,
    Auth(Option<String>),
    /// Everything after the command word, so header values may hold spaces
    SetHeader(Option<String>),
    SetStatPath(Option<String>),
    SetPath {
        kind: OpKind,
        path: Option<String>,
        postdata: Option<String>,
    },
    SetTimeout(Option<String>),
    Power {
        kind: OpKind,
        hosts: Option<String>,
    },
    Unknown(String),
}

impl Command {
    /// Parse one input line
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let mut words = line.split_whitespace();
        let Some(word) = words.next() else {
            return Command::Empty;
        };
        let mut arg = || words.next().map(str::to_string);

        match word {
            "help" => Command::Help,
            "quit" => Command::Quit,
            "auth" => Command::Auth(arg()),
            "setheader" => {
                let rest = line[word.len()..].trim();
                Command::SetHeader((!rest.is_empty()).then(|| rest.to_string()))
            }
            "setstatpath" => Command::SetStatPath(arg()),
            "setonpath" | "setoffpath" | "setcyclepath" => {
                let kind = match word {
                    "setonpath" => OpKind::On,
                    "setoffpath" => OpKind::Off,
                    _ => OpKind::Cycle,
                };
                let path = arg();
                let postdata = arg();
                Command::SetPath {
                    kind,
                    path,
                    postdata,
                }
            }
            "settimeout" => Command::SetTimeout(arg()),
            other => match OpKind::from_command(other) {
                Some(kind) => Command::Power { kind, hosts: arg() },
                None => Command::Unknown(other.to_string()),
            },
        }
    }
}

/// What the event loop does after a command
#[derive(Debug)]
pub enum Reply {
    /// Nothing to print
    Done,
    /// Print a message for the operator
    Message(&'static str),
    /// Submit freshly created operations, in host order
    Submit(Vec<Operation>),
    /// Leave the loop
    Quit,
}

/// Execute one command against the session
///
/// Errors are operator-facing and leave the session unchanged. A power
/// command either creates an operation for every target or none at all.
pub fn dispatch(
    command: Command,
    session: &mut Session,
    lifecycle: &mut Lifecycle,
    now: Instant,
) -> Result<Reply> {
    match command {
        Command::Empty => Ok(Reply::Done),
        Command::Help => Ok(Reply::Message(HELP)),
        Command::Quit => Ok(Reply::Quit),
        Command::Auth(userpwd) => {
            session.set_auth(userpwd.as_deref())?;
            Ok(Reply::Done)
        }
        Command::SetHeader(header) => {
            session.set_header(header.as_deref())?;
            Ok(Reply::Done)
        }
        Command::SetStatPath(path) => {
            session.set_stat_path(path.as_deref());
            Ok(Reply::Done)
        }
        Command::SetPath {
            kind,
            path,
            postdata,
        } => {
            session.set_action(kind, path.as_deref(), postdata.as_deref());
            Ok(Reply::Done)
        }
        Command::SetTimeout(seconds) => {
            session.set_timeout(seconds.as_deref())?;
            Ok(Reply::Done)
        }
        Command::Power { kind, hosts } => {
            fan_out(kind, hosts.as_deref(), session, lifecycle, now).map(Reply::Submit)
        }
        Command::Unknown(word) => Err(PowerError::UnknownCommand(word)),
    }
}

fn fan_out(
    kind: OpKind,
    hosts: Option<&str>,
    session: &Session,
    lifecycle: &mut Lifecycle,
    now: Instant,
) -> Result<Vec<Operation>> {
    // Everything that can fail is checked before the first operation exists
    session.request_parts(kind)?;
    Chain::begin(now, session.command_timeout)?;
    let targets = session.hosts.resolve(hosts)?;

    debug!(kind = %kind, hosts = targets.len(), "dispatching power command");
    targets
        .iter()
        .map(|target| lifecycle.create(session, target, kind, now))
        .collect()
}
