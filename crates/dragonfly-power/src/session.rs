//! Session configuration
//!
//! Everything the operator can change from the shell lives in one
//! [`Session`], owned by the event loop and passed by reference to the
//! dispatcher and the lifecycle manager. It is only mutated by
//! configuration commands, between loop iterations.

use std::time::Duration;

use dragonfly_bmc::{Credentials, ExtraHeader};
use tracing::info;

use crate::error::{PowerError, Result};
use crate::hostlist::HostRegistry;
use crate::operation::OpKind;

/// Overall deadline for an on/off/cycle/stat command, including confirmation polls
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Delay between confirmation polls. Controllers take anywhere from a few
/// seconds to ~20s to settle after a power action.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(1);

/// Wait used when the transport has no timeout preference
pub const INCREMENTAL_WAIT: Duration = Duration::from_millis(500);

/// Path and POST body for one power action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionPath {
    /// Path below `https://<host>/`
    pub path: Option<String>,
    /// POST body
    pub postdata: Option<String>,
}

impl ActionPath {
    /// Create an action path with both halves set
    pub fn new(path: impl Into<String>, postdata: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            postdata: Some(postdata.into()),
        }
    }
}

/// Mutable per-session settings plus the host registry
#[derive(Debug, Clone)]
pub struct Session {
    /// Hosts this session may address
    pub hosts: HostRegistry,
    /// Extra header sent with every request
    pub header: Option<ExtraHeader>,
    /// Basic auth credentials
    pub credentials: Option<Credentials>,
    /// Status path, also used by confirmation polls
    pub stat_path: Option<String>,
    /// `on` action
    pub on: ActionPath,
    /// `off` action
    pub off: ActionPath,
    /// `cycle` action
    pub cycle: ActionPath,
    /// Overall deadline for a command, read when a chain starts
    pub command_timeout: Duration,
    /// Delay before each confirmation poll
    pub poll_delay: Duration,
    /// Print detail lines next to results
    pub verbose: bool,
}

impl Session {
    /// Create a session for a host registry with default settings
    pub fn new(hosts: HostRegistry) -> Self {
        Self {
            hosts,
            header: None,
            credentials: None,
            stat_path: None,
            on: ActionPath::default(),
            off: ActionPath::default(),
            cycle: ActionPath::default(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            poll_delay: DEFAULT_POLL_DELAY,
            verbose: false,
        }
    }

    /// Set the status path
    pub fn with_stat_path(mut self, path: impl Into<String>) -> Self {
        self.stat_path = Some(path.into());
        self
    }

    /// Set the path and body of a power action
    pub fn with_action(mut self, kind: OpKind, action: ActionPath) -> Self {
        if let Some(slot) = self.action_mut(kind) {
            *slot = action;
        }
        self
    }

    /// Set the extra header
    pub fn with_header(mut self, header: ExtraHeader) -> Self {
        self.header = Some(header);
        self
    }

    /// Set basic auth credentials
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the command timeout
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the confirmation poll delay
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Enable or disable detail lines
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Action settings for a power kind; `None` for `stat`
    pub fn action(&self, kind: OpKind) -> Option<&ActionPath> {
        match kind {
            OpKind::Stat => None,
            OpKind::On => Some(&self.on),
            OpKind::Off => Some(&self.off),
            OpKind::Cycle => Some(&self.cycle),
        }
    }

    fn action_mut(&mut self, kind: OpKind) -> Option<&mut ActionPath> {
        match kind {
            OpKind::Stat => None,
            OpKind::On => Some(&mut self.on),
            OpKind::Off => Some(&mut self.off),
            OpKind::Cycle => Some(&mut self.cycle),
        }
    }

    /// Path and body an original operation of `kind` would use
    ///
    /// Stat gets the status path and no body. On and off also require the
    /// status path, since their confirmation polls use it.
    pub fn request_parts(&self, kind: OpKind) -> Result<(&str, Option<&str>)> {
        let stat_path = self.stat_path.as_deref();
        match self.action(kind) {
            None => Ok((stat_path.ok_or(PowerError::StatPathNotSet)?, None)),
            Some(action) => {
                if kind.needs_confirmation() && stat_path.is_none() {
                    return Err(PowerError::StatPathNotSet);
                }
                let path = action.path.as_deref().ok_or(PowerError::PathNotSet(kind))?;
                let body = action
                    .postdata
                    .as_deref()
                    .ok_or(PowerError::PostDataNotSet(kind))?;
                Ok((path, Some(body)))
            }
        }
    }

    /// `auth user:passwd`
    pub fn set_auth(&mut self, userpwd: Option<&str>) -> Result<()> {
        let userpwd = userpwd.ok_or(PowerError::Usage("auth user:passwd"))?;
        let credentials = Credentials::parse(userpwd)?;
        info!(username = %credentials.username, "credentials updated");
        self.credentials = Some(credentials);
        Ok(())
    }

    /// `setheader [string]`; no argument clears the header
    pub fn set_header(&mut self, header: Option<&str>) -> Result<()> {
        self.header = header.map(ExtraHeader::parse).transpose()?;
        info!(header = ?self.header, "extra header updated");
        Ok(())
    }

    /// `setstatpath [path]`; no argument clears it
    pub fn set_stat_path(&mut self, path: Option<&str>) {
        self.stat_path = path.map(str::to_string);
        info!(path = ?self.stat_path, "stat path updated");
    }

    /// `setonpath|setoffpath|setcyclepath [path] [postdata]`
    ///
    /// Both halves are replaced: missing arguments clear them.
    pub fn set_action(&mut self, kind: OpKind, path: Option<&str>, postdata: Option<&str>) {
        if let Some(action) = self.action_mut(kind) {
            *action = ActionPath {
                path: path.map(str::to_string),
                postdata: postdata.map(str::to_string),
            };
            info!(kind = %kind, path = ?path, "power action updated");
        }
    }

    /// `settimeout seconds`
    ///
    /// Only affects chains started afterwards. An invalid value leaves the
    /// current timeout in place.
    pub fn set_timeout(&mut self, seconds: Option<&str>) -> Result<()> {
        let seconds = seconds.ok_or(PowerError::Usage("settimeout seconds"))?;
        match seconds.parse::<u64>() {
            Ok(secs) if secs > 0 => {
                self.command_timeout = Duration::from_secs(secs);
                info!(seconds = secs, "command timeout updated");
                Ok(())
            }
            _ => Err(PowerError::InvalidTimeout(seconds.to_string())),
        }
    }
}
