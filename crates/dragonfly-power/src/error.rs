//! Error types for the power control engine
//!
//! Most variants are operator-facing: the shell prints their display text
//! and carries on. Only [`PowerError::Io`] and [`PowerError::HostsFile`]
//! end a session.

use std::path::PathBuf;

use dragonfly_bmc::BmcError;
use thiserror::Error;

use crate::operation::OpKind;

/// Error type for power control
#[derive(Debug, Error)]
pub enum PowerError {
    /// `stat`, `on` and `off` need a status path
    #[error("Statpath not setup")]
    StatPathNotSet,

    /// Power action path missing
    #[error("{0} path not setup")]
    PathNotSet(OpKind),

    /// Power action body missing
    #[error("{0} postdata not setup")]
    PostDataNotSet(OpKind),

    /// Hostlist expression could not be parsed; the operator sees only the
    /// fixed message, the expression is kept for logs
    #[error("illegal hosts input")]
    IllegalHosts(String),

    /// Host is not part of the registry
    #[error("unknown host specified: {0}")]
    UnknownHost(String),

    /// Command is missing a required argument
    #[error("Usage: {0}")]
    Usage(&'static str),

    /// `settimeout` argument is not a positive integer
    #[error("invalid timeout specified")]
    InvalidTimeout(String),

    /// `setheader` / `auth` argument rejected
    #[error("{0}")]
    InvalidSetting(#[from] BmcError),

    /// Not a known shell command
    #[error("type \"help\" for a list of commands")]
    UnknownCommand(String),

    /// Host registry is empty
    #[error("no hosts specified")]
    NoHosts,

    /// Timeout does not fit on the clock
    #[error("command timeout overflow")]
    DeadlineOverflow,

    /// Hosts file could not be read
    #[error("error opening file {path}: {source}")]
    HostsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// stdin / stdout failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for power control
pub type Result<T> = std::result::Result<T, PowerError>;
