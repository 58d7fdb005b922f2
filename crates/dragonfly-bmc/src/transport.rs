//! Transport capability
//!
//! The power engine never talks HTTP directly. It submits requests under a
//! [`RequestId`], waits until the transport has something to report, and
//! then harvests the reported events. Response bytes arrive as
//! [`TransportEvent::Data`] chunks followed by exactly one
//! [`TransportEvent::Done`] per request.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BmcError;
use crate::types::{PowerRequest, RequestId};

/// Something a transport reports about a submitted request
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A chunk of response body
    Data { id: RequestId, chunk: Bytes },
    /// The exchange finished, successfully or not
    Done {
        id: RequestId,
        result: Result<(), BmcError>,
    },
}

impl TransportEvent {
    /// Request this event belongs to
    pub fn id(&self) -> RequestId {
        match self {
            TransportEvent::Data { id, .. } | TransportEvent::Done { id, .. } => *id,
        }
    }
}

/// Multiplexed request transport
///
/// Implementations must make [`Transport::ready`] cancel safe: the event
/// loop races it against stdin and timers and drops it when another branch
/// wins.
#[async_trait]
pub trait Transport: Send {
    /// Start an exchange
    fn submit(&mut self, id: RequestId, request: PowerRequest);

    /// Forget an exchange. Events for `id` are never harvested afterwards.
    /// Cancelling an unknown or finished id is a no-op.
    fn cancel(&mut self, id: RequestId);

    /// Advisory upper bound on how long the caller may wait before the
    /// transport needs attention. `None` means no preference.
    fn next_timeout(&self) -> Option<Duration>;

    /// Wait until at least one event can be harvested
    ///
    /// Never completes while nothing is outstanding.
    async fn ready(&mut self);

    /// Take every event reported so far, in delivery order
    fn harvest(&mut self) -> Vec<TransportEvent>;

    /// Number of exchanges not yet reported as done
    fn outstanding(&self) -> usize;
}
