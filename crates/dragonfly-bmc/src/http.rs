//! HTTP transport backed by reqwest
//!
//! Each exchange runs as a task on the caller's tokio runtime (a
//! current-thread runtime keeps everything on one OS thread). Tasks stream
//! body chunks and their final result into one unbounded channel, which is
//! what [`Transport::ready`] waits on.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{BmcError, Result};
use crate::transport::{Transport, TransportEvent};
use crate::types::{Method, PowerRequest, RequestId, TransportConfig};

struct InFlight {
    deadline: Instant,
    task: JoinHandle<()>,
}

/// Redfish transport over HTTPS
pub struct HttpTransport {
    client: reqwest::Client,
    message_timeout: Duration,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    pending: VecDeque<TransportEvent>,
    in_flight: HashMap<RequestId, InFlight>,
}

impl HttpTransport {
    /// Build the shared HTTP client
    pub fn new(config: &TransportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.message_timeout)
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(|e| BmcError::InitFailed(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            client,
            message_timeout: config.message_timeout,
            events_tx,
            events_rx,
            pending: VecDeque::new(),
            in_flight: HashMap::new(),
        })
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("message_timeout", &self.message_timeout)
            .field("in_flight", &self.in_flight.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Perform one exchange, forwarding body chunks as they arrive
async fn exchange(
    client: &reqwest::Client,
    id: RequestId,
    request: &PowerRequest,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Result<()> {
    let mut builder = match request.method {
        Method::Get => client.get(&request.url),
        Method::Post => client
            .post(&request.url)
            .body(request.body.clone().unwrap_or_default()),
    };

    if let Some(header) = &request.header {
        builder = builder.header(header.name(), header.value());
    }
    if let Some(creds) = &request.credentials {
        builder = builder.basic_auth(&creds.username, Some(&creds.password));
    }

    let mut response = builder
        .send()
        .await
        .map_err(|e| BmcError::from_reqwest(&e))?;

    let status = response.status();
    debug!(id = %id, status = %status, "response received");
    check_status(status)?;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| BmcError::from_reqwest(&e))?
    {
        // Receiver lives as long as the transport; a send error means we
        // are shutting down.
        let _ = events.send(TransportEvent::Data { id, chunk });
    }

    Ok(())
}

/// 4xx and 5xx fail the exchange before any body is read
fn check_status(status: reqwest::StatusCode) -> Result<()> {
    if status.is_client_error() || status.is_server_error() {
        return Err(BmcError::HttpStatus(status.as_u16()));
    }
    Ok(())
}

#[async_trait]
impl Transport for HttpTransport {
    fn submit(&mut self, id: RequestId, request: PowerRequest) {
        debug!(id = %id, method = %request.method, url = %request.url, "submitting request");

        let client = self.client.clone();
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let result = exchange(&client, id, &request, &events).await;
            if let Err(e) = &result {
                debug!(id = %id, url = %request.url, error = %e, "request failed");
            }
            let _ = events.send(TransportEvent::Done { id, result });
        });

        let entry = InFlight {
            deadline: Instant::now() + self.message_timeout,
            task,
        };
        if let Some(previous) = self.in_flight.insert(id, entry) {
            warn!(id = %id, "request id reused while in flight, aborting the older exchange");
            previous.task.abort();
        }
    }

    fn cancel(&mut self, id: RequestId) {
        if let Some(entry) = self.in_flight.remove(&id) {
            debug!(id = %id, "cancelling request");
            entry.task.abort();
        }
    }

    fn next_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        self.in_flight
            .values()
            .map(|entry| entry.deadline.saturating_duration_since(now))
            .min()
    }

    async fn ready(&mut self) {
        if !self.pending.is_empty() {
            return;
        }
        loop {
            match self.events_rx.recv().await {
                Some(event) if self.in_flight.contains_key(&event.id()) => {
                    self.pending.push_back(event);
                    return;
                }
                Some(event) => {
                    debug!(id = %event.id(), "dropping event for cancelled request");
                }
                // We hold a sender ourselves, so this cannot happen
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn harvest(&mut self) -> Vec<TransportEvent> {
        while let Ok(event) = self.events_rx.try_recv() {
            self.pending.push_back(event);
        }

        let mut harvested = Vec::with_capacity(self.pending.len());
        for event in self.pending.drain(..) {
            let live = match &event {
                TransportEvent::Data { id, .. } => self.in_flight.contains_key(id),
                TransportEvent::Done { id, .. } => self.in_flight.remove(id).is_some(),
            };
            if live {
                harvested.push(event);
            }
        }
        harvested
    }

    fn outstanding(&self) -> usize {
        self.in_flight.len()
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        for entry in self.in_flight.values() {
            entry.task.abort();
        }
    }
}
