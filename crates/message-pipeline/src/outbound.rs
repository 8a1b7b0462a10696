//! Outbound dispatch for one account.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use mam_sync::{Transport, TransportError};
use message_archive::{Archive, Direction, MessageRecord, Metadata};
use stanza_model::Element;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::PipelineResult;

/// Outcome of one transmission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    /// Another attempt for the same message is running.
    InFlight,
    /// No route right now; the message stays pending for the next reconnect.
    Deferred,
    /// The error was recorded on the message.
    Failed(TransportError),
    /// Inbound, already transmitted, errored or thrashed.
    NotPending,
}

struct Inner {
    archive: Archive,
    transport: Arc<dyn Transport>,
    in_flight: Mutex<HashSet<Uuid>>,
}

/// Sends archived outbound messages and records what happened.
#[derive(Clone)]
pub struct OutboundDispatcher {
    inner: Arc<Inner>,
}

/// Releases a claimed message id when dropped.
struct Claim<'a> {
    in_flight: &'a Mutex<HashSet<Uuid>>,
    id: Uuid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.id);
    }
}

fn lock(in_flight: &Mutex<HashSet<Uuid>>) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl OutboundDispatcher {
    pub fn new(archive: Archive, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(Inner {
                archive,
                transport,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn archive(&self) -> &Archive {
        &self.inner.archive
    }

    /// Archive a message composed by the account, then transmit it.
    pub async fn submit(&self, stanza: Element) -> PipelineResult<(MessageRecord, Dispatch)> {
        let record = self.inner.archive.insert(stanza, Metadata::created_now()).await?;
        let dispatch = self.transmit(record.id).await?;
        Ok((record, dispatch))
    }

    /// Transmit one archived message if it is still pending.
    pub async fn transmit(&self, id: Uuid) -> PipelineResult<Dispatch> {
        let Some(_claim) = self.claim(id) else {
            debug!(uuid = %id, "Message already in flight");
            return Ok(Dispatch::InFlight);
        };

        // Checked after claiming so a finished attempt is never repeated.
        let archive = &self.inner.archive;
        let record = archive.message(id).await?;
        let metadata = archive.metadata(id).await?;
        if record.direction != Direction::Outbound || !metadata.is_pending() {
            return Ok(Dispatch::NotPending);
        }

        let document = archive.document(id).await?;
        match self.inner.transport.send(document).await {
            Ok(()) => {
                archive.update_transmission(id, Some(Utc::now()), None).await?;
                info!(uuid = %id, counterpart = %record.counterpart, "Message sent");
                Ok(Dispatch::Sent)
            }
            Err(e) if e.is_transient() => {
                debug!(uuid = %id, error = %e, "Message deferred until reconnect");
                Ok(Dispatch::Deferred)
            }
            Err(e) => {
                archive.update_transmission(id, None, Some(e.to_string())).await?;
                warn!(uuid = %id, error = %e, "Message delivery failed");
                Ok(Dispatch::Failed(e))
            }
        }
    }

    /// Transmit every pending message, oldest first. Call after reconnecting.
    ///
    /// Returns the number of messages sent.
    pub async fn resend_pending(&self) -> PipelineResult<usize> {
        let pending = self.inner.archive.pending().await?;
        let total = pending.len();
        let mut sent = 0;
        for record in pending {
            if self.transmit(record.id).await? == Dispatch::Sent {
                sent += 1;
            }
        }
        info!(account = %self.inner.archive.account(), pending = total, sent, "Resent pending messages");
        Ok(sent)
    }

    /// Transmit pending messages as they are inserted into the archive.
    pub fn follow(&self) -> JoinHandle<()> {
        let mut changes = self.inner.archive.subscribe();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        for id in change.inserted {
                            if let Err(e) = this.transmit(id).await {
                                warn!(uuid = %id, error = %e, "Failed to dispatch inserted message");
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Change stream lagged, resending pending messages");
                        if let Err(e) = this.resend_pending().await {
                            warn!(error = %e, "Failed to resend pending messages");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    fn claim(&self, id: Uuid) -> Option<Claim<'_>> {
        if !lock(&self.inner.in_flight).insert(id) {
            return None;
        }
        Some(Claim {
            in_flight: &self.inner.in_flight,
            id,
        })
    }
}
