//! Inbound message handling for one account.

use std::sync::Arc;

use archive_lifecycle::ArchiveManager;
use mam_sync::SyncCoordinator;
use message_archive::{Archive, ArchiveError, MessageRecord};
use stanza_model::{mam_result, Element, Jid};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::filter::{default_chain, run_chain, Filter, Item};
use crate::{PipelineError, PipelineResult};

type Reply = oneshot::Sender<PipelineResult<Option<MessageRecord>>>;

enum ArchiveState {
    Closed,
    /// Items received while the archive opens, in arrival order.
    Opening(Vec<(Item, Reply)>),
    Open(Archive),
}

struct Inner {
    account: Jid,
    archives: Arc<ArchiveManager>,
    coordinator: Option<SyncCoordinator>,
    chain: Vec<Filter>,
    state: Mutex<ArchiveState>,
}

/// Archives stanzas received on an account's stream.
#[derive(Clone)]
pub struct InboundPipeline {
    inner: Arc<Inner>,
}

impl InboundPipeline {
    /// Create a pipeline. MAM results go to `coordinator` when one is given
    /// and are discarded otherwise.
    pub fn new(account: &Jid, archives: Arc<ArchiveManager>, coordinator: Option<SyncCoordinator>) -> Self {
        Self {
            inner: Arc::new(Inner {
                account: account.to_bare(),
                archives,
                coordinator,
                chain: default_chain(),
                state: Mutex::new(ArchiveState::Closed),
            }),
        }
    }

    pub fn account(&self) -> &Jid {
        &self.inner.account
    }

    /// Process one inbound stanza.
    ///
    /// Returns the archived record, or `None` when the stanza was filtered
    /// out, routed to the sync engine or already archived.
    pub async fn receive(&self, stanza: Element) -> PipelineResult<Option<MessageRecord>> {
        if mam_result(&stanza).is_some() {
            if let Some(coordinator) = &self.inner.coordinator {
                coordinator.handle_result(&self.inner.account, &stanza).await;
            }
            return Ok(None);
        }

        let Some(item) = run_chain(&self.inner.chain, &self.inner.account, Item::received(stanza)) else {
            return Ok(None);
        };

        let rx = {
            let mut state = self.inner.state.lock().await;
            match &mut *state {
                ArchiveState::Open(archive) => {
                    let archive = archive.clone();
                    drop(state);
                    return self.store(&archive, item).await;
                }
                ArchiveState::Opening(queue) => {
                    let (tx, rx) = oneshot::channel();
                    queue.push((item, tx));
                    rx
                }
                ArchiveState::Closed => {
                    let (tx, rx) = oneshot::channel();
                    *state = ArchiveState::Opening(vec![(item, tx)]);
                    let this = self.clone();
                    tokio::spawn(async move { this.open_and_drain().await });
                    rx
                }
            }
        };

        rx.await.unwrap_or(Err(PipelineError::Cancelled))
    }

    async fn open_and_drain(&self) {
        let result = self.inner.archives.archive(&self.inner.account, true).await;

        // Hold the state lock while draining so later arrivals queue behind.
        let mut state = self.inner.state.lock().await;
        let queue = match std::mem::replace(&mut *state, ArchiveState::Closed) {
            ArchiveState::Opening(queue) => queue,
            other => {
                *state = other;
                return;
            }
        };

        match result {
            Ok(archive) => {
                info!(account = %self.inner.account, queued = queue.len(), "Archive open, draining inbound queue");
                *state = ArchiveState::Open(archive.clone());
                for (item, reply) in queue {
                    let _ = reply.send(self.store_with(&mut state, &archive, item).await);
                }
            }
            Err(e) => {
                warn!(account = %self.inner.account, queued = queue.len(), error = %e, "Failed to open archive for inbound messages");
                let err = PipelineError::Archive(e);
                for (_, reply) in queue {
                    let _ = reply.send(Err(err.clone()));
                }
            }
        }
    }

    async fn store(&self, archive: &Archive, item: Item) -> PipelineResult<Option<MessageRecord>> {
        let result = insert(archive, item).await;
        if matches!(result, Err(PipelineError::Archive(ArchiveError::Closed))) {
            let mut state = self.inner.state.lock().await;
            forget_closed(&mut state, archive);
        }
        result
    }

    async fn store_with(
        &self,
        state: &mut ArchiveState,
        archive: &Archive,
        item: Item,
    ) -> PipelineResult<Option<MessageRecord>> {
        let result = insert(archive, item).await;
        if matches!(result, Err(PipelineError::Archive(ArchiveError::Closed))) {
            forget_closed(state, archive);
        }
        result
    }

    #[cfg(test)]
    pub(crate) async fn queued(&self) -> usize {
        match &*self.inner.state.lock().await {
            ArchiveState::Opening(queue) => queue.len(),
            _ => 0,
        }
    }
}

async fn insert(archive: &Archive, item: Item) -> PipelineResult<Option<MessageRecord>> {
    match archive.insert(item.stanza, item.metadata).await {
        Ok(record) => {
            debug!(uuid = %record.id, counterpart = %record.counterpart, "Archived inbound message");
            Ok(Some(record))
        }
        Err(ArchiveError::DuplicateMessage(existing)) => {
            debug!(uuid = %existing, "Inbound message already archived");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// A closed archive was deleted or shut down; reopen on the next item.
fn forget_closed(state: &mut ArchiveState, archive: &Archive) {
    if let ArchiveState::Open(current) = state {
        if current.ptr_eq(archive) {
            *state = ArchiveState::Closed;
        }
    }
}
