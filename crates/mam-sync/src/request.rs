//! One MAM page fetch.
//!
//! A request sends a query, archives the results streamed back under its
//! query id, and finishes once the server's `fin` arrived and every result
//! it saw has been stored. State lives behind one mutex; every transition is
//! checked against the current state and illegal ones are ignored.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use message_archive::{Archive, ArchiveError, Metadata};
use stanza_model::{mam_query, origin_id, stanza_id, Fin, Jid, MamResult};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{Partition, SyncError, SyncResult, Transport};

/// Result of a finished page fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageResult {
    Partition(Partition),
    /// The server had nothing before the cursor.
    Empty { complete: bool },
}

/// Observable phase of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Initialized,
    Fetching,
    Waiting,
    Finished,
    Failed,
}

enum State {
    Initialized,
    Fetching {
        pending: HashSet<String>,
    },
    Waiting {
        pending: HashSet<String>,
        partial: PageResult,
    },
    Finished,
    Failed,
}

struct Inner {
    state: State,
    before: Option<String>,
    resolved: BTreeSet<String>,
    first_seen: Option<DateTime<Utc>>,
    completion: Option<oneshot::Sender<SyncResult<PageResult>>>,
}

/// A single page fetch against one account's archive.
pub struct SyncRequest {
    query_id: String,
    account: Jid,
    archive: Archive,
    inner: Mutex<Inner>,
}

impl SyncRequest {
    /// Create a request and the receiver its outcome is delivered on.
    pub fn new(account: Jid, archive: Archive) -> (Self, oneshot::Receiver<SyncResult<PageResult>>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            query_id: Uuid::new_v4().to_string(),
            account: account.to_bare(),
            archive,
            inner: Mutex::new(Inner {
                state: State::Initialized,
                before: None,
                resolved: BTreeSet::new(),
                first_seen: None,
                completion: Some(tx),
            }),
        };
        (request, rx)
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn account(&self) -> &Jid {
        &self.account
    }

    pub fn phase(&self) -> RequestPhase {
        match self.lock().state {
            State::Initialized => RequestPhase::Initialized,
            State::Fetching { .. } => RequestPhase::Fetching,
            State::Waiting { .. } => RequestPhase::Waiting,
            State::Finished => RequestPhase::Finished,
            State::Failed => RequestPhase::Failed,
        }
    }

    /// Archive ids seen but not yet stored.
    pub fn pending_count(&self) -> usize {
        match &self.lock().state {
            State::Fetching { pending } | State::Waiting { pending, .. } => pending.len(),
            _ => 0,
        }
    }

    /// Send the page query and process the server's answer.
    ///
    /// Only valid once. The outcome of the fetch is delivered on the
    /// completion receiver; the returned error only reports misuse.
    pub async fn perform_fetch(
        &self,
        transport: &dyn Transport,
        before: Option<&str>,
        limit: u32,
        timeout: Duration,
    ) -> SyncResult<()> {
        {
            let mut inner = self.lock();
            if !matches!(inner.state, State::Initialized) {
                return Err(SyncError::AlreadyRunning);
            }
            inner.state = State::Fetching {
                pending: HashSet::new(),
            };
            inner.before = before.map(str::to_string);
        }

        debug!(
            query_id = %self.query_id,
            account = %self.account,
            before = ?before,
            limit,
            "Requesting archive page"
        );

        let query = mam_query(&self.query_id, before, limit);
        let response = match tokio::time::timeout(timeout, transport.request(query, timeout)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                self.fail(err.into());
                return Ok(());
            }
            Err(_) => {
                self.fail(SyncError::Timeout);
                return Ok(());
            }
        };

        match Fin::from_response(&response) {
            Ok(fin) => self.handle_fin(fin),
            Err(err) => self.fail(SyncError::UnexpectedResponse(err.to_string())),
        }
        Ok(())
    }

    /// Archive one result delivered under this request's query id.
    pub async fn handle_result(&self, result: MamResult) {
        if result.query_id.as_deref() != Some(self.query_id.as_str()) {
            return;
        }

        let has_key = origin_id(&result.message).is_some()
            || stanza_id(&result.message, &self.account).is_some();
        if !has_key {
            warn!(
                query_id = %self.query_id,
                archive_id = %result.archive_id,
                "Dropping archived message without origin or stanza id"
            );
            return;
        }

        {
            let mut inner = self.lock();
            let now = Utc::now();
            match &mut inner.state {
                State::Fetching { pending } | State::Waiting { pending, .. } => {
                    pending.insert(result.archive_id.clone());
                }
                _ => {
                    debug!(query_id = %self.query_id, "Ignoring result for inactive request");
                    return;
                }
            }
            inner.first_seen.get_or_insert(now);
        }

        // Archived history is already transmitted, stamped or not.
        let metadata = Metadata::created_now().with_transmitted(result.delay.unwrap_or_else(Utc::now));
        match self.archive.insert(result.message, metadata).await {
            Ok(_) | Err(ArchiveError::DuplicateMessage(_)) => self.resolve(&result.archive_id),
            Err(err) => {
                warn!(
                    query_id = %self.query_id,
                    archive_id = %result.archive_id,
                    error = %err,
                    "Failed to archive synced message"
                );
                self.fail(SyncError::Archive(err));
            }
        }
    }

    fn handle_fin(&self, fin: Fin) {
        let mut inner = self.lock();
        let pending = match &mut inner.state {
            State::Fetching { pending } => std::mem::take(pending),
            _ => return,
        };

        let partial = match (fin.first, fin.last) {
            (Some(first), Some(last)) => {
                let timestamp = *inner.first_seen.get_or_insert_with(Utc::now);
                PageResult::Partition(
                    Partition::new(first, last, timestamp, Vec::new())
                        .with_stable(fin.stable)
                        .with_complete(fin.complete)
                        .with_before(inner.before.clone()),
                )
            }
            _ => PageResult::Empty {
                complete: fin.complete,
            },
        };

        if pending.is_empty() {
            self.finish(&mut inner, partial);
        } else {
            debug!(
                query_id = %self.query_id,
                pending = pending.len(),
                "Page complete, waiting for archive writes"
            );
            inner.state = State::Waiting { pending, partial };
        }
    }

    fn resolve(&self, archive_id: &str) {
        let mut inner = self.lock();
        inner.resolved.insert(archive_id.to_string());

        let ready = match &mut inner.state {
            State::Fetching { pending } => {
                pending.remove(archive_id);
                None
            }
            State::Waiting { pending, partial } => {
                pending.remove(archive_id);
                pending.is_empty().then(|| partial.clone())
            }
            _ => None,
        };
        if let Some(partial) = ready {
            self.finish(&mut inner, partial);
        }
    }

    fn finish(&self, inner: &mut Inner, partial: PageResult) {
        let result = match partial {
            PageResult::Partition(mut partition) => {
                partition.archive_ids.extend(inner.resolved.iter().cloned());
                info!(
                    query_id = %self.query_id,
                    account = %self.account,
                    first = %partition.first,
                    last = %partition.last,
                    messages = partition.archive_ids.len(),
                    stable = partition.stable,
                    complete = partition.complete,
                    "Archive page synced"
                );
                PageResult::Partition(partition)
            }
            empty => {
                info!(query_id = %self.query_id, account = %self.account, "Archive page empty");
                empty
            }
        };
        inner.state = State::Finished;
        if let Some(tx) = inner.completion.take() {
            let _ = tx.send(Ok(result));
        }
    }

    fn fail(&self, err: SyncError) {
        let mut inner = self.lock();
        if matches!(inner.state, State::Finished | State::Failed) {
            return;
        }
        warn!(query_id = %self.query_id, account = %self.account, error = %err, "Sync request failed");
        inner.state = State::Failed;
        if let Some(tx) = inner.completion.take() {
            let _ = tx.send(Err(err));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // State transitions never panic while holding the lock.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
