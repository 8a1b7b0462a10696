//! Per-account sync entry point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use archive_config_and_utils::{Config, SingleFlight, DEFAULT_MAM_PAGE_SIZE, DEFAULT_MAM_TIMEOUT_SECS};
use archive_lifecycle::ArchiveManager;
use stanza_model::{mam_result, Element, Jid};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{Index, PageResult, SyncError, SyncRequest, SyncResult, Transport};

/// A fetch is identified by account and cursor.
type FetchKey = (String, Option<String>);

#[derive(Default)]
struct Registry {
    /// Live requests by query id.
    requests: HashMap<String, Arc<SyncRequest>>,
    fetches: SingleFlight<FetchKey, SyncResult<()>>,
    /// Loaded indexes by account.
    indexes: HashMap<String, Index>,
}

/// Issues page fetches and keeps each account's sync index.
#[derive(Clone)]
pub struct SyncCoordinator {
    archives: Arc<ArchiveManager>,
    page_size: u32,
    timeout: Duration,
    registry: Arc<Mutex<Registry>>,
}

impl SyncCoordinator {
    pub fn new(archives: Arc<ArchiveManager>) -> Self {
        Self {
            archives,
            page_size: DEFAULT_MAM_PAGE_SIZE,
            timeout: Duration::from_secs(DEFAULT_MAM_TIMEOUT_SECS),
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn from_config(config: &Config, archives: Arc<ArchiveManager>) -> Self {
        Self::new(archives)
            .with_page_size(config.mam_page_size)
            .with_timeout(config.mam_timeout())
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn archives(&self) -> &Arc<ArchiveManager> {
        &self.archives
    }

    /// Fetch the most recent page of the account's history.
    pub async fn load_recent_messages(&self, account: &Jid, transport: Arc<dyn Transport>) -> SyncResult<()> {
        self.fetch(account, None, transport).await
    }

    /// Fetch the page before the oldest message of the most recent span.
    pub async fn load_more_messages(&self, account: &Jid, transport: Arc<dyn Transport>) -> SyncResult<()> {
        let index = self.index(account).await?;
        if !index.can_load_more() {
            debug!(account = %account.to_bare(), "Nothing more to load");
            return Ok(());
        }
        let before = index.next_archive_id().map(str::to_string);
        self.fetch(account, before, transport).await
    }

    pub async fn can_load_more_messages(&self, account: &Jid) -> SyncResult<bool> {
        Ok(self.index(account).await?.can_load_more())
    }

    /// Current sync index of an account.
    pub async fn index(&self, account: &Jid) -> SyncResult<Index> {
        let key = account.to_bare().to_string();
        let mut registry = self.registry.lock().await;
        self.cached_index(&mut registry, &key).await
    }

    /// Route a MAM result to the request that asked for it.
    ///
    /// Returns false when the stanza is not a MAM result or no live request
    /// owns its query id.
    pub async fn handle_result(&self, account: &Jid, stanza: &Element) -> bool {
        let Some(result) = mam_result(stanza) else {
            return false;
        };

        let account = account.to_bare();
        if let Some(from) = stanza.attr("from") {
            match Jid::parse(from) {
                Ok(sender) if sender.to_bare() == account => {}
                _ => {
                    warn!(account = %account, from, "Ignoring archive result from foreign sender");
                    return false;
                }
            }
        }

        let request = {
            let registry = self.registry.lock().await;
            result
                .query_id
                .as_deref()
                .and_then(|query_id| registry.requests.get(query_id))
                .filter(|request| request.account() == &account)
                .cloned()
        };

        match request {
            Some(request) => {
                request.handle_result(result).await;
                true
            }
            None => {
                debug!(
                    account = %account,
                    query_id = ?result.query_id,
                    "No live request for archive result"
                );
                false
            }
        }
    }

    /// Forget everything known about the account's remote history.
    pub async fn reset(&self, account: &Jid) -> SyncResult<()> {
        let key = account.to_bare().to_string();
        let mut registry = self.registry.lock().await;
        registry.indexes.remove(&key);
        let path = self.index_path(&key);
        tokio::task::spawn_blocking(move || Index::remove(&path)).await??;
        info!(account = %key, "Sync index reset");
        Ok(())
    }

    /// Delete the account's archive together with its sync index.
    pub async fn delete_archive(&self, account: &Jid) -> SyncResult<()> {
        let key = account.to_bare().to_string();
        let mut registry = self.registry.lock().await;
        registry.indexes.remove(&key);
        self.archives.delete_archive(account).await?;
        info!(account = %key, "Archive and sync index deleted");
        Ok(())
    }

    /// Number of requests waiting for results.
    pub async fn live_requests(&self) -> usize {
        self.registry.lock().await.requests.len()
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    async fn fetch(&self, account: &Jid, before: Option<String>, transport: Arc<dyn Transport>) -> SyncResult<()> {
        let account = account.to_bare();
        let key: FetchKey = (account.to_string(), before.clone());

        let join = self.registry.lock().await.fetches.join(key.clone());
        if join.is_leader() {
            // Run detached so the shared fetch survives a dropped caller.
            let this = self.clone();
            tokio::spawn(async move {
                let result = this.run_fetch(&account, before, transport).await;
                this.registry.lock().await.fetches.complete(&key, result);
            });
        } else {
            debug!(account = %key.0, before = ?key.1, "Joining in-flight fetch");
        }

        join.into_receiver().await.unwrap_or(Err(SyncError::Cancelled))
    }

    async fn run_fetch(&self, account: &Jid, before: Option<String>, transport: Arc<dyn Transport>) -> SyncResult<()> {
        let archive = self.archives.archive(account, true).await?;
        let (request, completion) = SyncRequest::new(account.clone(), archive);
        let request = Arc::new(request);
        let query_id = request.query_id().to_string();

        self.registry
            .lock()
            .await
            .requests
            .insert(query_id.clone(), request.clone());

        let outcome = match request
            .perform_fetch(transport.as_ref(), before.as_deref(), self.page_size, self.timeout)
            .await
        {
            Ok(()) => completion.await.unwrap_or(Err(SyncError::Cancelled)),
            Err(err) => Err(err),
        };

        self.registry.lock().await.requests.remove(&query_id);
        let page = outcome?;
        self.record_page(account, before.as_deref(), page).await
    }

    async fn record_page(&self, account: &Jid, before: Option<&str>, page: PageResult) -> SyncResult<()> {
        let key = account.to_string();
        let mut registry = self.registry.lock().await;
        let mut index = self.cached_index(&mut registry, &key).await?;

        let changed = match page {
            PageResult::Partition(partition) if partition.stable => {
                index.add(partition);
                true
            }
            PageResult::Partition(partition) => {
                info!(
                    account = %key,
                    first = %partition.first,
                    last = %partition.last,
                    "Discarding unstable archive page"
                );
                false
            }
            PageResult::Empty { complete: true } => match before {
                Some(cursor) => index.mark_complete(cursor),
                None => false,
            },
            PageResult::Empty { complete: false } => false,
        };

        if changed {
            let path = self.index_path(&key);
            let snapshot = index.clone();
            tokio::task::spawn_blocking(move || snapshot.save(&path)).await??;
            debug!(account = %key, partitions = index.len(), "Sync index updated");
            registry.indexes.insert(key, index);
        }
        Ok(())
    }

    // ========================================================================
    // Index storage
    // ========================================================================

    async fn cached_index(&self, registry: &mut Registry, key: &str) -> SyncResult<Index> {
        if let Some(index) = registry.indexes.get(key) {
            return Ok(index.clone());
        }
        let path = self.index_path(key);
        let index = tokio::task::spawn_blocking(move || Index::load(&path)).await??;
        registry.indexes.insert(key.to_string(), index.clone());
        Ok(index)
    }

    fn index_path(&self, key: &str) -> PathBuf {
        self.archives.paths().sync_index_file(key)
    }
}
