//! Async archive handle.

use std::fmt;
use std::sync::{Arc, Mutex};

use archive_config_and_utils::Config;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use stanza_model::{ns, origin_id, scoped_stanza_id, Element, Jid, MessageType};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    queries, ArchiveChange, ArchiveError, ArchivePool, ArchiveResult, Direction, DocumentStore,
    MessageRecord, Metadata, NewMessage, PoolConfig, StorageLayout,
};

/// Buffered change notifications per subscriber before it starts lagging.
const DEFAULT_CHANGE_CAPACITY: usize = 256;

/// Options for opening an archive.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub pool: PoolConfig,
    pub change_capacity: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            change_capacity: DEFAULT_CHANGE_CAPACITY,
        }
    }
}

impl ArchiveOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pool: PoolConfig {
                max_size: config.pool_max_size,
                busy_timeout: config.busy_timeout(),
                ..PoolConfig::default()
            },
            change_capacity: DEFAULT_CHANGE_CAPACITY,
        }
    }
}

/// One account's message archive.
///
/// Cheap to clone; clones share storage. Reads run concurrently with each
/// other, writes are exclusive and ordered with respect to reads.
#[derive(Clone)]
pub struct Archive {
    inner: Arc<Inner>,
}

struct Inner {
    account: Jid,
    layout: StorageLayout,
    documents: DocumentStore,
    pool: Mutex<Option<ArchivePool>>,
    gate: RwLock<()>,
    changes: broadcast::Sender<ArchiveChange>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("account", &self.inner.account.to_string())
            .field("dir", &self.inner.layout.dir())
            .finish()
    }
}

impl Archive {
    /// Open (creating if needed) the archive stored under `layout`.
    ///
    /// Blocking; async callers should run it on a blocking thread.
    pub fn open(account: &Jid, layout: StorageLayout, options: &ArchiveOptions) -> ArchiveResult<Self> {
        layout.initialize()?;
        let pool = ArchivePool::open(&layout.database_file(), &options.pool)?;
        let (changes, _) = broadcast::channel(options.change_capacity.max(1));
        let account = account.to_bare();

        info!(account = %account, dir = %layout.dir().display(), "Archive opened");

        Ok(Self {
            inner: Arc::new(Inner {
                account,
                documents: DocumentStore::new(layout.documents_dir()),
                layout,
                pool: Mutex::new(Some(pool)),
                gate: RwLock::new(()),
                changes,
            }),
        })
    }

    /// Bare address of the owning account.
    pub fn account(&self) -> &Jid {
        &self.inner.account
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.inner.layout
    }

    /// True if both handles share the same open storage.
    pub fn ptr_eq(&self, other: &Archive) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Subscribe to change notifications for writes committed from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ArchiveChange> {
        self.inner.changes.subscribe()
    }

    // ==========================================
    // Writes
    // ==========================================

    /// Archive a message stanza.
    ///
    /// Fails with [`ArchiveError::DuplicateMessage`] if its origin-id or
    /// trusted stanza-id is already archived; nothing is written in that case.
    pub async fn insert(&self, document: Element, metadata: Metadata) -> ArchiveResult<MessageRecord> {
        let message = self.classify(&document)?;

        let _guard = self.inner.gate.write().await;
        let record = self
            .run_blocking(move |conn, documents| {
                insert_blocking(conn, documents, message, &document, &metadata)
            })
            .await?;

        debug!(
            account = %record.account,
            uuid = %record.id,
            direction = record.direction.as_str(),
            counterpart = %record.counterpart,
            "Message archived"
        );
        self.notify(ArchiveChange::inserted(record.id));
        Ok(record)
    }

    /// Replace a message's metadata.
    pub async fn update(&self, id: Uuid, metadata: Metadata) -> ArchiveResult<()> {
        let _guard = self.inner.gate.write().await;
        self.run_blocking(move |conn, _| {
            let tx = conn.transaction()?;
            if !queries::update_metadata(&tx, id, &metadata)? {
                return Err(ArchiveError::NotFound(id));
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        self.notify(ArchiveChange::updated(id));
        Ok(())
    }

    /// Record the outcome of a transmission attempt.
    pub async fn update_transmission(
        &self,
        id: Uuid,
        transmitted: Option<DateTime<Utc>>,
        error: Option<String>,
    ) -> ArchiveResult<()> {
        let _guard = self.inner.gate.write().await;
        self.run_blocking(move |conn, _| {
            let tx = conn.transaction()?;
            if !queries::update_transmission(&tx, id, transmitted, error.as_deref())? {
                return Err(ArchiveError::NotFound(id));
            }
            tx.commit()?;
            Ok(())
        })
        .await?;

        self.notify(ArchiveChange::updated(id));
        Ok(())
    }

    /// Soft-delete a message. It stays addressable by id but leaves all listings.
    pub async fn thrash(&self, id: Uuid) -> ArchiveResult<()> {
        let _guard = self.inner.gate.write().await;
        self.run_blocking(move |conn, _| {
            if !queries::set_thrashed(conn, id, true)? {
                return Err(ArchiveError::NotFound(id));
            }
            Ok(())
        })
        .await?;

        self.notify(ArchiveChange::updated(id));
        Ok(())
    }

    /// Delete a message and its document.
    pub async fn delete(&self, id: Uuid) -> ArchiveResult<()> {
        let _guard = self.inner.gate.write().await;
        self.run_blocking(move |conn, documents| {
            let tx = conn.transaction()?;
            if !queries::delete_message(&tx, id)? {
                return Err(ArchiveError::NotFound(id));
            }
            tx.commit()?;

            if let Err(e) = documents.remove(id) {
                warn!(uuid = %id, error = %e, "Failed to remove message document");
            }
            Ok(())
        })
        .await?;

        debug!(account = %self.inner.account, uuid = %id, "Message deleted");
        self.notify(ArchiveChange::deleted(id));
        Ok(())
    }

    /// Wait for in-flight operations and release the connection pool.
    ///
    /// Later operations on any clone fail with [`ArchiveError::Closed`].
    pub async fn close(&self) {
        let _guard = self.inner.gate.write().await;
        let released = match self.inner.pool.lock() {
            Ok(mut pool) => pool.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        };
        if released {
            info!(account = %self.inner.account, "Archive closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        match self.inner.pool.lock() {
            Ok(pool) => pool.is_none(),
            Err(_) => true,
        }
    }

    // ==========================================
    // Reads
    // ==========================================

    pub async fn message(&self, id: Uuid) -> ArchiveResult<MessageRecord> {
        self.read(move |conn, _| queries::get_message(conn, id)?.ok_or(ArchiveError::NotFound(id)))
            .await
    }

    pub async fn metadata(&self, id: Uuid) -> ArchiveResult<Metadata> {
        self.read(move |conn, _| queries::get_metadata(conn, id)?.ok_or(ArchiveError::NotFound(id)))
            .await
    }

    /// The archived stanza of a message.
    pub async fn document(&self, id: Uuid) -> ArchiveResult<Element> {
        self.read(move |conn, documents| {
            if queries::get_message(conn, id)?.is_none() {
                return Err(ArchiveError::NotFound(id));
            }
            documents.read(id)
        })
        .await
    }

    /// All visible messages. Undated first, then by transmitted, created
    /// and insertion order, newest first.
    pub async fn all(&self) -> ArchiveResult<Vec<MessageRecord>> {
        self.read(|conn, _| queries::list_all(conn)).await
    }

    /// Visible messages exchanged with `counterpart`, ordered like [`Archive::all`].
    pub async fn conversation(&self, counterpart: &Jid) -> ArchiveResult<Vec<MessageRecord>> {
        let counterpart = counterpart.to_bare().to_string();
        self.read(move |conn, _| queries::list_conversation(conn, &counterpart))
            .await
    }

    /// The latest message of every conversation.
    pub async fn recent(&self) -> ArchiveResult<Vec<MessageRecord>> {
        self.read(|conn, _| queries::list_recent(conn)).await
    }

    /// Outbound messages still awaiting transmission, oldest first.
    pub async fn pending(&self) -> ArchiveResult<Vec<MessageRecord>> {
        self.read(|conn, _| queries::list_pending(conn)).await
    }

    pub async fn count(&self) -> ArchiveResult<usize> {
        self.read(|conn, _| queries::count_messages(conn)).await
    }

    // ==========================================
    // Internals
    // ==========================================

    /// Validate a stanza and derive its identity row.
    fn classify(&self, document: &Element) -> ArchiveResult<NewMessage> {
        if !document.is("message", ns::CLIENT) {
            return Err(ArchiveError::Validation(format!(
                "expected a message stanza, got <{}>",
                document.name()
            )));
        }
        let from = address(document, "from")?;
        let to = address(document, "to")?;
        let message_type =
            MessageType::of(document).map_err(|e| ArchiveError::Validation(e.to_string()))?;

        let account = &self.inner.account;
        let (direction, counterpart) = if from.to_bare() == *account {
            (Direction::Outbound, to.to_bare())
        } else if to.to_bare() == *account {
            (Direction::Inbound, from.to_bare())
        } else {
            return Err(ArchiveError::AccountMismatch(account.to_string()));
        };

        let stanza_id = scoped_stanza_id(document, account);
        Ok(NewMessage {
            id: Uuid::new_v4(),
            account: account.to_string(),
            counterpart: counterpart.to_string(),
            direction,
            message_type,
            origin_id: origin_id(document).map(str::to_string),
            stanza_id: stanza_id.map(|(_, id)| id.to_string()),
            stanza_id_scope: stanza_id.map(|(scope, _)| scope),
        })
    }

    async fn read<T, F>(&self, op: F) -> ArchiveResult<T>
    where
        F: FnOnce(&mut Connection, &DocumentStore) -> ArchiveResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.inner.gate.read().await;
        self.run_blocking(op).await
    }

    /// Run `op` on a pooled connection off the async runtime.
    /// Callers hold the gate.
    async fn run_blocking<T, F>(&self, op: F) -> ArchiveResult<T>
    where
        F: FnOnce(&mut Connection, &DocumentStore) -> ArchiveResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool()?;
        let documents = self.inner.documents.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            op(&mut *conn, &documents)
        })
        .await?
    }

    fn pool(&self) -> ArchiveResult<ArchivePool> {
        let pool = self
            .inner
            .pool
            .lock()
            .map_err(|_| ArchiveError::Storage("pool lock poisoned".to_string()))?;
        pool.clone().ok_or(ArchiveError::Closed)
    }

    fn notify(&self, change: ArchiveChange) {
        // No subscribers is not an error.
        let _ = self.inner.changes.send(change);
    }
}

fn address(document: &Element, attr: &str) -> ArchiveResult<Jid> {
    let raw = document
        .attr(attr)
        .ok_or_else(|| ArchiveError::Validation(format!("missing '{attr}' address")))?;
    Jid::parse(raw).map_err(|e| ArchiveError::Validation(e.to_string()))
}

/// Dedup check, blob write and row insert. Runs under the write gate.
fn insert_blocking(
    conn: &mut Connection,
    documents: &DocumentStore,
    message: NewMessage,
    document: &Element,
    metadata: &Metadata,
) -> ArchiveResult<MessageRecord> {
    if let Some(existing) = queries::find_duplicate(
        conn,
        &message.account,
        message.origin_id.as_deref(),
        message.stanza_id.as_deref().zip(message.stanza_id_scope).map(|(id, scope)| (scope, id)),
    )? {
        return Err(ArchiveError::DuplicateMessage(existing));
    }

    documents.write(message.id, document)?;

    let committed = conn.transaction().map_err(ArchiveError::from).and_then(|tx| {
        queries::insert_message(&tx, &message, metadata)?;
        tx.commit()?;
        Ok(())
    });
    if let Err(e) = committed {
        if let Err(cleanup) = documents.remove(message.id) {
            warn!(uuid = %message.id, error = %cleanup, "Failed to remove orphaned document");
        }
        return Err(e);
    }

    Ok(message.into_record())
}
