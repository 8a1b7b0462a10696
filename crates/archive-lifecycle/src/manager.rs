//! Registry of open archives with single-flight opening.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use archive_config_and_utils::{Config, Paths, Waiters};
use message_archive::{Archive, ArchiveError, ArchiveOptions, ArchiveResult, StorageLayout};
use stanza_model::Jid;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ArchiveOpener, StorageOpener};

enum Entry {
    Open(Archive),
    Opening {
        generation: u64,
        waiters: Waiters<ArchiveResult<Archive>>,
        task: JoinHandle<()>,
    },
    /// Storage is being removed; opens wait for it to finish.
    Deleting(Waiters<()>),
}

#[derive(Default)]
struct Registry {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

/// Owns the open archives of every account.
pub struct ArchiveManager {
    paths: Paths,
    options: ArchiveOptions,
    opener: Arc<dyn ArchiveOpener>,
    registry: Arc<Mutex<Registry>>,
}

impl ArchiveManager {
    /// Create a manager storing archives under `paths.storage_root()`.
    pub fn new(paths: Paths, options: ArchiveOptions) -> Self {
        Self::with_opener(paths, options, Arc::new(StorageOpener))
    }

    /// Create a manager from loaded configuration.
    pub fn from_config(config: &Config, paths: Paths) -> Self {
        Self::new(config.resolve_paths(paths), ArchiveOptions::from_config(config))
    }

    pub fn with_opener(paths: Paths, options: ArchiveOptions, opener: Arc<dyn ArchiveOpener>) -> Self {
        Self {
            paths,
            options,
            opener,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Get the archive of `account`, opening it if needed.
    ///
    /// Concurrent calls for one account share a single open. With
    /// `create == false` a missing archive fails with
    /// [`ArchiveError::DoesNotExist`].
    pub async fn archive(&self, account: &Jid, create: bool) -> ArchiveResult<Archive> {
        let account = account.to_bare();
        let key = account.to_string();

        let rx = loop {
            let mut registry = self.registry.lock().await;
            match registry.entries.get_mut(&key) {
                Some(Entry::Open(archive)) => return Ok(archive.clone()),
                Some(Entry::Opening { waiters, .. }) => {
                    debug!(account = %key, "Joining in-flight archive open");
                    break waiters.attach();
                }
                Some(Entry::Deleting(waiters)) => {
                    let done = waiters.attach();
                    drop(registry);
                    let _ = done.await;
                    continue;
                }
                None => {
                    let layout = self.layout(&key);
                    if !create && !layout.exists() {
                        return Err(ArchiveError::DoesNotExist(key));
                    }
                    break self.start_open(&mut registry, account.clone(), layout);
                }
            }
        };

        match rx.await {
            Ok(result) => result,
            // The open was dropped without a result; only deletion does that.
            Err(_) => Err(ArchiveError::Deleted(key)),
        }
    }

    fn start_open(
        &self,
        registry: &mut Registry,
        account: Jid,
        layout: StorageLayout,
    ) -> oneshot::Receiver<ArchiveResult<Archive>> {
        let key = account.to_string();
        let generation = registry.next_generation;
        registry.next_generation += 1;

        let mut waiters = Waiters::new();
        let rx = waiters.attach();

        info!(account = %key, generation, "Opening archive");
        let task = tokio::spawn(open_task(
            Arc::clone(&self.registry),
            Arc::clone(&self.opener),
            self.options.clone(),
            account,
            layout,
            generation,
        ));

        registry.entries.insert(
            key,
            Entry::Opening {
                generation,
                waiters,
                task,
            },
        );
        rx
    }

    /// Close and forget the open archive of `account`. Storage is kept.
    pub async fn close_archive(&self, account: &Jid) -> bool {
        let key = account.to_bare().to_string();
        let archive = {
            let mut registry = self.registry.lock().await;
            match registry.entries.get(&key) {
                Some(Entry::Open(_)) => match registry.entries.remove(&key) {
                    Some(Entry::Open(archive)) => Some(archive),
                    _ => None,
                },
                _ => None,
            }
        };

        match archive {
            Some(archive) => {
                archive.close().await;
                true
            }
            None => false,
        }
    }

    /// Delete the archive of `account`, its storage and its sync index file.
    ///
    /// An open in flight fails for all its waiters with
    /// [`ArchiveError::Deleted`].
    pub async fn delete_archive(&self, account: &Jid) -> ArchiveResult<()> {
        let key = account.to_bare().to_string();

        let (archive, task) = {
            let mut registry = self.registry.lock().await;
            if let Some(Entry::Deleting(waiters)) = registry.entries.get_mut(&key) {
                let done = waiters.attach();
                drop(registry);
                let _ = done.await;
                return Ok(());
            }

            let previous = registry
                .entries
                .insert(key.clone(), Entry::Deleting(Waiters::new()));
            match previous {
                Some(Entry::Open(archive)) => (Some(archive), None),
                Some(Entry::Opening {
                    mut waiters, task, ..
                }) => {
                    let failed = waiters.resolve(Err(ArchiveError::Deleted(key.clone())));
                    info!(account = %key, waiters = failed, "Failed in-flight archive open");
                    (None, Some(task))
                }
                Some(Entry::Deleting(_)) | None => (None, None),
            }
        };

        if let Some(archive) = archive {
            archive.close().await;
        }
        if let Some(task) = task {
            // The task notices the entry changed and closes what it opened.
            if let Err(e) = task.await {
                warn!(account = %key, error = %e, "Archive open task failed");
            }
        }

        // The sync index describes the deleted history and goes with it.
        let layout = self.layout(&key);
        let sync_index = self.paths.sync_index_file(&key);
        let removed = tokio::task::spawn_blocking(move || {
            layout.remove()?;
            remove_file_if_exists(&sync_index)
        })
        .await
        .map_err(ArchiveError::from)
        .and_then(|result| result);

        {
            let mut registry = self.registry.lock().await;
            if let Some(Entry::Deleting(mut waiters)) = registry.entries.remove(&key) {
                waiters.resolve(());
            }
        }

        match &removed {
            Ok(()) => info!(account = %key, "Archive deleted"),
            Err(e) => warn!(account = %key, error = %e, "Failed to remove archive storage"),
        }
        removed
    }

    /// True if the archive of `account` is open.
    pub async fn is_open(&self, account: &Jid) -> bool {
        let key = account.to_bare().to_string();
        matches!(
            self.registry.lock().await.entries.get(&key),
            Some(Entry::Open(_))
        )
    }

    /// Accounts with an open archive.
    pub async fn open_accounts(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut accounts: Vec<String> = registry
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry, Entry::Open(_)))
            .map(|(key, _)| key.clone())
            .collect();
        accounts.sort();
        accounts
    }

    /// True if storage for `account` exists on disk.
    pub fn exists(&self, account: &Jid) -> bool {
        self.layout(&account.to_bare().to_string()).exists()
    }

    /// Close every open archive.
    pub async fn close_all(&self) {
        let archives: Vec<Archive> = {
            let mut registry = self.registry.lock().await;
            let open: Vec<String> = registry
                .entries
                .iter()
                .filter(|(_, entry)| matches!(entry, Entry::Open(_)))
                .map(|(key, _)| key.clone())
                .collect();
            open.into_iter()
                .filter_map(|key| match registry.entries.remove(&key) {
                    Some(Entry::Open(archive)) => Some(archive),
                    _ => None,
                })
                .collect()
        };

        let count = archives.len();
        for archive in archives {
            archive.close().await;
        }
        info!(count, "Closed all archives");
    }

    fn layout(&self, key: &str) -> StorageLayout {
        StorageLayout::new(self.paths.account_dir(key))
    }

    #[cfg(test)]
    async fn waiting_on(&self, account: &Jid) -> usize {
        let key = account.to_bare().to_string();
        match self.registry.lock().await.entries.get(&key) {
            Some(Entry::Opening { waiters, .. }) => waiters.len(),
            _ => 0,
        }
    }
}

/// Open storage off the runtime, then publish the result to the registry.
async fn open_task(
    registry: Arc<Mutex<Registry>>,
    opener: Arc<dyn ArchiveOpener>,
    options: ArchiveOptions,
    account: Jid,
    layout: StorageLayout,
    generation: u64,
) {
    let key = account.to_string();
    let result = tokio::task::spawn_blocking(move || opener.open(&account, layout, &options))
        .await
        .map_err(ArchiveError::from)
        .and_then(|result| result);

    let mut registry = registry.lock().await;
    let current = matches!(
        registry.entries.get(&key),
        Some(Entry::Opening { generation: g, .. }) if *g == generation
    );
    if !current {
        drop(registry);
        debug!(account = %key, generation, "Archive open superseded");
        if let Ok(archive) = result {
            archive.close().await;
        }
        return;
    }

    let Some(Entry::Opening { mut waiters, .. }) = registry.entries.remove(&key) else {
        return;
    };
    match &result {
        Ok(archive) => {
            registry.entries.insert(key.clone(), Entry::Open(archive.clone()));
            info!(account = %key, waiters = waiters.len(), "Archive ready");
        }
        Err(e) => {
            warn!(account = %key, waiters = waiters.len(), error = %e, "Archive open failed");
        }
    }
    waiters.resolve(result);
}

fn remove_file_if_exists(path: &Path) -> ArchiveResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
