//! The per-account list of known archive spans and its on-disk form.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::partition::{merge, Merge, Partition};
use crate::{SyncError, SyncResult};

/// Version of the persisted index document.
pub const INDEX_VERSION: u32 = 1;

/// Pairwise-disjoint partitions, most recently fetched first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Index {
    partitions: Vec<Partition>,
}

#[derive(Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    partitions: Vec<Partition>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Add a partition, merging it with every span it touches.
    pub fn add(&mut self, partition: Partition) {
        let mut current = partition;
        let mut placed = Vec::with_capacity(self.partitions.len() + 1);

        for existing in self.partitions.drain(..) {
            if current.joins(&existing) {
                current = merged(current, existing);
            } else {
                placed.push(existing);
            }
        }
        placed.push(current);

        // A grown span can now touch an entry it skipped earlier.
        while let Some((i, j)) = find_joinable(&placed) {
            let right = placed.remove(j);
            let left = placed.remove(i);
            placed.push(merged(left, right));
        }

        placed.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.first.cmp(&b.first)));
        self.partitions = placed;
    }

    /// Cursor for the next older page: the oldest id of the most recent span.
    pub fn next_archive_id(&self) -> Option<&str> {
        self.partitions.first().map(|p| p.first.as_str())
    }

    /// True while there is no history or a single span that may reach further back.
    pub fn can_load_more(&self) -> bool {
        match self.partitions.as_slice() {
            [] => true,
            [only] => !only.complete,
            _ => false,
        }
    }

    /// Mark the span starting at `first` as reaching the start of history.
    pub fn mark_complete(&mut self, first: &str) -> bool {
        match self.partitions.iter_mut().find(|p| p.first == first) {
            Some(partition) if !partition.complete => {
                partition.complete = true;
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Load an index; a missing file is an empty index.
    pub fn load(path: &Path) -> SyncResult<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::new()),
            Err(err) => return Err(err.into()),
        };

        let document: IndexDocument = serde_json::from_str(&content)?;
        if document.version > INDEX_VERSION {
            return Err(SyncError::Storage(format!(
                "sync index version {} is newer than supported version {}",
                document.version, INDEX_VERSION
            )));
        }

        debug!(path = %path.display(), partitions = document.partitions.len(), "Loaded sync index");
        Ok(Self {
            partitions: document.partitions,
        })
    }

    /// Write the index through a temporary file and rename it into place.
    pub fn save(&self, path: &Path) -> SyncResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let document = IndexDocument {
            version: INDEX_VERSION,
            partitions: self.partitions.clone(),
        };
        let content = serde_json::to_string_pretty(&document)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Remove a persisted index. Missing files are fine.
    pub fn remove(path: &Path) -> SyncResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

fn merged(a: Partition, b: Partition) -> Partition {
    match merge(a, b) {
        Merge::Merged(partition) => partition,
        // Callers only merge spans that join.
        Merge::Separate { recent, .. } => recent,
    }
}

fn find_joinable(partitions: &[Partition]) -> Option<(usize, usize)> {
    for i in 0..partitions.len() {
        for j in (i + 1)..partitions.len() {
            if partitions[i].joins(&partitions[j]) {
                return Some((i, j));
            }
        }
    }
    None
}
