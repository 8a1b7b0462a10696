//! Message documents, one XML file per message.

use std::path::PathBuf;

use stanza_model::Element;
use uuid::Uuid;

use crate::{ArchiveError, ArchiveResult};

/// Blob store keyed by message uuid.
///
/// Callers serialize writes; the store itself only guarantees that a reader
/// never sees a partially written file.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
}

impl DocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.xml"))
    }

    pub fn exists(&self, id: Uuid) -> bool {
        self.path(id).is_file()
    }

    /// Write the document through a temp file and rename.
    pub fn write(&self, id: Uuid, document: &Element) -> ArchiveResult<()> {
        let tmp = self.dir.join(format!(".{id}.xml.tmp"));
        std::fs::write(&tmp, document.to_xml())?;
        if let Err(e) = std::fs::rename(&tmp, self.path(id)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn read(&self, id: Uuid) -> ArchiveResult<Element> {
        let bytes = match std::fs::read(self.path(id)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArchiveError::NotFound(id))
            }
            Err(e) => return Err(e.into()),
        };
        Element::from_xml(&bytes)
            .map_err(|e| ArchiveError::Storage(format!("Corrupt document {id}: {e}")))
    }

    /// Remove a document. Returns false if it did not exist.
    pub fn remove(&self, id: Uuid) -> ArchiveResult<bool> {
        match std::fs::remove_file(self.path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
