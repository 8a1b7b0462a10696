use message_archive::{Archive, ArchiveOptions, ArchiveResult, StorageLayout};
use stanza_model::Jid;

/// Opens archive storage. Runs on a blocking thread.
pub trait ArchiveOpener: Send + Sync + 'static {
    fn open(
        &self,
        account: &Jid,
        layout: StorageLayout,
        options: &ArchiveOptions,
    ) -> ArchiveResult<Archive>;
}

/// Opens archives from local storage.
#[derive(Debug, Default, Clone, Copy)]
pub struct StorageOpener;

impl ArchiveOpener for StorageOpener {
    fn open(
        &self,
        account: &Jid,
        layout: StorageLayout,
        options: &ArchiveOptions,
    ) -> ArchiveResult<Archive> {
        Archive::open(account, layout, options)
    }
}
