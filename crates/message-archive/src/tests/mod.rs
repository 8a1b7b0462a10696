//! Scenario tests for the archive.
//!
//! - `records.rs`     - insert classification, validation, point reads and writes
//! - `dedup.rs`       - origin-id / stanza-id deduplication
//! - `ordering.rs`    - listing order, recent and pending
//! - `concurrency.rs` - concurrent readers and writers
//! - `changes.rs`     - change notifications

mod concurrency;

use std::path::Path;

use chrono::{DateTime, Utc};
use stanza_model::{ns, Element, ElementBuilder, Jid};

use crate::{Archive, ArchiveOptions, StorageLayout};

pub(crate) const ALICE: &str = "alice@example.com";
pub(crate) const BOB: &str = "bob@example.net";
pub(crate) const CAROL: &str = "carol@example.org";

pub(crate) fn open_archive(dir: &Path, account: &str) -> Archive {
    let account = Jid::parse(account).unwrap();
    let layout = StorageLayout::new(dir.join(account.to_string()));
    Archive::open(&account, layout, &ArchiveOptions::default()).unwrap()
}

/// A chat message builder with addresses set.
pub(crate) fn chat(from: &str, to: &str) -> ElementBuilder {
    Element::builder("message", ns::CLIENT)
        .attr("from", from)
        .attr("to", to)
        .attr("type", "chat")
}

pub(crate) fn with_origin_id(builder: ElementBuilder, id: &str) -> ElementBuilder {
    builder.append(Element::builder("origin-id", ns::SID).attr("id", id).build())
}

pub(crate) fn with_stanza_id(builder: ElementBuilder, by: &str, id: &str) -> ElementBuilder {
    builder.append(
        Element::builder("stanza-id", ns::SID)
            .attr("by", by)
            .attr("id", id)
            .build(),
    )
}

pub(crate) fn body(builder: ElementBuilder, text: &str) -> Element {
    builder
        .append(Element::builder("body", ns::CLIENT).text(text).build())
        .build()
}

pub(crate) fn at(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
}
