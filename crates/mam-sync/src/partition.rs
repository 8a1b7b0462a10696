//! Spans of remote archive ids and how they merge.
//!
//! Archive ids are opaque: nothing here compares them by value. Two spans
//! relate either by sharing ids or by one span having been fetched with the
//! other's oldest id as its `before` cursor.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A span of the remote archive known to be present locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    /// Oldest archive id in the span.
    pub first: String,
    /// Newest archive id in the span.
    pub last: String,
    /// When the span was fetched; newer spans rank first in the index.
    pub timestamp: DateTime<Utc>,
    pub stable: bool,
    /// No older messages exist on the server.
    pub complete: bool,
    pub archive_ids: BTreeSet<String>,
    /// Cursor the span was fetched with.
    pub before: Option<String>,
}

impl Partition {
    /// Build a partition. `first` and `last` are always part of the id set.
    pub fn new(
        first: impl Into<String>,
        last: impl Into<String>,
        timestamp: DateTime<Utc>,
        archive_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        let first = first.into();
        let last = last.into();
        let mut archive_ids: BTreeSet<String> = archive_ids.into_iter().collect();
        archive_ids.insert(first.clone());
        archive_ids.insert(last.clone());
        Self {
            first,
            last,
            timestamp,
            stable: true,
            complete: false,
            archive_ids,
            before: None,
        }
    }

    pub fn with_stable(mut self, stable: bool) -> Self {
        self.stable = stable;
        self
    }

    pub fn with_complete(mut self, complete: bool) -> Self {
        self.complete = complete;
        self
    }

    pub fn with_before(mut self, before: Option<String>) -> Self {
        self.before = before;
        self
    }

    pub fn contains(&self, archive_id: &str) -> bool {
        self.archive_ids.contains(archive_id)
    }

    pub fn overlaps(&self, other: &Partition) -> bool {
        let (small, large) = if self.archive_ids.len() <= other.archive_ids.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.archive_ids.iter().any(|id| large.contains(id))
    }

    /// True when `self` was fetched right before `newer`.
    pub fn precedes(&self, newer: &Partition) -> bool {
        self.before.as_deref() == Some(newer.first.as_str())
    }

    /// True when the two spans share ids or touch.
    pub fn joins(&self, other: &Partition) -> bool {
        self.overlaps(other) || self.precedes(other) || other.precedes(self)
    }

    /// Recency order with a deterministic tie-break on the bounds.
    fn recency(&self, other: &Partition) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.first.cmp(&other.first))
            .then_with(|| self.last.cmp(&other.last))
    }
}

/// Outcome of merging two partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    Merged(Partition),
    /// The spans do not touch; kept apart, most recent first.
    Separate { recent: Partition, other: Partition },
}

/// Merge two partitions.
pub fn merge(a: Partition, b: Partition) -> Merge {
    if a.overlaps(&b) {
        return Merge::Merged(merge_overlapping(a, b));
    }
    if a.precedes(&b) {
        return Merge::Merged(concat(a, b));
    }
    if b.precedes(&a) {
        return Merge::Merged(concat(b, a));
    }
    if a.recency(&b) == Ordering::Less {
        Merge::Separate { recent: b, other: a }
    } else {
        Merge::Separate { recent: a, other: b }
    }
}

/// Join an older span with the span fetched right after it.
fn concat(older: Partition, newer: Partition) -> Partition {
    let mut archive_ids = older.archive_ids;
    archive_ids.extend(newer.archive_ids);
    Partition {
        first: older.first,
        last: newer.last,
        timestamp: older.timestamp.max(newer.timestamp),
        stable: older.stable && newer.stable,
        complete: older.complete || newer.complete,
        archive_ids,
        before: newer.before,
    }
}

fn merge_overlapping(a: Partition, b: Partition) -> Partition {
    let (older, newer) = if a.recency(&b) == Ordering::Greater {
        (b, a)
    } else {
        (a, b)
    };

    // The span whose bound lies outside the other reaches further.
    let older_reaches_back = !newer.contains(&older.first) && older.contains(&newer.first);
    let newer_reaches_back = !older.contains(&newer.first) && newer.contains(&older.first);
    let first = if newer_reaches_back && !older_reaches_back {
        newer.first.clone()
    } else {
        older.first.clone()
    };

    let older_reaches_forward = !newer.contains(&older.last) && older.contains(&newer.last);
    let newer_reaches_forward = !older.contains(&newer.last) && newer.contains(&older.last);
    let (last, before) = if older_reaches_forward && !newer_reaches_forward {
        (older.last.clone(), older.before.clone())
    } else {
        (newer.last.clone(), newer.before.clone())
    };

    let mut archive_ids = older.archive_ids;
    archive_ids.extend(newer.archive_ids);
    Partition {
        first,
        last,
        timestamp: older.timestamp.max(newer.timestamp),
        stable: older.stable && newer.stable,
        complete: older.complete || newer.complete,
        archive_ids,
        before,
    }
}
