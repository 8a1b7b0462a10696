//! Property tests for index convergence.
//!
//! Pages of one contiguous history, fetched with overlaps or right next to
//! each other, must collapse into a single span whatever order they are
//! added in.

use chrono::{DateTime, Utc};
use proptest::prelude::*;

use crate::{merge, Index, Merge, Partition};

// =============================================================================
// HELPER STRATEGIES
// =============================================================================

fn id(n: usize) -> String {
    format!("m{n:03}")
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

/// Pages as (size, overlap with the next newer page, fetch time).
fn page_shapes() -> impl Strategy<Value = Vec<(usize, usize, i64)>> {
    prop::collection::vec((1usize..6, 0usize..4, 0i64..20), 1..12)
}

/// Lay pages out oldest first and return them with the history length.
fn history(shapes: &[(usize, usize, i64)]) -> (Vec<Partition>, usize) {
    let mut ranges = Vec::with_capacity(shapes.len());
    let mut start = 0;
    for (size, overlap, secs) in shapes {
        let end = start + size - 1;
        ranges.push((start, end, *secs));
        start = end + 1 - (*overlap).min(size - 1);
    }
    let total = ranges.iter().map(|(_, end, _)| end + 1).max().unwrap_or(0);

    let last_page = ranges.len() - 1;
    let pages = ranges
        .iter()
        .enumerate()
        .map(|(i, (start, end, secs))| {
            // Each page was fetched with the id following it as cursor.
            let before = (i < last_page).then(|| id(end + 1));
            Partition::new(id(*start), id(*end), at(*secs), (*start..=*end).map(id)).with_before(before)
        })
        .collect();
    (pages, total)
}

fn arbitrary_partition() -> impl Strategy<Value = Partition> {
    (0usize..8, 1usize..6, 0i64..5, any::<bool>(), any::<bool>()).prop_map(
        |(start, size, secs, stable, complete)| {
            let end = start + size - 1;
            Partition::new(id(start), id(end), at(secs), (start..=end).map(id))
                .with_stable(stable)
                .with_complete(complete)
        },
    )
}

fn partition_with_cursor() -> impl Strategy<Value = Partition> {
    (arbitrary_partition(), prop::option::of(0usize..14))
        .prop_map(|(partition, before)| partition.with_before(before.map(id)))
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    /// Any insertion order of a contiguous history yields one span covering it.
    #[test]
    fn contiguous_pages_converge(
        (pages, total) in page_shapes().prop_map(|shapes| history(&shapes)),
        order in prop::collection::vec(any::<prop::sample::Index>(), 12),
    ) {
        let mut remaining = pages;
        let mut index = Index::new();
        for pick in order {
            if remaining.is_empty() {
                break;
            }
            let next = remaining.remove(pick.index(remaining.len()));
            index.add(next);
        }
        for page in remaining {
            index.add(page);
        }

        prop_assert_eq!(index.len(), 1);
        let span = &index.partitions()[0];
        prop_assert_eq!(&span.first, &id(0));
        prop_assert_eq!(&span.last, &id(total - 1));
        prop_assert_eq!(span.archive_ids.len(), total);
    }

    /// Merging two partitions does not depend on argument order.
    #[test]
    fn merge_is_commutative(a in arbitrary_partition(), b in arbitrary_partition()) {
        prop_assert_eq!(merge(a.clone(), b.clone()), merge(b, a));
    }

    /// Index entries never share ids.
    #[test]
    fn index_entries_are_disjoint(partitions in prop::collection::vec(partition_with_cursor(), 1..8)) {
        let mut index = Index::new();
        for partition in partitions {
            index.add(partition);
        }

        let entries = index.partitions();
        for (i, a) in entries.iter().enumerate() {
            prop_assert!(a.contains(&a.first) && a.contains(&a.last));
            for b in &entries[i + 1..] {
                prop_assert!(!a.joins(b));
            }
        }
        for pair in entries.windows(2) {
            prop_assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }
}

#[test]
fn adjacent_pages_merge_into_one() {
    let older = Partition::new(id(0), id(2), at(1), (0..=2).map(id)).with_before(Some(id(3)));
    let newer = Partition::new(id(3), id(5), at(2), (3..=5).map(id));
    let Merge::Merged(merged) = merge(older, newer) else {
        panic!("expected a merge");
    };
    assert_eq!(merged.archive_ids.len(), 6);
}
