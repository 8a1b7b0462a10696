use std::collections::HashSet;

use tempfile::tempdir;

use super::*;
use crate::{ArchiveError, Metadata};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_all_land() {
    let dir = tempdir().unwrap();
    let archive = open_archive(dir.path(), ALICE);

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let archive = archive.clone();
            tokio::spawn(async move {
                archive
                    .insert(
                        body(with_origin_id(chat(ALICE, BOB), &format!("o-{i}")), "x"),
                        Metadata::created_now(),
                    )
                    .await
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        ids.insert(handle.await.unwrap().unwrap().id);
    }
    assert_eq!(ids.len(), 20);
    assert_eq!(archive.count().await.unwrap(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_duplicates_store_exactly_one() {
    let dir = tempdir().unwrap();
    let archive = open_archive(dir.path(), ALICE);

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let archive = archive.clone();
            tokio::spawn(async move {
                archive
                    .insert(
                        body(with_origin_id(chat(ALICE, BOB), "same"), "x"),
                        Metadata::created_now(),
                    )
                    .await
            })
        })
        .collect();

    let mut stored = Vec::new();
    let mut duplicates = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(record) => stored.push(record.id),
            Err(ArchiveError::DuplicateMessage(existing)) => duplicates.push(existing),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(stored.len(), 1);
    assert_eq!(duplicates.len(), 9);
    assert!(duplicates.iter().all(|id| *id == stored[0]));
    assert_eq!(archive.count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_partial_inserts() {
    let dir = tempdir().unwrap();
    let archive = open_archive(dir.path(), ALICE);

    let writer = {
        let archive = archive.clone();
        tokio::spawn(async move {
            for i in 0..25 {
                archive
                    .insert(body(chat(BOB, ALICE), &format!("{i}")), Metadata::created_now())
                    .await
                    .unwrap();
            }
        })
    };

    let reader = {
        let archive = archive.clone();
        tokio::spawn(async move {
            let mut last = 0;
            for _ in 0..25 {
                let all = archive.all().await.unwrap();
                assert!(all.len() >= last);
                last = all.len();
                for record in &all {
                    // Every listed message has its document on disk.
                    archive.document(record.id).await.unwrap();
                }
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
    assert_eq!(archive.count().await.unwrap(), 25);
}
