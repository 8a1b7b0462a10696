//! Inbound pipeline tests.

use std::time::Duration;

use mam_sync::SyncCoordinator;
use message_archive::{ArchiveError, Direction};
use stanza_model::{ns, Element};
use tempfile::TempDir;

use super::harness::{at, carbon, chat, gated_manager, jid, manager, GatedOpener, ALICE, BOB};
use crate::{InboundPipeline, PipelineError};

async fn wait_for_queue(pipeline: &InboundPipeline, len: usize) {
    for _ in 0..200 {
        if pipeline.queued().await >= len {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("queue never reached {len} items");
}

#[tokio::test]
async fn items_queue_while_archive_opens_and_drain_in_order() {
    let dir = TempDir::new().unwrap();
    let opener = GatedOpener::new(None);
    let archives = gated_manager(dir.path(), opener.clone());
    let pipeline = InboundPipeline::new(&jid(ALICE), archives.clone(), None);

    let mut handles = Vec::new();
    for (n, origin) in ["o1", "o2", "o3"].into_iter().enumerate() {
        let task_pipeline = pipeline.clone();
        let stanza = chat(BOB, ALICE, Some(origin), Some(at(0)));
        handles.push(tokio::spawn(async move { task_pipeline.receive(stanza).await }));
        wait_for_queue(&pipeline, n + 1).await;
    }

    opener.release();
    let mut ids = Vec::new();
    for handle in handles {
        let record = handle.await.unwrap().unwrap().expect("archived");
        assert_eq!(record.direction, Direction::Inbound);
        ids.push(record.id);
    }
    assert_eq!(opener.calls(), 1);

    let archive = archives.archive(&jid(ALICE), false).await.unwrap();
    let listed: Vec<_> = archive.all().await.unwrap().into_iter().map(|r| r.id).collect();
    ids.reverse();
    assert_eq!(listed, ids);

    let metadata = archive.metadata(ids[0]).await.unwrap();
    assert_eq!(metadata.transmitted, Some(at(0)));
    assert!(metadata.created.is_some());
}

#[tokio::test]
async fn open_failure_fails_every_queued_item() {
    let dir = TempDir::new().unwrap();
    let failure = ArchiveError::Storage("disk full".into());
    let opener = GatedOpener::new(Some(failure.clone()));
    let archives = gated_manager(dir.path(), opener.clone());
    let pipeline = InboundPipeline::new(&jid(ALICE), archives, None);

    let mut handles = Vec::new();
    for (n, origin) in ["o1", "o2"].into_iter().enumerate() {
        let task_pipeline = pipeline.clone();
        let stanza = chat(BOB, ALICE, Some(origin), None);
        handles.push(tokio::spawn(async move { task_pipeline.receive(stanza).await }));
        wait_for_queue(&pipeline, n + 1).await;
    }

    opener.release();
    for handle in handles {
        assert_eq!(handle.await.unwrap(), Err(PipelineError::Archive(failure.clone())));
    }

    // The failure is not cached: the next item tries again.
    let again = pipeline.receive(chat(BOB, ALICE, Some("o3"), None)).await;
    assert_eq!(again, Err(PipelineError::Archive(failure)));
    assert_eq!(opener.calls(), 2);
}

#[tokio::test]
async fn duplicates_are_reported_as_already_archived() {
    let dir = TempDir::new().unwrap();
    let pipeline = InboundPipeline::new(&jid(ALICE), manager(dir.path()), None);

    let first = pipeline.receive(chat(BOB, ALICE, Some("o1"), None)).await.unwrap();
    assert!(first.is_some());
    let second = pipeline.receive(chat(BOB, ALICE, Some("o1"), None)).await.unwrap();
    assert_eq!(second, None);
}

#[tokio::test]
async fn carbons_are_archived_as_copies() {
    let dir = TempDir::new().unwrap();
    let archives = manager(dir.path());
    let pipeline = InboundPipeline::new(&jid(ALICE), archives.clone(), None);

    let received = carbon("received", ALICE, chat(BOB, &format!("{ALICE}/laptop"), Some("o1"), None));
    let record = pipeline.receive(received).await.unwrap().unwrap();
    assert_eq!(record.direction, Direction::Inbound);
    assert_eq!(record.counterpart, BOB);

    let sent = carbon("sent", ALICE, chat(&format!("{ALICE}/laptop"), BOB, Some("o2"), Some(at(5))));
    let record = pipeline.receive(sent).await.unwrap().unwrap();
    assert_eq!(record.direction, Direction::Outbound);
    assert_eq!(record.counterpart, BOB);

    let archive = archives.archive(&jid(ALICE), false).await.unwrap();
    let metadata = archive.metadata(record.id).await.unwrap();
    assert!(metadata.is_carbon_copy);
    assert_eq!(metadata.transmitted, Some(at(5)));
    assert!(archive.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn forged_carbons_are_not_archived() {
    let dir = TempDir::new().unwrap();
    let archives = manager(dir.path());
    let pipeline = InboundPipeline::new(&jid(ALICE), archives.clone(), None);

    let forged = carbon("sent", "mallory@evil.example", chat(ALICE, BOB, Some("o1"), None));
    assert_eq!(pipeline.receive(forged).await.unwrap(), None);
    assert!(!archives.exists(&jid(ALICE)));
}

#[tokio::test]
async fn mam_results_bypass_the_archive_path() {
    let dir = TempDir::new().unwrap();
    let archives = manager(dir.path());
    let coordinator = SyncCoordinator::new(archives.clone());

    let forwarded = Element::builder("forwarded", ns::FORWARD)
        .append(chat(BOB, ALICE, Some("o1"), None))
        .build();
    let result = Element::builder("message", ns::CLIENT)
        .attr("from", ALICE)
        .append(
            Element::builder("result", ns::MAM)
                .attr("queryid", "q1")
                .attr("id", "r1")
                .append(forwarded)
                .build(),
        )
        .build();

    let plain = InboundPipeline::new(&jid(ALICE), archives.clone(), None);
    assert_eq!(plain.receive(result.clone()).await.unwrap(), None);

    let routed = InboundPipeline::new(&jid(ALICE), archives.clone(), Some(coordinator));
    assert_eq!(routed.receive(result).await.unwrap(), None);

    assert!(!archives.exists(&jid(ALICE)));
}

#[tokio::test]
async fn deleted_archive_is_reopened() {
    let dir = TempDir::new().unwrap();
    let archives = manager(dir.path());
    let pipeline = InboundPipeline::new(&jid(ALICE), archives.clone(), None);

    pipeline.receive(chat(BOB, ALICE, Some("o1"), None)).await.unwrap().unwrap();
    archives.delete_archive(&jid(ALICE)).await.unwrap();

    let stale = pipeline.receive(chat(BOB, ALICE, Some("o2"), None)).await;
    assert_eq!(stale, Err(PipelineError::Archive(ArchiveError::Closed)));

    let fresh = pipeline.receive(chat(BOB, ALICE, Some("o3"), None)).await.unwrap();
    assert!(fresh.is_some());
    let archive = archives.archive(&jid(ALICE), false).await.unwrap();
    assert_eq!(archive.count().await.unwrap(), 1);
}
