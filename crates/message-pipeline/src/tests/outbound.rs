//! Outbound dispatcher tests.

use std::sync::Arc;
use std::time::Duration;

use mam_sync::{Transport, TransportError};
use message_archive::Metadata;
use tempfile::TempDir;

use super::harness::{chat, open_archive, MockTransport, ALICE, BOB};
use crate::{Dispatch, OutboundDispatcher};

fn dispatcher(dir: &TempDir, transport: &Arc<MockTransport>) -> OutboundDispatcher {
    let transport: Arc<dyn Transport> = transport.clone();
    OutboundDispatcher::new(open_archive(dir.path(), ALICE), transport)
}

fn outgoing(origin: &str) -> stanza_model::Element {
    chat(&format!("{ALICE}/desktop"), BOB, Some(origin), None)
}

#[tokio::test]
async fn submitted_messages_are_sent_and_stamped() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&dir, &transport);

    let (record, dispatch) = dispatcher.submit(outgoing("o1")).await.unwrap();
    assert_eq!(dispatch, Dispatch::Sent);
    assert_eq!(transport.sent(), vec![outgoing("o1")]);

    let metadata = dispatcher.archive().metadata(record.id).await.unwrap();
    assert!(metadata.transmitted.is_some());
    assert_eq!(metadata.error, None);
    assert!(dispatcher.archive().pending().await.unwrap().is_empty());
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn transient_failures_wait_for_reconnect() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&dir, &transport);

    transport.push_result(Err(TransportError::NoRoute));
    transport.push_result(Err(TransportError::NotConnected));
    let (first, dispatch) = dispatcher.submit(outgoing("o1")).await.unwrap();
    assert_eq!(dispatch, Dispatch::Deferred);
    let (_, dispatch) = dispatcher.submit(outgoing("o2")).await.unwrap();
    assert_eq!(dispatch, Dispatch::Deferred);

    let metadata = dispatcher.archive().metadata(first.id).await.unwrap();
    assert_eq!(metadata.error, None);
    assert_eq!(metadata.transmitted, None);
    assert_eq!(dispatcher.archive().pending().await.unwrap().len(), 2);

    assert_eq!(dispatcher.resend_pending().await.unwrap(), 2);
    assert!(dispatcher.archive().pending().await.unwrap().is_empty());
    assert_eq!(transport.sent_count(), 4);
}

#[tokio::test]
async fn permanent_failures_are_recorded() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&dir, &transport);

    let rejection = TransportError::Rejected("service-unavailable".into());
    transport.push_result(Err(rejection.clone()));
    let (record, dispatch) = dispatcher.submit(outgoing("o1")).await.unwrap();
    assert_eq!(dispatch, Dispatch::Failed(rejection.clone()));

    let metadata = dispatcher.archive().metadata(record.id).await.unwrap();
    assert_eq!(metadata.error, Some(rejection.to_string()));
    assert_eq!(metadata.transmitted, None);

    // Errored messages are no longer pending and are not retried.
    assert_eq!(dispatcher.resend_pending().await.unwrap(), 0);
    assert_eq!(dispatcher.transmit(record.id).await.unwrap(), Dispatch::NotPending);
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn concurrent_attempts_send_once() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&dir, &transport);

    let record = dispatcher
        .archive()
        .insert(outgoing("o1"), Metadata::created_now())
        .await
        .unwrap();

    transport.gate();
    let first = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.transmit(record.id).await })
    };
    for _ in 0..200 {
        if dispatcher.in_flight() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(dispatcher.in_flight(), 1);

    assert_eq!(dispatcher.transmit(record.id).await.unwrap(), Dispatch::InFlight);

    transport.open_gate();
    assert_eq!(first.await.unwrap().unwrap(), Dispatch::Sent);
    assert_eq!(dispatcher.transmit(record.id).await.unwrap(), Dispatch::NotPending);
    assert_eq!(transport.sent_count(), 1);
}

#[tokio::test]
async fn inbound_messages_are_never_sent() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&dir, &transport);

    let record = dispatcher
        .archive()
        .insert(chat(BOB, ALICE, Some("o1"), None), Metadata::created_now())
        .await
        .unwrap();

    assert_eq!(dispatcher.transmit(record.id).await.unwrap(), Dispatch::NotPending);
    assert_eq!(dispatcher.resend_pending().await.unwrap(), 0);
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn follower_sends_inserted_messages() {
    let dir = TempDir::new().unwrap();
    let transport = MockTransport::new();
    let dispatcher = dispatcher(&dir, &transport);
    let follower = dispatcher.follow();

    let record = dispatcher
        .archive()
        .insert(outgoing("o1"), Metadata::created_now())
        .await
        .unwrap();
    for _ in 0..200 {
        if transport.sent_count() == 1 && dispatcher.in_flight() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(transport.sent_count(), 1);

    // A submit racing the follower still sends once.
    let (_, dispatch) = dispatcher.submit(outgoing("o2")).await.unwrap();
    assert!(matches!(dispatch, Dispatch::Sent | Dispatch::InFlight | Dispatch::NotPending));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.sent_count(), 2);

    let metadata = dispatcher.archive().metadata(record.id).await.unwrap();
    assert!(metadata.transmitted.is_some());
    follower.abort();
}
