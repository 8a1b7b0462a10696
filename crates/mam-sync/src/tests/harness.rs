//! Test harness for sync tests.
//!
//! Provides:
//! - MockTransport: a transport whose queries are answered by the test
//! - MockServer: the test's side of the transport
//! - stanza builders for archived messages, results and fin responses

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use archive_config_and_utils::Paths;
use archive_lifecycle::ArchiveManager;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_archive::ArchiveOptions;
use stanza_model::{ns, Element, Jid};
use tokio::sync::{mpsc, oneshot};

use crate::{SyncCoordinator, Transport, TransportError};

pub(crate) const ALICE: &str = "alice@example.com";
pub(crate) const BOB: &str = "bob@example.net";

pub(crate) fn jid(address: &str) -> Jid {
    Jid::parse(address).unwrap()
}

/// How the server answers a query.
#[allow(dead_code)]
pub(crate) enum Reply {
    Response(Element),
    Error(TransportError),
    /// Never answer.
    Hang,
}

/// A query waiting for the test to answer it.
pub(crate) struct PendingQuery {
    pub query_id: String,
    pub before: Option<String>,
    pub max: u32,
    reply: oneshot::Sender<Reply>,
}

impl PendingQuery {
    pub fn respond(self, reply: Reply) {
        let _ = self.reply.send(reply);
    }

    /// Answer with a fin carrying page bounds.
    pub fn fin(self, first: &str, last: &str, stable: bool, complete: bool) {
        let response = fin_response(&self.query_id, Some((first, last)), stable, complete);
        self.respond(Reply::Response(response));
    }

    /// Answer with a fin for an empty page.
    pub fn empty(self, complete: bool) {
        let response = fin_response(&self.query_id, None, true, complete);
        self.respond(Reply::Response(response));
    }
}

/// Transport whose queries surface on a [`MockServer`].
pub(crate) struct MockTransport {
    queries: mpsc::UnboundedSender<PendingQuery>,
    sent: Mutex<Vec<Element>>,
}

/// The test's end of a [`MockTransport`].
pub(crate) struct MockServer {
    queries: mpsc::UnboundedReceiver<PendingQuery>,
}

pub(crate) fn mock_transport() -> (Arc<MockTransport>, MockServer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = MockTransport {
        queries: tx,
        sent: Mutex::new(Vec::new()),
    };
    (Arc::new(transport), MockServer { queries: rx })
}

impl MockTransport {
    #[allow(dead_code)]
    pub fn sent(&self) -> Vec<Element> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, stanza: Element) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(stanza);
        Ok(())
    }

    async fn request(&self, stanza: Element, _timeout: Duration) -> Result<Element, TransportError> {
        let query = stanza.get_child("query", ns::MAM).expect("not a MAM query");
        let set = query.get_child("set", ns::RSM).expect("query without set");
        let before = set
            .get_child("before", ns::RSM)
            .map(|el| el.text())
            .filter(|text| !text.is_empty());
        let max = set
            .get_child("max", ns::RSM)
            .and_then(|el| el.text().parse().ok())
            .unwrap_or(0);

        let (tx, rx) = oneshot::channel();
        let pending = PendingQuery {
            query_id: query.attr("queryid").unwrap_or_default().to_string(),
            before,
            max,
            reply: tx,
        };
        if self.queries.send(pending).is_err() {
            return Err(TransportError::NotConnected);
        }

        match rx.await {
            Ok(Reply::Response(response)) => Ok(response),
            Ok(Reply::Error(err)) => Err(err),
            Ok(Reply::Hang) => std::future::pending().await,
            Err(_) => Err(TransportError::NotConnected),
        }
    }
}

impl MockServer {
    /// Wait for the next query.
    pub async fn next_query(&mut self) -> PendingQuery {
        tokio::time::timeout(Duration::from_secs(5), self.queries.recv())
            .await
            .expect("no query within 5s")
            .expect("transport dropped")
    }

    /// A query that was already sent, if any.
    pub fn try_next_query(&mut self) -> Option<PendingQuery> {
        self.queries.try_recv().ok()
    }
}

/// A coordinator over a fresh storage root.
pub(crate) fn coordinator(dir: &Path) -> SyncCoordinator {
    let paths = Paths::with_base_dir(dir.to_path_buf());
    let archives = Arc::new(ArchiveManager::new(paths, ArchiveOptions::default()));
    SyncCoordinator::new(archives).with_timeout(Duration::from_secs(5))
}

/// A message from `from` to `to` as stored on the server.
pub(crate) fn archived(from: &str, to: &str, origin_id: Option<&str>, body: &str) -> Element {
    let mut builder = Element::builder("message", ns::CLIENT)
        .attr("from", from)
        .attr("to", to)
        .attr("type", "chat")
        .append(Element::builder("body", ns::CLIENT).text(body).build());
    if let Some(id) = origin_id {
        builder = builder.append(Element::builder("origin-id", ns::SID).attr("id", id).build());
    }
    builder.build()
}

/// A MAM result delivering `message` for `query_id`.
pub(crate) fn result_stanza(
    account: &str,
    query_id: &str,
    archive_id: &str,
    message: Element,
    stamp: Option<DateTime<Utc>>,
) -> Element {
    let mut forwarded = Element::builder("forwarded", ns::FORWARD);
    if let Some(stamp) = stamp {
        forwarded = forwarded.append(
            Element::builder("delay", ns::DELAY)
                .attr("stamp", stamp.to_rfc3339())
                .build(),
        );
    }
    let result = Element::builder("result", ns::MAM)
        .attr("queryid", query_id)
        .attr("id", archive_id)
        .append(forwarded.append(message).build())
        .build();

    Element::builder("message", ns::CLIENT)
        .attr("from", account)
        .attr("to", format!("{account}/desktop"))
        .append(result)
        .build()
}

/// An iq result carrying a fin element.
pub(crate) fn fin_response(
    query_id: &str,
    bounds: Option<(&str, &str)>,
    stable: bool,
    complete: bool,
) -> Element {
    let mut set = Element::builder("set", ns::RSM);
    if let Some((first, last)) = bounds {
        set = set
            .append(Element::builder("first", ns::RSM).text(first).build())
            .append(Element::builder("last", ns::RSM).text(last).build());
    }
    let fin = Element::builder("fin", ns::MAM)
        .attr("stable", stable.to_string())
        .attr("complete", complete.to_string())
        .append(set.build())
        .build();

    Element::builder("iq", ns::CLIENT)
        .attr("type", "result")
        .attr("id", query_id)
        .append(fin)
        .build()
}

pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}
