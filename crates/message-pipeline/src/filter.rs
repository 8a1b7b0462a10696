//! Inbound filter chain.
//!
//! Base filters either match (and may rewrite the item), miss (leaving it
//! untouched) or drop it outright. Two combinators adjust how a miss or a
//! match is treated; a chain passes an item only if every filter passes it.

use chrono::Utc;
use message_archive::Metadata;
use stanza_model::{carbon, delay_stamp, mam_result, CarbonKind, Element, Jid};
use tracing::warn;

/// What the filters learned about an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub carbon: Option<CarbonKind>,
    pub mam: bool,
}

/// A stanza on its way into the archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub stanza: Element,
    pub metadata: Metadata,
    pub tags: Tags,
}

impl Item {
    /// Wrap a freshly received stanza. Its delay stamp, if any, is the
    /// transmission time.
    pub fn received(stanza: Element) -> Self {
        let metadata = stamped(Metadata::created_now(), &stanza);
        Self {
            stanza,
            metadata,
            tags: Tags::default(),
        }
    }
}

fn stamped(mut metadata: Metadata, stanza: &Element) -> Metadata {
    metadata.transmitted = Some(delay_stamp(stanza).unwrap_or_else(Utc::now));
    metadata
}

/// Result of applying one filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The filter matched; continue with the (possibly rewritten) item.
    Pass(Item),
    /// The filter did not apply to the item.
    Miss(Item),
    /// The item must not be processed further.
    Drop,
}

/// An inbound filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Unwraps a carbon of a message received by another session.
    CarbonReceived,
    /// Unwraps a carbon of a message sent by another session.
    CarbonSent,
    /// Unwraps a MAM query result.
    MamResult,
    /// Passes items the inner filter misses.
    Optional(Box<Filter>),
    /// Drops what the inner filter matches and passes what it misses.
    Inverted(Box<Filter>),
}

impl Filter {
    pub fn optional(self) -> Self {
        Filter::Optional(Box::new(self))
    }

    pub fn inverted(self) -> Self {
        Filter::Inverted(Box::new(self))
    }

    pub fn apply(&self, account: &Jid, item: Item) -> FilterOutcome {
        match self {
            Filter::CarbonReceived => unwrap_carbon(account, item, CarbonKind::Received),
            Filter::CarbonSent => unwrap_carbon(account, item, CarbonKind::Sent),
            Filter::MamResult => unwrap_mam(item),
            Filter::Optional(inner) => match inner.apply(account, item) {
                FilterOutcome::Miss(item) => FilterOutcome::Pass(item),
                other => other,
            },
            Filter::Inverted(inner) => {
                let original = item.clone();
                match inner.apply(account, item) {
                    FilterOutcome::Pass(_) | FilterOutcome::Drop => FilterOutcome::Drop,
                    FilterOutcome::Miss(_) => FilterOutcome::Pass(original),
                }
            }
        }
    }
}

/// The chain applied to every inbound stanza.
pub fn default_chain() -> Vec<Filter> {
    vec![
        Filter::CarbonReceived.optional(),
        Filter::CarbonSent.optional(),
        Filter::MamResult.inverted(),
    ]
}

/// Run `item` through `chain`. Returns the item if every filter passed it.
pub fn run_chain(chain: &[Filter], account: &Jid, item: Item) -> Option<Item> {
    let mut item = item;
    for filter in chain {
        match filter.apply(account, item) {
            FilterOutcome::Pass(next) => item = next,
            FilterOutcome::Miss(_) | FilterOutcome::Drop => return None,
        }
    }
    Some(item)
}

fn unwrap_carbon(account: &Jid, item: Item, kind: CarbonKind) -> FilterOutcome {
    let inner = match carbon(&item.stanza) {
        Some((found, inner)) if found == kind => inner.clone(),
        _ => return FilterOutcome::Miss(item),
    };

    // Only our own server may hand us copies of our messages.
    let trusted = item
        .stanza
        .attr("from")
        .and_then(|from| Jid::parse(from).ok())
        .map(|from| from == account.to_bare())
        .unwrap_or(false);
    if !trusted {
        warn!(
            account = %account.to_bare(),
            from = item.stanza.attr("from").unwrap_or_default(),
            "Dropping forged carbon"
        );
        return FilterOutcome::Drop;
    }

    let metadata = stamped(item.metadata, &inner).with_carbon_copy(true);
    FilterOutcome::Pass(Item {
        stanza: inner,
        metadata,
        tags: Tags {
            carbon: Some(kind),
            ..item.tags
        },
    })
}

fn unwrap_mam(item: Item) -> FilterOutcome {
    match mam_result(&item.stanza) {
        Some(result) => {
            let mut metadata = item.metadata;
            if result.delay.is_some() {
                metadata.transmitted = result.delay;
            }
            FilterOutcome::Pass(Item {
                stanza: result.message,
                metadata,
                tags: Tags {
                    mam: true,
                    ..item.tags
                },
            })
        }
        None => FilterOutcome::Miss(item),
    }
}
