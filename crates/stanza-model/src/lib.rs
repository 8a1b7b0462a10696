//! Stanza model used by the archive and sync crates.
//!
//! Not a general XMPP library: it covers the element tree the document store
//! persists, bare-address handling, and the handful of extensions the archive
//! reads (origin-id, stanza-id, delay, carbons, MAM).

mod element;
mod error;
mod jid;
pub mod message;
pub mod ns;

pub use element::{Element, ElementBuilder, Node};
pub use error::{StanzaError, StanzaResult};
pub use jid::Jid;
pub use message::{
    carbon, delay_stamp, mam_query, mam_result, origin_id, scoped_stanza_id, stanza_id, CarbonKind, Fin,
    MamResult, MessageType, StanzaIdScope,
};
