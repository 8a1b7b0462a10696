//! Namespaces understood by the archive.

pub const CLIENT: &str = "jabber:client";
pub const SID: &str = "urn:xmpp:sid:0";
pub const DELAY: &str = "urn:xmpp:delay";
pub const CARBONS: &str = "urn:xmpp:carbons:2";
pub const FORWARD: &str = "urn:xmpp:forward:0";
pub const MAM: &str = "urn:xmpp:mam:2";
pub const RSM: &str = "http://jabber.org/protocol/rsm";
