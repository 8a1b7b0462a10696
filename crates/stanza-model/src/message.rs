//! Helpers for the message extensions the archive reads.

use chrono::{DateTime, Utc};

use crate::{ns, Element, Jid, StanzaError, StanzaResult};

/// The `type` attribute of a message stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Chat,
    Error,
    Groupchat,
    Headline,
    Normal,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Chat => "chat",
            MessageType::Error => "error",
            MessageType::Groupchat => "groupchat",
            MessageType::Headline => "headline",
            MessageType::Normal => "normal",
        }
    }

    /// Parse the attribute value. A missing attribute means `normal`.
    pub fn from_attr(value: Option<&str>) -> StanzaResult<Self> {
        match value {
            None | Some("normal") => Ok(MessageType::Normal),
            Some("chat") => Ok(MessageType::Chat),
            Some("error") => Ok(MessageType::Error),
            Some("groupchat") => Ok(MessageType::Groupchat),
            Some("headline") => Ok(MessageType::Headline),
            Some(other) => Err(StanzaError::Invalid(format!("unknown message type '{other}'"))),
        }
    }

    pub fn of(message: &Element) -> StanzaResult<Self> {
        Self::from_attr(message.attr("type"))
    }
}

/// Client-assigned origin id.
pub fn origin_id(message: &Element) -> Option<&str> {
    message
        .get_child("origin-id", ns::SID)
        .and_then(|el| el.attr("id"))
        .filter(|id| !id.is_empty())
}

/// Who issued a stanza id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StanzaIdScope {
    /// The account's own archive.
    Account,
    /// The account's host.
    Host,
}

impl StanzaIdScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            StanzaIdScope::Account => "account",
            StanzaIdScope::Host => "host",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "account" => Some(StanzaIdScope::Account),
            "host" => Some(StanzaIdScope::Host),
            _ => None,
        }
    }
}

/// Server-assigned stanza id, accepted only when issued by the account
/// itself or by the account's host.
pub fn stanza_id<'a>(message: &'a Element, account: &Jid) -> Option<&'a str> {
    scoped_stanza_id(message, account).map(|(_, id)| id)
}

/// Like [`stanza_id`], together with who issued it.
pub fn scoped_stanza_id<'a>(message: &'a Element, account: &Jid) -> Option<(StanzaIdScope, &'a str)> {
    let bare = account.to_bare().to_string();
    let host = account.domain();
    message
        .children()
        .filter(|child| child.is("stanza-id", ns::SID))
        .find_map(|child| {
            let by = Jid::parse(child.attr("by")?).ok()?.to_string();
            let scope = if by == bare {
                StanzaIdScope::Account
            } else if by == host {
                StanzaIdScope::Host
            } else {
                return None;
            };
            let id = child.attr("id").filter(|id| !id.is_empty())?;
            Some((scope, id))
        })
}

/// The delayed-delivery stamp of a stanza, if present and well-formed.
pub fn delay_stamp(stanza: &Element) -> Option<DateTime<Utc>> {
    stanza
        .get_child("delay", ns::DELAY)
        .and_then(|delay| delay.attr("stamp"))
        .and_then(|stamp| DateTime::parse_from_rfc3339(stamp).ok())
        .map(|stamp| stamp.with_timezone(&Utc))
}

/// Direction of a message carbon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarbonKind {
    Received,
    Sent,
}

/// Unwrap a message carbon, returning its kind and the forwarded message.
pub fn carbon(message: &Element) -> Option<(CarbonKind, &Element)> {
    let (kind, wrapper) = if let Some(received) = message.get_child("received", ns::CARBONS) {
        (CarbonKind::Received, received)
    } else {
        (CarbonKind::Sent, message.get_child("sent", ns::CARBONS)?)
    };
    let inner = forwarded_message(wrapper)?;
    Some((kind, inner))
}

fn forwarded_message(wrapper: &Element) -> Option<&Element> {
    wrapper
        .get_child("forwarded", ns::FORWARD)?
        .get_child("message", ns::CLIENT)
}

/// One result of a MAM query.
#[derive(Debug, Clone, PartialEq)]
pub struct MamResult {
    pub query_id: Option<String>,
    pub archive_id: String,
    pub message: Element,
    /// Delay stamp of the forwarded message, or of the forwarding wrapper.
    pub delay: Option<DateTime<Utc>>,
}

/// Unwrap a MAM result message.
pub fn mam_result(stanza: &Element) -> Option<MamResult> {
    let result = stanza.get_child("result", ns::MAM)?;
    let archive_id = result.attr("id").filter(|id| !id.is_empty())?;
    let forwarded = result.get_child("forwarded", ns::FORWARD)?;
    let message = forwarded.get_child("message", ns::CLIENT)?;
    let delay = delay_stamp(message).or_else(|| delay_stamp(forwarded));

    Some(MamResult {
        query_id: result.attr("queryid").map(str::to_string),
        archive_id: archive_id.to_string(),
        message: message.clone(),
        delay,
    })
}

/// The terminal element of a MAM query response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fin {
    pub first: Option<String>,
    pub last: Option<String>,
    pub stable: bool,
    pub complete: bool,
}

impl Fin {
    /// Read the fin element out of an iq response.
    ///
    /// `stable` defaults to true and `complete` to false. A page bound
    /// without its counterpart is rejected.
    pub fn from_response(iq: &Element) -> StanzaResult<Self> {
        if !iq.is("iq", ns::CLIENT) || iq.attr("type") != Some("result") {
            return Err(StanzaError::Invalid("expected iq result".into()));
        }
        let fin = iq
            .get_child("fin", ns::MAM)
            .ok_or_else(|| StanzaError::Invalid("missing fin element".into()))?;

        let stable = parse_bool(fin.attr("stable"), true)?;
        let complete = parse_bool(fin.attr("complete"), false)?;

        let set = fin.get_child("set", ns::RSM);
        let bound = |name: &str| {
            set.and_then(|set| set.get_child(name, ns::RSM))
                .map(|el| el.text().trim().to_string())
                .filter(|text| !text.is_empty())
        };
        let first = bound("first");
        let last = bound("last");
        if first.is_some() != last.is_some() {
            return Err(StanzaError::Invalid("fin carries only one page bound".into()));
        }

        Ok(Fin {
            first,
            last,
            stable,
            complete,
        })
    }

    pub fn is_empty_page(&self) -> bool {
        self.first.is_none()
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> StanzaResult<bool> {
    match value {
        None => Ok(default),
        Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(StanzaError::Invalid(format!("invalid boolean '{other}'"))),
    }
}

/// Build a MAM query requesting the page before `before`.
///
/// With no cursor an empty `<before/>` is sent, asking for the most recent page.
pub fn mam_query(query_id: &str, before: Option<&str>, limit: u32) -> Element {
    let mut before_el = Element::new("before", ns::RSM);
    if let Some(cursor) = before {
        before_el.append_text(cursor);
    }
    let set = Element::builder("set", ns::RSM)
        .append(Element::builder("max", ns::RSM).text(limit.to_string()).build())
        .append(before_el)
        .build();
    let query = Element::builder("query", ns::MAM)
        .attr("queryid", query_id)
        .append(set)
        .build();

    Element::builder("iq", ns::CLIENT)
        .attr("type", "set")
        .attr("id", query_id)
        .append(query)
        .build()
}
