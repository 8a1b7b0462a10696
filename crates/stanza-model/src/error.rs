use thiserror::Error;

/// Errors produced while reading or interpreting stanzas.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StanzaError {
    #[error("XML parse error: {0}")]
    Parse(String),

    #[error("Invalid address: {0}")]
    InvalidJid(String),

    /// Well-formed XML that does not have the expected shape.
    #[error("Invalid stanza: {0}")]
    Invalid(String),
}

pub type StanzaResult<T> = Result<T, StanzaError>;

impl From<quick_xml::Error> for StanzaError {
    fn from(err: quick_xml::Error) -> Self {
        StanzaError::Parse(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for StanzaError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        StanzaError::Parse(err.to_string())
    }
}
