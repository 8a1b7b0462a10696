use std::fmt;
use std::str::FromStr;

use crate::{StanzaError, StanzaResult};

/// An address of the form `local@domain/resource`.
///
/// Local part and domain are lowercased on parse; the resource is kept as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Jid {
    local: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    pub fn parse(input: &str) -> StanzaResult<Self> {
        let invalid = || StanzaError::InvalidJid(input.to_string());
        let input_trimmed = input.trim();
        if input_trimmed.is_empty() {
            return Err(invalid());
        }

        let (bare, resource) = match input_trimmed.split_once('/') {
            Some((bare, resource)) => {
                if resource.is_empty() {
                    return Err(invalid());
                }
                (bare, Some(resource.to_string()))
            }
            None => (input_trimmed, None),
        };

        let (local, domain) = match bare.split_once('@') {
            Some((local, domain)) => {
                if local.is_empty() {
                    return Err(invalid());
                }
                (Some(local.to_lowercase()), domain)
            }
            None => (None, bare),
        };

        if domain.is_empty() || domain.contains('@') || domain.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        Ok(Self {
            local,
            domain: domain.to_lowercase(),
            resource,
        })
    }

    pub fn local(&self) -> Option<&str> {
        self.local.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.resource.is_none()
    }

    /// The address without its resource.
    pub fn to_bare(&self) -> Jid {
        Jid {
            local: self.local.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// The domain as an address of its own.
    pub fn to_domain(&self) -> Jid {
        Jid {
            local: None,
            domain: self.domain.clone(),
            resource: None,
        }
    }
}

impl FromStr for Jid {
    type Err = StanzaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Jid::parse(s)
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(local) = &self.local {
            write!(f, "{local}@")?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_address() {
        let jid = Jid::parse("Alice@Example.COM/Phone").unwrap();

        assert_eq!(jid.local(), Some("alice"));
        assert_eq!(jid.domain(), "example.com");
        assert_eq!(jid.resource(), Some("Phone"));
        assert!(!jid.is_bare());
        assert_eq!(jid.to_string(), "alice@example.com/Phone");
        assert_eq!(jid.to_bare().to_string(), "alice@example.com");
        assert_eq!(jid.to_domain().to_string(), "example.com");
    }

    #[test]
    fn resource_may_contain_slash() {
        let jid: Jid = "a@b/c/d".parse().unwrap();
        assert_eq!(jid.resource(), Some("c/d"));
    }

    #[test]
    fn domain_only_is_bare() {
        let jid = Jid::parse("conference.example.com").unwrap();
        assert!(jid.is_bare());
        assert_eq!(jid.local(), None);
    }

    #[test]
    fn rejects_malformed_addresses() {
        for bad in ["", "   ", "@example.com", "alice@", "a@b@c", "a@b/", "a@exa mple"] {
            assert!(
                matches!(Jid::parse(bad), Err(StanzaError::InvalidJid(_))),
                "accepted {bad:?}"
            );
        }
    }
}
