//! Channel-scoped contact addresses in `scheme:path[?query][#display]` form.
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const TEL_SCHEME: &str = "tel";

/// A contact address such as `tel:+15551234` or `telegram:12345#bobby`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

impl Urn {
    /// Parses and normalizes a raw URN string.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let invalid = |reason| ValidationError::InvalidUrn {
            urn: raw.to_string(),
            reason,
        };
        let raw = raw.trim();
        let (scheme, rest) = raw.split_once(':').ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("invalid scheme"));
        }
        let scheme = scheme.to_ascii_lowercase();

        let (rest, display) = match rest.split_once('#') {
            Some((rest, display)) => (rest, Some(display)),
            None => (rest, None),
        };
        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let path = if scheme == TEL_SCHEME {
            normalize_tel(path).ok_or_else(|| invalid("invalid phone number"))?
        } else {
            path.trim().to_string()
        };
        if path.is_empty() {
            return Err(invalid("empty path"));
        }

        let mut out = format!("{scheme}:{path}");
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            out.push('?');
            out.push_str(query);
        }
        if let Some(display) = display.filter(|d| !d.is_empty()) {
            out.push('#');
            out.push_str(display);
        }
        Ok(Self(out))
    }

    pub fn from_parts(scheme: &str, path: &str) -> Result<Self, ValidationError> {
        Self::parse(&format!("{scheme}:{path}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scheme(&self) -> &str {
        self.0.split_once(':').map(|(s, _)| s).unwrap_or_default()
    }

    pub fn path(&self) -> &str {
        let rest = self.0.split_once(':').map(|(_, r)| r).unwrap_or_default();
        rest.split(['?', '#']).next().unwrap_or_default()
    }

    pub fn display(&self) -> Option<&str> {
        self.0.split_once('#').map(|(_, d)| d)
    }

    /// The `scheme:path` part, which is what uniquely identifies a contact address.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.scheme(), self.path())
    }
}

fn normalize_tel(path: &str) -> Option<String> {
    let mut out = String::with_capacity(path.len());
    for (i, ch) in path.trim().chars().enumerate() {
        match ch {
            '+' if i == 0 => out.push(ch),
            '0'..='9' => out.push(ch),
            ' ' | '-' | '(' | ')' | '.' => {}
            _ => return None,
        }
    }
    out.chars().any(|c| c.is_ascii_digit()).then_some(out)
}

impl Display for Urn {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Urn {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Urn> for String {
    fn from(value: Urn) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tel_urns_are_normalized() {
        let urn = Urn::parse("TEL:+1 (555) 123-4").unwrap();
        assert_eq!(urn.as_str(), "tel:+15551234");
        assert_eq!(urn.identity(), "tel:+15551234");
    }

    #[test]
    fn display_and_query_are_not_part_of_identity() {
        let urn = Urn::parse("telegram:12345?id=9#bobby").unwrap();
        assert_eq!(urn.scheme(), "telegram");
        assert_eq!(urn.path(), "12345");
        assert_eq!(urn.display(), Some("bobby"));
        assert_eq!(urn.identity(), "telegram:12345");
    }

    #[test]
    fn rejects_malformed_urns() {
        assert!(Urn::parse("no-scheme").is_err());
        assert!(Urn::parse("tel:abc").is_err());
        assert!(Urn::parse("ext:").is_err());
        assert!(Urn::parse("we ird:123").is_err());
    }
}
