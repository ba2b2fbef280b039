use std::str::FromStr;

use crate::error::Error;

/// Length of the hex rendering of a session token.
pub const SESSION_ID_LEN: usize = 32;

/// An opaque, unguessable session token.
///
/// 128 random bits rendered as lowercase hex. Parsing only accepts that
/// exact shape, so a token can always be joined onto the sessions root
/// without escaping it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session token.
    pub fn generate() -> Self {
        let bits: u128 = rand::random();
        Self(format!("{bits:0width$x}", width = SESSION_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First characters of the token, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == SESSION_ID_LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidSession(s.to_string()))
        }
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_hex_and_fixed_length() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), SESSION_ID_LEN);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_ids_differ() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn parse_roundtrip() {
        let id = SessionId::generate();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_paths_and_bad_shapes() {
        for bad in [
            "",
            "..",
            "../../etc/passwd",
            "ABCDEF0123456789abcdef0123456789",
            "0123456789abcdef0123456789abcde",
            "0123456789abcdef0123456789abcdef0",
            "0123456789abcdef/123456789abcdef",
        ] {
            assert!(bad.parse::<SessionId>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn short_is_prefix() {
        let id = SessionId::generate();
        assert_eq!(id.short().len(), 8);
        assert!(id.as_str().starts_with(id.short()));
    }
}
