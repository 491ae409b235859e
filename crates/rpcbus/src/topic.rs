use std::fmt;

/// A validated, bounded topic name.
///
/// Topic names are restricted to a conservative ASCII subset so that every
/// broker backend (in-process channels, NSQ-style topics, Kafka-style topics)
/// can represent them without escaping: the first character must be
/// alphanumeric, and the remainder may additionally contain `.`, `_`, `-` and
/// `/`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Maximum length of a topic name, in bytes.
    pub const MAX_BYTES: usize = 64;

    /// Validates `raw` and returns a [`Topic`], or `None` if it violates the
    /// charset or length rules.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.is_empty() || raw.len() > Self::MAX_BYTES {
            return None;
        }
        let mut chars = raw.chars();
        let first = chars.next()?;
        if !first.is_ascii_alphanumeric() {
            return None;
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/')) {
            return None;
        }
        Some(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Topic {
    type Error = TopicError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Topic::new(raw).ok_or_else(|| TopicError::Invalid(raw.to_string()))
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let invalid = raw.clone();
        Topic::new(raw).ok_or(TopicError::Invalid(invalid))
    }
}

/// Errors constructing a [`Topic`].
#[derive(Debug, thiserror::Error)]
pub enum TopicError {
    #[error("invalid topic name: {0:?}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        assert!(Topic::new("rpc.request").is_some());
        assert!(Topic::new("a").is_some());
        assert!(Topic::new("worker-1/queue_2").is_some());
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(Topic::new("").is_none());
        assert!(Topic::new("x".repeat(65)).is_none());
        assert!(Topic::new("x".repeat(64)).is_some());
    }

    #[test]
    fn rejects_bad_leading_char() {
        assert!(Topic::new(".hidden").is_none());
        assert!(Topic::new("-topic").is_none());
    }

    #[test]
    fn rejects_disallowed_chars() {
        assert!(Topic::new("topic name").is_none());
        assert!(Topic::new("topic$").is_none());
    }

    #[test]
    fn display_roundtrips_str() {
        let t = Topic::new("rpc.request").unwrap();
        assert_eq!(t.to_string(), "rpc.request");
        assert_eq!(t.as_str(), "rpc.request");
    }
}
