//! Gossip topic naming.

use std::fmt;

const TOPIC_PREFIX: &str = "bloxstaking.ssv";
const MAIN_SUFFIX: &str = "main";

/// A gossip topic: either the shared main topic for meta-traffic or a
/// per-validator consensus topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Main,
    /// Per-validator topic, carrying the validator public key in hex.
    Validator(String),
}

impl Topic {
    pub fn main() -> Self {
        Topic::Main
    }

    /// Topic for a validator, from its public key bytes.
    pub fn validator(validator_pk: &[u8]) -> Self {
        Topic::Validator(hex::encode(validator_pk))
    }

    /// Full topic name on the wire.
    pub fn name(&self) -> String {
        match self {
            Topic::Main => format!("{TOPIC_PREFIX}.{MAIN_SUFFIX}"),
            Topic::Validator(pk_hex) => format!("{TOPIC_PREFIX}.{pk_hex}"),
        }
    }

    /// Parse a wire topic name.
    pub fn parse(name: &str) -> Option<Self> {
        let suffix = name.strip_prefix(TOPIC_PREFIX)?.strip_prefix('.')?;
        if suffix.is_empty() {
            return None;
        }
        if suffix == MAIN_SUFFIX {
            Some(Topic::Main)
        } else {
            Some(Topic::Validator(suffix.to_string()))
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_scheme() {
        assert_eq!(Topic::main().name(), "bloxstaking.ssv.main");
        assert_eq!(
            Topic::validator(&[0xab, 0xcd]).name(),
            "bloxstaking.ssv.abcd"
        );
    }

    #[test]
    fn parse_roundtrip() {
        for topic in [Topic::main(), Topic::validator(&[1, 2, 3])] {
            assert_eq!(Topic::parse(&topic.name()), Some(topic));
        }
        assert_eq!(Topic::parse("bloxstaking.ssv."), None);
        assert_eq!(Topic::parse("other.protocol.main"), None);
    }
}
