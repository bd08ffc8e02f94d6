//! Field annotations.
//!
//! A service declares how the framework treats each of its fields with a
//! comma separated annotation such as `"feature"`, `"skip"`,
//! `"definitions"` or `"grpc_client=billing"`. Unknown tokens are ignored.

/// Parsed form of a field annotation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    /// Injected from a registered feature.
    pub is_feature: bool,
    /// Excluded from completeness validation.
    pub is_optional: bool,
    /// Receives the decoded `[service]` definitions block.
    pub is_definitions: bool,
    /// Name of the outbound client bound to this field.
    pub grpc_client: Option<String>,
}

impl Tag {
    /// Parses an annotation. Never fails: unknown tokens and malformed
    /// `key=value` pairs are skipped.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut tag = Self::default();

        for token in raw.split(',').map(str::trim) {
            let (key, value) = match token.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (token, None),
            };

            match (key, value) {
                ("feature", _) => tag.is_feature = true,
                ("skip", _) => tag.is_optional = true,
                ("definitions", _) => tag.is_definitions = true,
                ("grpc_client", Some(name)) if !name.is_empty() => {
                    tag.grpc_client = Some(name.to_string());
                }
                _ => {}
            }
        }

        tag
    }

    /// `None` when the field carries no annotation at all, meaning the
    /// framework leaves it alone.
    #[must_use]
    pub fn from_annotation(raw: Option<&str>) -> Option<Self> {
        raw.map(Self::parse)
    }

    /// Whether the field is bound to an outbound client that must be coupled
    /// during bootstrap.
    #[must_use]
    pub fn is_client_tag(&self) -> bool {
        !self.is_optional && !self.is_feature && self.grpc_client.is_some()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parses_known_tokens() {
        let tag = Tag::parse("feature,skip");
        assert!(tag.is_feature);
        assert!(tag.is_optional);
        assert!(!tag.is_definitions);
        assert_eq!(tag.grpc_client, None);

        assert!(Tag::parse("definitions").is_definitions);
    }

    #[test]
    fn client_binding() {
        let tag = Tag::parse("grpc_client=billing");
        assert_eq!(tag.grpc_client.as_deref(), Some("billing"));
        assert!(tag.is_client_tag());

        assert!(!Tag::parse("grpc_client=billing,skip").is_client_tag());
        assert!(!Tag::parse("grpc_client=billing,feature").is_client_tag());
        assert!(!Tag::parse("grpc_client=").is_client_tag());
        assert!(!Tag::parse("grpc_client").is_client_tag());
    }

    #[test]
    fn absent_annotation_is_not_a_tag() {
        assert_eq!(Tag::from_annotation(None), None);
        assert_eq!(Tag::from_annotation(Some("")), Some(Tag::default()));
    }

    #[test]
    fn tolerates_whitespace() {
        let tag = Tag::parse(" feature , grpc_client = billing ");
        assert!(tag.is_feature);
        assert_eq!(tag.grpc_client.as_deref(), Some("billing"));
    }

    proptest! {
        #[test]
        fn unknown_tokens_are_ignored(tokens in prop::collection::vec("[a-z]{1,8}", 0..6)) {
            let known = ["feature", "skip", "definitions", "grpc_client"];
            let unknown: Vec<_> = tokens
                .into_iter()
                .filter(|t| !known.contains(&t.as_str()))
                .collect();

            let noisy = format!("{},feature", unknown.join(","));
            prop_assert_eq!(Tag::parse(&noisy), Tag::parse("feature"));
        }

        #[test]
        fn parse_never_panics(raw in ".*") {
            let _ = Tag::parse(&raw);
        }
    }
}
