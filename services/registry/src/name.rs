//! Validated repository names and tags.

use std::fmt;
use std::str::FromStr;

/// Fewest path components in a repository name.
pub const NAME_MIN_COMPONENTS: usize = 2;
/// Most path components in a repository name.
pub const NAME_MAX_COMPONENTS: usize = 5;
/// Shortest allowed component.
pub const NAME_COMPONENT_MIN_LENGTH: usize = 2;
/// Longest allowed component.
pub const NAME_COMPONENT_MAX_LENGTH: usize = 30;
/// Longest allowed repository name, including separators.
pub const NAME_TOTAL_MAX_LENGTH: usize = 255;
/// Longest allowed tag.
pub const TAG_MAX_LENGTH: usize = 128;

/// Reasons a repository name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    /// Too few or too many components.
    #[error("repository name must have between 2 and 5 components, found {0}")]
    ComponentCount(usize),

    /// A component is too short or too long.
    #[error("repository name component {0:?} must be between 2 and 30 characters")]
    ComponentLength(String),

    /// A component has characters outside the allowed grammar.
    #[error("repository name component {0:?} is invalid")]
    ComponentInvalid(String),

    /// The whole name is too long.
    #[error("repository name must not be more than 255 characters")]
    TooLong,
}

/// Reasons a tag is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tag {0:?}")]
pub struct TagError(pub String);

/// Matches `[a-z0-9]+(?:[._-][a-z0-9]+)*`.
fn valid_component(component: &str) -> bool {
    let mut previous_separator = true;
    for b in component.bytes() {
        match b {
            b'a'..=b'z' | b'0'..=b'9' => previous_separator = false,
            b'.' | b'_' | b'-' if !previous_separator => previous_separator = true,
            _ => return false,
        }
    }
    !previous_separator
}

/// A repository name such as `library/ubuntu`.
///
/// Construction validates the name, so every `RepositoryName` is safe to
/// embed in a storage path.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepositoryName(String);

impl RepositoryName {
    /// The name as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The slash separated components of the name.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }
}

impl FromStr for RepositoryName {
    type Err = NameError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        if name.len() > NAME_TOTAL_MAX_LENGTH {
            return Err(NameError::TooLong);
        }

        let components: Vec<&str> = name.split('/').collect();
        if !(NAME_MIN_COMPONENTS..=NAME_MAX_COMPONENTS).contains(&components.len()) {
            return Err(NameError::ComponentCount(components.len()));
        }

        for component in components {
            if !(NAME_COMPONENT_MIN_LENGTH..=NAME_COMPONENT_MAX_LENGTH).contains(&component.len()) {
                return Err(NameError::ComponentLength(component.to_owned()));
            }
            if !valid_component(component) {
                return Err(NameError::ComponentInvalid(component.to_owned()));
            }
        }

        Ok(RepositoryName(name.to_owned()))
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RepositoryName").field(&self.0).finish()
    }
}

impl AsRef<str> for RepositoryName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A tag such as `latest` or `v1.2.3`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    /// The tag as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Tag {
    type Err = TagError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let mut bytes = tag.bytes();
        let first_ok = bytes
            .next()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_');
        let rest_ok = bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));

        if !first_ok || !rest_ok || tag.len() > TAG_MAX_LENGTH {
            return Err(TagError(tag.to_owned()));
        }
        Ok(Tag(tag.to_owned()))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tag").field(&self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_names() {
        for name in ["ab/cd", "library/ubuntu", "a0/b1/c2.d-e_f", "aa/bb/cc/dd/ee"] {
            let parsed: RepositoryName = name.parse().unwrap();
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn rejects_single_component() {
        assert_eq!(
            "ab".parse::<RepositoryName>(),
            Err(NameError::ComponentCount(1))
        );
    }

    #[test]
    fn rejects_too_many_components() {
        assert_eq!(
            "aa/bb/cc/dd/ee/ff".parse::<RepositoryName>(),
            Err(NameError::ComponentCount(6))
        );
    }

    #[test]
    fn rejects_short_and_long_components() {
        assert!(matches!(
            "a/cd".parse::<RepositoryName>(),
            Err(NameError::ComponentLength(_))
        ));
        let long = format!("ab/{}", "c".repeat(31));
        assert!(matches!(
            long.parse::<RepositoryName>(),
            Err(NameError::ComponentLength(_))
        ));
    }

    #[test]
    fn rejects_bad_characters() {
        for name in ["Ab/cd", "ab/c..d", "ab/-cd", "ab/cd-", "ab//cd", "ab/c d"] {
            assert!(name.parse::<RepositoryName>().is_err(), "{name}");
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let name = vec!["a".repeat(30); 9].join("/");
        assert!(name.len() >= 256);
        assert_eq!(name.parse::<RepositoryName>(), Err(NameError::TooLong));
    }

    #[test]
    fn tags() {
        for tag in ["latest", "v1.2.3", "_x", "A-b_c.d"] {
            assert_eq!(tag.parse::<Tag>().unwrap().as_str(), tag);
        }
        for tag in ["", ".hidden", "-x", "a/b", "a:b"] {
            assert!(tag.parse::<Tag>().is_err(), "{tag:?}");
        }
        assert!("a".repeat(129).parse::<Tag>().is_err());
    }
}
