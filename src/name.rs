use std::fmt;

/// Maximum length of a repository name, including `/` separators.
const MAX_REPOSITORY_LEN: usize = 255;

/// Errors from [`Repository::parse`] and [`Tag::parse`].
#[derive(thiserror::Error, Debug)]
pub enum NameError {
    #[error("Empty repository name.")]
    EmptyRepository,

    #[error("Repository name is too long ({0} bytes).")]
    RepositoryTooLong(usize),

    #[error("Invalid repository component: {0:?}")]
    InvalidComponent(String),

    #[error("Empty tag.")]
    EmptyTag,

    #[error("Invalid tag: {0:?}")]
    InvalidTag(String),
}

/// A validated repository name, like `library/debian` or `my/repo-1.2_3`.
///
/// Names are slash-separated paths. Each component must match
/// `[a-z0-9]+([._-][a-z0-9]+)*`, and the whole name must be shorter
/// than 256 bytes. Validation happens on construction, before anything
/// is sent to a registry.
///
/// # Examples
///
/// ```
/// # use image_ferry::*;
/// assert!(Repository::parse("my/repo-1.2_3").is_ok());
/// assert!(Repository::parse("My/Repo").is_err());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Repository(String);

impl Repository {
    pub fn parse(name: &str) -> Result<Repository, NameError> {
        if name.is_empty() {
            return Err(NameError::EmptyRepository);
        }

        if name.len() > MAX_REPOSITORY_LEN {
            return Err(NameError::RepositoryTooLong(name.len()));
        }

        for component in name.split('/') {
            if !valid_component(component) {
                return Err(NameError::InvalidComponent(component.to_owned()));
            }
        }

        Ok(Repository(name.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag, the mutable pointer to a manifest within a repository.
///
/// Tags are opaque. Only values that would corrupt the manifest URL
/// are rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag(String);

impl Tag {
    pub fn parse(tag: &str) -> Result<Tag, NameError> {
        if tag.is_empty() {
            return Err(NameError::EmptyTag);
        }

        if tag.contains('/') {
            return Err(NameError::InvalidTag(tag.to_owned()));
        }

        Ok(Tag(tag.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Check a path component against `[a-z0-9]+([._-][a-z0-9]+)*`.
fn valid_component(component: &str) -> bool {
    let bytes = component.as_bytes();

    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();

    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };

    if !alnum(*first) || !alnum(*last) {
        return false;
    }

    let mut after_separator = false;
    for &byte in bytes {
        if alnum(byte) {
            after_separator = false;
        } else if matches!(byte, b'.' | b'_' | b'-') {
            // Separators can't be adjacent to each other.
            if after_separator {
                return false;
            }

            after_separator = true;
        } else {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_valid_repositories() {
        for name in ["foo", "foo/bar", "my/repo-1.2_3", "a0/b1/c2", "0abc"] {
            let repository = Repository::parse(name).expect(name);
            assert_eq!(repository.as_str(), name);
        }
    }

    #[test]
    fn reject_invalid_repositories() {
        assert!(matches!(
            Repository::parse(""),
            Err(NameError::EmptyRepository)
        ));

        for name in ["My/Repo", "foo//bar", "foo/", "/foo", "-foo", "foo-", "a..b", "a_.b", "föö"] {
            assert!(
                matches!(Repository::parse(name), Err(NameError::InvalidComponent(_))),
                "{name:?} must be rejected"
            );
        }

        let long = "a/".repeat(130);
        assert!(matches!(
            Repository::parse(&long),
            Err(NameError::RepositoryTooLong(_))
        ));
    }

    #[test]
    fn reject_invalid_tags() {
        assert!(matches!(Tag::parse(""), Err(NameError::EmptyTag)));
        assert!(matches!(Tag::parse("a/b"), Err(NameError::InvalidTag(_))));

        assert_eq!(Tag::parse("v1.2.3-rc.1").unwrap().as_str(), "v1.2.3-rc.1");
    }
}
