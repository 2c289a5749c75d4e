//! Image references.

use crate::error::{Result, SandboxError};
use std::fmt;
use std::str::FromStr;

/// Tag used when a reference does not name one.
pub const DEFAULT_TAG: &str = "latest";

/// A `repository[:tag][@digest]` image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Parse a reference, defaulting the tag to `latest` unless a digest
    /// pins the image.
    ///
    /// A colon only separates a tag when it appears after the last `/`, so
    /// registry ports (`localhost:5000/firmware`) are kept in the repository.
    /// Everything after `@` is the digest (`sha256:...`).
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(SandboxError::Config("image reference is empty".into()));
        }
        let invalid = || SandboxError::Config(format!("invalid image reference: {reference}"));

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) => {
                let valid = digest
                    .split_once(':')
                    .is_some_and(|(algorithm, hex)| !algorithm.is_empty() && !hex.is_empty());
                if !valid {
                    return Err(invalid());
                }
                (name, Some(digest))
            }
            None => (reference, None),
        };

        let last_segment = name.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match name[last_segment..].rfind(':') {
            Some(i) => {
                let split = last_segment + i;
                (&name[..split], Some(&name[split + 1..]))
            }
            None => (name, None),
        };

        if repository.is_empty() || tag.is_some_and(str::is_empty) {
            return Err(invalid());
        }
        let tag = match (tag, digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, Some(_)) => None,
            (None, None) => Some(DEFAULT_TAG.to_string()),
        };

        Ok(Self {
            repository: repository.to_string(),
            tag,
            digest: digest.map(str::to_string),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, absent for references pinned only by digest.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// What to ask the registry for: the digest when pinned, else the tag.
    pub fn pull_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }
}

impl FromStr for ImageRef {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}
