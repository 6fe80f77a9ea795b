//! Registry reference parsing
//!
//! Grammar: `[host[:port]/]path[:tag|@digest]`. The first path segment is
//! taken as the registry host when it contains `.` or `:` or is `localhost`.

use crate::digest::DigestUtils;
use crate::error::{PackageError, Result};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_REGISTRY: &str = "docker.io";
pub const DEFAULT_TAG: &str = "latest";

/// Host actually serving the `docker.io` registry API
const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";

const MAX_TAG_LEN: usize = 128;

/// A parsed, immutable registry reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl Reference {
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(PackageError::reference_parse(input, "reference is empty"));
        }
        if input.contains("://") {
            return Err(PackageError::reference_parse(
                input,
                "URL schemes are not part of a reference",
            ));
        }

        let (name, digest) = match input.split_once('@') {
            Some((name, digest)) => {
                if !DigestUtils::is_valid_digest(digest) {
                    return Err(PackageError::reference_parse(
                        input,
                        format!("invalid digest '{}'", digest),
                    ));
                }
                (name, Some(digest.to_string()))
            }
            None => (input, None),
        };

        let (registry, remainder) = match name.split_once('/') {
            Some((first, rest)) if looks_like_host(first) => (first, rest),
            _ => (DEFAULT_REGISTRY, name),
        };
        if !is_valid_host(registry) {
            return Err(PackageError::reference_parse(
                input,
                format!("invalid registry host '{}'", registry),
            ));
        }

        // A colon after the last slash separates the tag
        let (repository, tag) = match remainder.rfind(':') {
            Some(pos) if !remainder[pos..].contains('/') => {
                (&remainder[..pos], Some(&remainder[pos + 1..]))
            }
            _ => (remainder, None),
        };

        if repository.is_empty() {
            return Err(PackageError::reference_parse(input, "missing repository path"));
        }
        if let Some(bad) = repository.split('/').find(|c| !is_valid_path_component(c)) {
            return Err(PackageError::reference_parse(
                input,
                format!("invalid repository path component '{}'", bad),
            ));
        }
        if let Some(tag) = tag {
            if !is_valid_tag(tag) {
                return Err(PackageError::reference_parse(
                    input,
                    format!("invalid tag '{}'", tag),
                ));
            }
        }

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(Reference {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Tag or digest that content is resolved by; the digest wins when both are set
    pub fn reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Host to send HTTP requests to
    pub fn registry_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            &self.registry
        }
    }
}

impl FromStr for Reference {
    type Err = PackageError;

    fn from_str(s: &str) -> Result<Self> {
        Reference::parse(s)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

fn looks_like_host(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':') || segment == "localhost"
}

fn is_valid_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    // Bracketed IPv6 literal with optional port
    if let Some(rest) = host.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((addr, port)) => {
                !addr.is_empty()
                    && addr.chars().all(|c| c.is_ascii_hexdigit() || c == ':')
                    && (port.is_empty() || is_valid_port(port.strip_prefix(':').unwrap_or("x")))
            }
            None => false,
        };
    }

    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    };
    if let Some(port) = port {
        if !is_valid_port(port) {
            return false;
        }
    }

    !name.is_empty()
        && name.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_valid_port(port: &str) -> bool {
    !port.is_empty() && port.len() <= 5 && port.chars().all(|c| c.is_ascii_digit())
}

/// `[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*`
fn is_valid_path_component(component: &str) -> bool {
    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let bytes: Vec<char> = component.chars().collect();
    if bytes.is_empty() || !is_alnum(bytes[0]) || !is_alnum(bytes[bytes.len() - 1]) {
        return false;
    }

    let mut i = 0;
    while i < bytes.len() {
        if is_alnum(bytes[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && !is_alnum(bytes[i]) {
            i += 1;
        }
        let separator: String = bytes[start..i].iter().collect();
        let allowed = separator == "."
            || separator == "_"
            || separator == "__"
            || separator.chars().all(|c| c == '-');
        if !allowed {
            return false;
        }
    }
    true
}

/// `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
fn is_valid_tag(tag: &str) -> bool {
    let mut chars = tag.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric() || c == '_')
        && tag.len() <= MAX_TAG_LEN
        && chars.all(|c| c.is_ascii_alphanumeric() || "_.-".contains(c))
}
