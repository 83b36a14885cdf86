//! Fully-qualified DNS suffixes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum length of a domain name, excluding the trailing dot
const MAX_NAME_LEN: usize = 253;

/// Maximum length of a single label
const MAX_LABEL_LEN: usize = 63;

/// A validated, fully-qualified domain suffix such as `corp.example.`
///
/// Always stored with a trailing dot. Comparison is by the exact text, so
/// `Corp.Example.` and `corp.example.` are different values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fqdn(String);

impl Fqdn {
    /// Validate `name` and normalize it to end with a dot
    pub fn new(name: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidSearchDomain {
            domain: name.to_string(),
            reason,
        };

        let bare = name.strip_suffix('.').unwrap_or(name);
        if bare.is_empty() {
            return Err(invalid("empty name".into()));
        }
        if bare.len() > MAX_NAME_LEN {
            return Err(invalid(format!("longer than {} octets", MAX_NAME_LEN)));
        }

        for label in bare.split('.') {
            validate_label(label).map_err(invalid)?;
        }

        Ok(Self(format!("{}.", bare)))
    }

    /// The name with its trailing dot, e.g. `corp.example.`
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as written in resolv.conf, e.g. `corp.example`
    pub fn without_trailing_dot(&self) -> &str {
        &self.0[..self.0.len() - 1]
    }
}

fn validate_label(label: &str) -> std::result::Result<(), String> {
    if label.is_empty() {
        return Err("empty label".into());
    }
    if label.len() > MAX_LABEL_LEN {
        return Err(format!("label {:?} longer than {} octets", label, MAX_LABEL_LEN));
    }
    if label.starts_with('-') || label.ends_with('-') {
        return Err(format!("label {:?} starts or ends with '-'", label));
    }
    if let Some(c) = label
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(format!("label {:?} contains {:?}", label, c));
    }
    Ok(())
}

impl fmt::Display for Fqdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fqdn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for Fqdn {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(&s)
    }
}

impl From<Fqdn> for String {
    fn from(name: Fqdn) -> Self {
        name.0
    }
}
