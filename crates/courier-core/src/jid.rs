//! Jabber identifiers.
//!
//! A JID has the shape `[node@]domain[/resource]`. Two JIDs are equal when
//! their full forms are equal.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::JidError;

/// A parsed Jabber identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Builds a JID from its parts.
    pub fn from_parts(
        node: Option<&str>,
        domain: impl Into<String>,
        resource: Option<&str>,
    ) -> Self {
        Self {
            node: node.filter(|n| !n.is_empty()).map(str::to_owned),
            domain: domain.into(),
            resource: resource.filter(|r| !r.is_empty()).map(str::to_owned),
        }
    }

    /// The node (user) part, if any.
    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    /// Alias for [`node`](Self::node).
    pub fn user(&self) -> Option<&str> {
        self.node()
    }

    /// The domain part.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The resource part, if any.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// `node@domain` without the resource.
    pub fn bare(&self) -> String {
        match &self.node {
            Some(node) => format!("{node}@{}", self.domain),
            None => self.domain.clone(),
        }
    }

    /// The full textual form.
    pub fn full(&self) -> String {
        self.to_string()
    }

    /// Returns a copy of this JID with the resource removed.
    pub fn to_bare(&self) -> Self {
        Self {
            node: self.node.clone(),
            domain: self.domain.clone(),
            resource: None,
        }
    }

    /// Returns `true` when a resource is present.
    pub fn is_full(&self) -> bool {
        self.resource.is_some()
    }
}

impl FromStr for Jid {
    type Err = JidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (rest, resource) = match s.split_once('/') {
            Some((_, "")) => return Err(JidError::EmptyResource(s.to_owned())),
            Some((rest, resource)) => (rest, Some(resource)),
            None => (s, None),
        };
        let (node, domain) = match rest.split_once('@') {
            Some(("", _)) => return Err(JidError::EmptyNode(s.to_owned())),
            Some((node, domain)) => (Some(node), domain),
            None => (None, rest),
        };
        if domain.is_empty() {
            return Err(JidError::MissingDomain(s.to_owned()));
        }
        Ok(Self::from_parts(node, domain, resource))
    }
}

impl TryFrom<String> for Jid {
    type Error = JidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl TryFrom<&str> for Jid {
    type Error = JidError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> Self {
        jid.to_string()
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "{node}@")?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}
