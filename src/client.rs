//! Client identities and group filters.

use std::collections::BTreeSet;
use std::fmt;

/// Stable small integer identifying a client in the host's registry.
pub type ClientId = usize;

/// Id of the implicit group every unconfigured client belongs to.
pub const DEFAULT_GROUP: i64 = 0;

/// A querying client as known to the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Client {
    /// Registry index of this client
    pub id: ClientId,
    /// Client address as text (IPv4 or IPv6)
    pub ip: String,
}

impl Client {
    /// Create a new client.
    pub fn new(id: ClientId, ip: impl Into<String>) -> Self {
        Self { id, ip: ip.into() }
    }
}

/// Registry of known clients, owned by the host resolver.
///
/// Only used to size per-client caches and to warm them up ahead of time.
pub trait ClientRegistry {
    /// Number of clients currently known.
    fn client_count(&self) -> usize;

    /// Look up a client by id.
    fn client(&self, id: ClientId) -> Option<Client>;
}

impl ClientRegistry for [Client] {
    fn client_count(&self) -> usize {
        self.len()
    }

    fn client(&self, id: ClientId) -> Option<Client> {
        self.iter().find(|c| c.id == id).cloned()
    }
}

impl ClientRegistry for Vec<Client> {
    fn client_count(&self) -> usize {
        self.as_slice().client_count()
    }

    fn client(&self, id: ClientId) -> Option<Client> {
        self.as_slice().client(id)
    }
}

/// Set of group ids a client's lookups are restricted to.
///
/// An empty filter is valid: the client has an explicit record without any
/// group association and therefore sees no list entries at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupFilter {
    groups: BTreeSet<i64>,
}

impl GroupFilter {
    /// Filter for clients without an explicit record.
    pub fn default_group() -> Self {
        Self::from_iter([DEFAULT_GROUP])
    }

    /// Filter that matches nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether this filter excludes every entry.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Whether `group` is part of the filter.
    pub fn contains(&self, group: i64) -> bool {
        self.groups.contains(&group)
    }

    /// Number of groups in the filter.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Iterate over group ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.groups.iter().copied()
    }

    /// Comma separated list suitable for an SQL `IN (...)` clause.
    ///
    /// Group ids are integers read back from the database, never user text.
    pub(crate) fn sql_list(&self) -> String {
        self.groups
            .iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl FromIterator<i64> for GroupFilter {
    fn from_iter<T: IntoIterator<Item = i64>>(iter: T) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for GroupFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.sql_list())
    }
}
