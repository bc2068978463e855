//! In-memory node index backed by the Kubernetes node watch.
//!
//! Holds one [`NodeRecord`] per cluster node, keyed by node name, plus a
//! derived reverse index from IP literal to node names used for PTR
//! queries. The reverse index only covers addresses of the direct kind for
//! the index's configured [`AddressClass`], and is recomputed per record on
//! every mutation so it can always be rederived by replaying the primary
//! map.

use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// The kind of a single node address entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Literal IP reachable from inside the cluster.
    InternalIp,
    /// Literal IP reachable from outside the cluster.
    ExternalIp,
    /// DNS name resolvable from inside the cluster.
    InternalDns,
    /// DNS name resolvable from outside the cluster.
    ExternalDns,
}

/// Which pair of address kinds the index and resolver operate on.
///
/// Chosen once at startup and fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressClass {
    /// Serve internal IPs and resolve internal DNS names.
    Internal,
    /// Serve external IPs and resolve external DNS names.
    External,
}

impl AddressClass {
    /// The literal-IP kind this class serves directly.
    pub fn direct_kind(self) -> AddressKind {
        match self {
            AddressClass::Internal => AddressKind::InternalIp,
            AddressClass::External => AddressKind::ExternalIp,
        }
    }

    /// The name kind this class resolves through the upstream.
    pub fn name_kind(self) -> AddressKind {
        match self {
            AddressClass::Internal => AddressKind::InternalDns,
            AddressClass::External => AddressKind::ExternalDns,
        }
    }
}

/// One address entry on a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeAddress {
    /// What the value is (literal IP or resolvable name, internal or external).
    pub kind: AddressKind,
    /// The literal IP string or DNS name.
    pub value: String,
}

impl NodeAddress {
    /// Convenience constructor.
    pub fn new(kind: AddressKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// One cluster node as seen by the DNS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRecord {
    /// Node name; unique, stable, the primary key.
    pub name: String,
    /// Ordered address entries as reported by the cluster.
    pub addresses: Vec<NodeAddress>,
}

impl NodeRecord {
    /// Create a record from a name and address list.
    pub fn new(name: impl Into<String>, addresses: Vec<NodeAddress>) -> Self {
        Self {
            name: name.into(),
            addresses,
        }
    }
}

/// Thread-safe node index. Cheap to clone; clones share the same maps.
#[derive(Debug, Clone)]
pub struct NodeIndex {
    class: AddressClass,
    inner: Arc<RwLock<IndexInner>>,
}

#[derive(Debug, Default)]
struct IndexInner {
    /// node name -> NodeRecord
    nodes: HashMap<String, NodeRecord>,

    /// canonical IP literal -> node names whose configured-class IP
    /// addresses include that value (derived from `nodes`)
    reverse: HashMap<String, BTreeSet<String>>,

    /// Serial number for SOA (incremented on changes)
    serial: u32,
}

/// Canonical reverse-index key for a configured IP literal.
///
/// Parsing normalizes equivalent IPv6 spellings; values that are not IP
/// literals have no key (they cannot be reverse-resolved).
fn reverse_key(value: &str) -> Option<String> {
    value.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

impl NodeIndex {
    /// Create an empty index serving the given address class.
    pub fn new(class: AddressClass) -> Self {
        Self {
            class,
            inner: Arc::new(RwLock::new(IndexInner::default())),
        }
    }

    /// The address class this index was built for.
    pub fn class(&self) -> AddressClass {
        self.class
    }

    /// Insert or replace a node record.
    ///
    /// The record's prior contribution to the reverse index is removed
    /// before its current addresses are re-added, so the reverse index
    /// stays exactly derivable from the primary map. Idempotent.
    pub fn upsert(&self, record: NodeRecord) {
        let direct = self.class.direct_kind();
        let mut inner = self.inner.write();
        debug!(node = %record.name, addresses = record.addresses.len(), "upserting node");
        Self::purge_reverse(&mut inner, &record.name);
        for addr in record.addresses.iter().filter(|a| a.kind == direct) {
            if let Some(key) = reverse_key(&addr.value) {
                inner
                    .reverse
                    .entry(key)
                    .or_default()
                    .insert(record.name.clone());
            }
        }
        inner.nodes.insert(record.name.clone(), record);
        inner.serial = inner.serial.wrapping_add(1);
    }

    /// Remove a node by name. No-op if absent.
    pub fn remove(&self, name: &str) {
        let mut inner = self.inner.write();
        if inner.nodes.remove(name).is_some() {
            debug!(node = %name, "removed node");
            Self::purge_reverse(&mut inner, name);
            inner.serial = inner.serial.wrapping_add(1);
        }
    }

    /// Forward lookup by node name.
    pub fn get(&self, name: &str) -> Option<NodeRecord> {
        self.inner.read().nodes.get(name).cloned()
    }

    /// Reverse lookup by IP address.
    ///
    /// Multiple nodes may share a configured IP; all matches are returned,
    /// ordered by node name. Empty when the address is unknown.
    pub fn get_by_ip(&self, addr: IpAddr) -> Vec<NodeRecord> {
        let inner = self.inner.read();
        match inner.reverse.get(&addr.to_string()) {
            Some(names) => names
                .iter()
                .filter_map(|n| inner.nodes.get(n).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Number of nodes currently indexed.
    pub fn len(&self) -> usize {
        self.inner.read().nodes.len()
    }

    /// True when no nodes are indexed.
    pub fn is_empty(&self) -> bool {
        self.inner.read().nodes.is_empty()
    }

    /// Current SOA serial.
    pub fn serial(&self) -> u32 {
        self.inner.read().serial
    }

    /// Replace the whole record set in one write, rebuilding the reverse
    /// index from the new records.
    ///
    /// Used when the watch source re-lists: readers observe either the
    /// previous listing or the new one, never an empty index in between.
    pub fn replace_all(&self, records: HashMap<String, NodeRecord>) {
        let direct = self.class.direct_kind();
        let mut reverse: HashMap<String, BTreeSet<String>> = HashMap::new();
        for record in records.values() {
            for addr in record.addresses.iter().filter(|a| a.kind == direct) {
                if let Some(key) = reverse_key(&addr.value) {
                    reverse.entry(key).or_default().insert(record.name.clone());
                }
            }
        }

        let mut inner = self.inner.write();
        inner.nodes = records;
        inner.reverse = reverse;
        inner.serial = inner.serial.wrapping_add(1);
        debug!(nodes = inner.nodes.len(), "replaced node index from new listing");
    }

    /// Emit current index gauges.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        crate::metrics::record_index_counts(inner.nodes.len(), inner.reverse.len());
        crate::metrics::record_serial(inner.serial);
    }

    /// Remove every reverse-index entry pointing at `name`.
    fn purge_reverse(inner: &mut IndexInner, name: &str) {
        inner.reverse.retain(|_, names| {
            names.remove(name);
            !names.is_empty()
        });
    }
}
