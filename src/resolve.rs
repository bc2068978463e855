//! Node address expansion.
//!
//! [`AddressResolver`] turns a [`NodeRecord`] plus a requested query type
//! into a flat list of literal IP strings. Addresses of the configured
//! direct kind are taken as-is; addresses of the configured name kind are
//! expanded through one [`Upstream`] lookup at the requested type. All
//! other address kinds are ignored.

use async_trait::async_trait;
use hickory_proto::rr::{RData, RecordType};
use hickory_proto::ProtoErrorKind;
use hickory_resolver::{ResolveError, ResolveErrorKind, TokioResolver};
use std::sync::Arc;
use tracing::debug;

use crate::error::Error;
use crate::index::{AddressClass, NodeRecord};

/// A resolver used for the single indirect lookup of name-kind addresses.
///
/// A lookup that finds no records must return an empty answer set, not an
/// error; transport and server failures are errors.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Resolve `name` at the given query type.
    async fn lookup(&self, name: &str, rtype: RecordType) -> Result<Vec<RData>, Error>;
}

/// [`Upstream`] backed by the host's configured recursive resolver.
pub struct RecursiveUpstream {
    resolver: TokioResolver,
}

impl RecursiveUpstream {
    /// Build a resolver from the system configuration.
    pub fn from_system_conf() -> Result<Self, Error> {
        let resolver = TokioResolver::builder_tokio()?.build();
        Ok(Self { resolver })
    }
}

fn is_no_records(err: &ResolveError) -> bool {
    matches!(
        err.kind(),
        ResolveErrorKind::Proto(proto)
            if matches!(proto.kind(), ProtoErrorKind::NoRecordsFound { .. })
    )
}

#[async_trait]
impl Upstream for RecursiveUpstream {
    async fn lookup(&self, name: &str, rtype: RecordType) -> Result<Vec<RData>, Error> {
        match self.resolver.lookup(name, rtype).await {
            Ok(lookup) => Ok(lookup.iter().cloned().collect()),
            Err(err) if is_no_records(&err) => Ok(Vec::new()),
            Err(err) => Err(Error::Upstream(err)),
        }
    }
}

/// Expands node address entries into literal IP strings.
#[derive(Clone)]
pub struct AddressResolver {
    class: AddressClass,
    upstream: Option<Arc<dyn Upstream>>,
}

impl AddressResolver {
    /// Create a resolver for the given address class with no upstream;
    /// name-kind addresses will contribute nothing.
    pub fn new(class: AddressClass) -> Self {
        Self {
            class,
            upstream: None,
        }
    }

    /// Attach an upstream for name-kind address expansion.
    pub fn with_upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    /// The address class this resolver serves.
    pub fn class(&self) -> AddressClass {
        self.class
    }

    /// Resolve the node's usable addresses for the requested query type.
    ///
    /// Output ordering follows the node's address order with upstream
    /// answers merged in place; callers compare as sets. Upstream failures
    /// propagate; an upstream answering nothing contributes nothing.
    pub async fn resolve(
        &self,
        record: &NodeRecord,
        rtype: RecordType,
    ) -> Result<Vec<String>, Error> {
        let direct = self.class.direct_kind();
        let name_kind = self.class.name_kind();

        let mut ips = Vec::new();
        for addr in &record.addresses {
            if addr.kind == direct {
                ips.push(addr.value.clone());
            } else if addr.kind == name_kind {
                let Some(upstream) = &self.upstream else {
                    debug!(node = %record.name, name = %addr.value, "no upstream; skipping name-kind address");
                    continue;
                };
                for rdata in upstream.lookup(&addr.value, rtype).await? {
                    if let Some(ip) = rdata.ip_addr() {
                        ips.push(ip.to_string());
                    }
                }
            }
        }
        Ok(ips)
    }
}
