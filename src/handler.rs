//! DNS request handling.
//!
//! [`NodeDnsHandler`] answers A, AAAA and PTR queries for names under its
//! zones from the [`NodeIndex`], and delegates everything else to the next
//! handler in the chain. Responses are authoritative; a miss inside an
//! owned zone is NXDOMAIN unless fallthrough is configured for the name.

use async_trait::async_trait;
use hickory_proto::op::{Header, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, PTR, SOA};
use hickory_proto::rr::{DNSClass, LowerName, Name, RData, Record, RecordType};
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use std::iter;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::index::NodeIndex;
use crate::metrics::{self, QueryOutcome, Timer};
use crate::resolve::AddressResolver;

// SOA timer fields. The zone is rebuilt from the live index, so the
// refresh/retry/expire values are nominal.
const SOA_REFRESH: i32 = 7200;
const SOA_RETRY: i32 = 1800;
const SOA_EXPIRE: i32 = 86400;

/// Names for which an in-zone miss defers to the next handler instead of
/// answering NXDOMAIN.
#[derive(Debug, Clone, Default)]
pub struct Fallthrough {
    enabled: bool,
    zones: Vec<LowerName>,
}

impl Fallthrough {
    /// Fallthrough disabled; every in-zone miss is NXDOMAIN.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Fallthrough enabled for names under `zones`; an empty list means
    /// all names.
    pub fn enabled(zones: &[Name]) -> Self {
        Self {
            enabled: true,
            zones: zones.iter().cloned().map(LowerName::from).collect(),
        }
    }

    /// Should a miss for `name` fall through to the next handler?
    pub fn through(&self, name: &LowerName) -> bool {
        self.enabled && (self.zones.is_empty() || self.zones.iter().any(|z| z.zone_of(name)))
    }
}

/// Terminal element of the handler chain.
///
/// Delegation past the last handler has no one left to answer, so it
/// returns SERVFAIL.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChainEnd;

#[async_trait]
impl RequestHandler for ChainEnd {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        debug!("query delegated past the end of the handler chain");
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(ResponseCode::ServFail);
        match response_handle.send_response(builder.build_no_records(header)).await {
            Ok(info) => info,
            Err(err) => {
                error!(%err, "failed to send response");
                serve_failed()
            }
        }
    }
}

/// Authoritative handler for node names under a set of zones.
pub struct NodeDnsHandler<N = ChainEnd> {
    /// Owned zones, lowercased, with their label counts.
    zones: Vec<(LowerName, u8)>,
    /// Canonical zone: first configured zone, used for SOA and PTR targets.
    origin: Name,
    soa_ns: Name,
    soa_mbox: Name,
    ttl: u32,
    fallthrough: Fallthrough,
    index: NodeIndex,
    resolver: AddressResolver,
    next: N,
}

impl NodeDnsHandler<ChainEnd> {
    /// Create a handler at the end of its chain.
    pub fn new(
        zones: &[Name],
        ttl: u32,
        fallthrough: Fallthrough,
        index: NodeIndex,
        resolver: AddressResolver,
    ) -> Result<Self, Error> {
        let origin = zones
            .first()
            .cloned()
            .ok_or_else(|| Error::Config("at least one zone is required".into()))?;
        let soa_ns = Name::from_ascii("ns.dns")?.append_domain(&origin)?;
        let soa_mbox = Name::from_ascii("hostmaster.dns")?.append_domain(&origin)?;

        Ok(Self {
            zones: zones
                .iter()
                .map(|z| (LowerName::from(z.clone()), z.num_labels()))
                .collect(),
            origin,
            soa_ns,
            soa_mbox,
            ttl,
            fallthrough,
            index,
            resolver,
            next: ChainEnd,
        })
    }

    /// Chain a next handler, invoked on delegation.
    pub fn with_next<M: RequestHandler>(self, next: M) -> NodeDnsHandler<M> {
        NodeDnsHandler {
            zones: self.zones,
            origin: self.origin,
            soa_ns: self.soa_ns,
            soa_mbox: self.soa_mbox,
            ttl: self.ttl,
            fallthrough: self.fallthrough,
            index: self.index,
            resolver: self.resolver,
            next,
        }
    }
}

impl<N> NodeDnsHandler<N> {
    /// Longest zone suffix owning `name`, with its label count.
    fn match_zone(&self, name: &LowerName) -> Option<(&LowerName, u8)> {
        self.zones
            .iter()
            .filter(|(zone, _)| zone.zone_of(name))
            .max_by_key(|(_, labels)| *labels)
            .map(|(zone, labels)| (zone, *labels))
    }

    fn soa(&self) -> Record {
        let soa = SOA::new(
            self.soa_ns.clone(),
            self.soa_mbox.clone(),
            self.index.serial(),
            SOA_REFRESH,
            SOA_RETRY,
            SOA_EXPIRE,
            self.ttl,
        );
        let mut record = Record::from_rdata(self.origin.clone(), self.ttl, RData::SOA(soa));
        record.set_dns_class(DNSClass::IN);
        record
    }

    /// Answer records for the resolved IP literals, keeping only literals
    /// whose family matches the query type. Malformed literals are skipped.
    fn build_address_records(&self, qname: &Name, qtype: RecordType, ips: &[String]) -> Vec<Record> {
        let mut records = Vec::new();
        for ip in ips {
            let rdata = match (qtype, ip.parse::<IpAddr>()) {
                (RecordType::A, Ok(IpAddr::V4(v4))) => RData::A(A::from(v4)),
                (RecordType::AAAA, Ok(IpAddr::V6(v6))) => RData::AAAA(AAAA::from(v6)),
                (_, Err(_)) => {
                    warn!(value = %ip, "skipping malformed address literal");
                    continue;
                }
                _ => continue,
            };
            let mut record = Record::from_rdata(qname.clone(), self.ttl, rdata);
            record.set_dns_class(DNSClass::IN);
            records.push(record);
        }
        records
    }
}

impl<N: RequestHandler> NodeDnsHandler<N> {
    async fn respond<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
        rcode: ResponseCode,
        answers: Vec<Record>,
        authority: Vec<Record>,
    ) -> ResponseInfo {
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_authoritative(true);
        header.set_response_code(rcode);

        let response = builder.build(
            header,
            answers.iter(),
            iter::empty(),
            authority.iter(),
            iter::empty(),
        );
        match response_handle.send_response(response).await {
            Ok(info) => info,
            Err(err) => {
                error!(%err, "failed to send response");
                serve_failed()
            }
        }
    }

    async fn servfail<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
        timer: &Timer,
        qtype: RecordType,
    ) -> ResponseInfo {
        metrics::record_query(qtype, QueryOutcome::ServFail, timer.elapsed());
        self.respond(
            request,
            response_handle,
            ResponseCode::ServFail,
            Vec::new(),
            Vec::new(),
        )
        .await
    }

    async fn delegate<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
        timer: &Timer,
        qtype: RecordType,
    ) -> ResponseInfo {
        metrics::record_query(qtype, QueryOutcome::Delegated, timer.elapsed());
        self.next.handle_request(request, response_handle).await
    }

    /// In-zone miss: fall through when configured, NXDOMAIN otherwise.
    async fn miss<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
        qname: &LowerName,
        timer: &Timer,
        qtype: RecordType,
    ) -> ResponseInfo {
        if self.fallthrough.through(qname) {
            return self.delegate(request, response_handle, timer, qtype).await;
        }
        metrics::record_query(qtype, QueryOutcome::NxDomain, timer.elapsed());
        self.respond(
            request,
            response_handle,
            ResponseCode::NXDomain,
            Vec::new(),
            vec![self.soa()],
        )
        .await
    }
}

#[async_trait]
impl<N: RequestHandler> RequestHandler for NodeDnsHandler<N> {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        response_handle: R,
    ) -> ResponseInfo {
        let timer = Timer::start();

        let info = match request.request_info() {
            Ok(info) => info,
            Err(err) => {
                error!(%err, "malformed request");
                metrics::record_query(RecordType::ZERO, QueryOutcome::FormErr, timer.elapsed());
                return self
                    .respond(
                        request,
                        response_handle,
                        ResponseCode::FormErr,
                        Vec::new(),
                        Vec::new(),
                    )
                    .await;
            }
        };

        let qtype = info.query.query_type();
        let qname = info.query.name();

        let Some((_, zone_labels)) = self.match_zone(qname) else {
            return self.delegate(request, response_handle, &timer, qtype).await;
        };
        if !matches!(qtype, RecordType::A | RecordType::AAAA | RecordType::PTR) {
            return self.delegate(request, response_handle, &timer, qtype).await;
        }

        // Record names reuse the query name as sent, preserving its casing.
        let original = info.query.original().name().clone();
        let prefix_labels = original.num_labels().saturating_sub(zone_labels);

        // A query for the zone apex always answers SOA, even if a node
        // shares the zone's exact name.
        if prefix_labels == 0 {
            debug!(name = %qname, "apex query");
            metrics::record_query(qtype, QueryOutcome::Success, timer.elapsed());
            return self
                .respond(
                    request,
                    response_handle,
                    ResponseCode::NoError,
                    Vec::new(),
                    vec![self.soa()],
                )
                .await;
        }

        let lower = Name::from(qname.clone());

        if qtype == RecordType::PTR {
            if let Some(addr) = parse_reverse_name(&lower) {
                let nodes = self.index.get_by_ip(addr);
                if nodes.is_empty() {
                    debug!(%addr, "reverse lookup miss");
                    return self.miss(request, response_handle, qname, &timer, qtype).await;
                }

                let mut records = Vec::with_capacity(nodes.len());
                for node in &nodes {
                    let target = match ptr_target(&node.name, &self.origin) {
                        Ok(target) => target,
                        Err(err) => {
                            error!(node = %node.name, %err, "invalid PTR target");
                            return self.servfail(request, response_handle, &timer, qtype).await;
                        }
                    };
                    let mut record =
                        Record::from_rdata(original.clone(), self.ttl, RData::PTR(PTR(target)));
                    record.set_dns_class(DNSClass::IN);
                    records.push(record);
                }
                debug!(%addr, matches = records.len(), "reverse lookup");
                metrics::record_query(qtype, QueryOutcome::Success, timer.elapsed());
                return self
                    .respond(
                        request,
                        response_handle,
                        ResponseCode::NoError,
                        records,
                        Vec::new(),
                    )
                    .await;
            }
            // No address embedded in the name; treat it like a forward
            // query, which answers with an empty record set or a miss.
        }

        let node_name = prefix(&lower, prefix_labels as usize);
        let Some(node) = self.index.get(&node_name) else {
            debug!(node = %node_name, "forward lookup miss");
            return self.miss(request, response_handle, qname, &timer, qtype).await;
        };

        let ips = match self.resolver.resolve(&node, qtype).await {
            Ok(ips) => ips,
            Err(err) => {
                warn!(node = %node_name, %err, "address resolution failed");
                return self.servfail(request, response_handle, &timer, qtype).await;
            }
        };

        let records = self.build_address_records(&original, qtype, &ips);
        debug!(node = %node_name, answers = records.len(), "forward lookup");
        metrics::record_query(qtype, QueryOutcome::Success, timer.elapsed());
        self.respond(
            request,
            response_handle,
            ResponseCode::NoError,
            records,
            Vec::new(),
        )
        .await
    }
}

fn serve_failed() -> ResponseInfo {
    let mut header = Header::new();
    header.set_response_code(ResponseCode::ServFail);
    header.into()
}

/// PTR target for a node: `<name>.<canonical zone>`.
fn ptr_target(node_name: &str, origin: &Name) -> Result<Name, Error> {
    Ok(Name::from_ascii(node_name)?.append_domain(origin)?)
}

/// First `count` labels of `name`, joined. The node identifier portion of
/// a forward query once the zone suffix is stripped.
fn prefix(name: &Name, count: usize) -> String {
    name.iter()
        .take(count)
        .map(|label| String::from_utf8_lossy(label).into_owned())
        .collect::<Vec<_>>()
        .join(".")
}

/// Extract the address embedded in an `in-addr.arpa` / `ip6.arpa` name.
fn parse_reverse_name(name: &Name) -> Option<IpAddr> {
    let text = name.to_ascii().to_ascii_lowercase();
    let text = text.trim_end_matches('.');

    if let Some(rest) = text.strip_suffix(".in-addr.arpa") {
        let octets = rest
            .split('.')
            .map(|part| part.parse::<u8>().ok())
            .collect::<Option<Vec<u8>>>()?;
        if octets.len() != 4 {
            return None;
        }
        return Some(IpAddr::V4(Ipv4Addr::new(
            octets[3], octets[2], octets[1], octets[0],
        )));
    }

    if let Some(rest) = text.strip_suffix(".ip6.arpa") {
        let nibbles = rest
            .split('.')
            .map(|part| {
                let mut chars = part.chars();
                let digit = chars.next()?.to_digit(16)?;
                chars.next().is_none().then_some(digit as u128)
            })
            .collect::<Option<Vec<u128>>>()?;
        if nibbles.len() != 32 {
            return None;
        }
        // Labels run least-significant nibble first.
        let mut bits: u128 = 0;
        for (i, nibble) in nibbles.iter().enumerate() {
            bits |= nibble << (4 * i);
        }
        return Some(IpAddr::V6(Ipv6Addr::from(bits)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::from_ascii(s).unwrap()
    }

    #[test]
    fn parse_reverse_name_ipv4() {
        let parsed = parse_reverse_name(&name("4.3.2.1.in-addr.arpa."));
        assert_eq!(parsed, Some("1.2.3.4".parse().unwrap()));
    }

    #[test]
    fn parse_reverse_name_ipv6() {
        let reverse =
            "4.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.3.0.0.0.2.0.0.0.1.0.0.0.ip6.arpa.";
        let parsed = parse_reverse_name(&name(reverse));
        assert_eq!(parsed, Some("1:2:3::4".parse().unwrap()));
    }

    #[test]
    fn parse_reverse_name_rejects_short_or_foreign_names() {
        assert_eq!(parse_reverse_name(&name("3.2.1.in-addr.arpa.")), None);
        assert_eq!(parse_reverse_name(&name("node1.example.")), None);
        assert_eq!(parse_reverse_name(&name("x.3.2.1.in-addr.arpa.")), None);
        assert_eq!(parse_reverse_name(&name("ff.0.0.1.ip6.arpa.")), None);
    }

    #[test]
    fn fallthrough_disabled_never_matches() {
        let fall = Fallthrough::disabled();
        assert!(!fall.through(&LowerName::from(name("anything.example."))));
    }

    #[test]
    fn fallthrough_empty_zone_list_matches_all() {
        let fall = Fallthrough::enabled(&[]);
        assert!(fall.through(&LowerName::from(name("anything.example."))));
    }

    #[test]
    fn fallthrough_scoped_to_listed_zones() {
        let fall = Fallthrough::enabled(&[name("sub.example.")]);
        assert!(fall.through(&LowerName::from(name("node.sub.example."))));
        assert!(!fall.through(&LowerName::from(name("node.example."))));
    }

    #[test]
    fn prefix_strips_zone_labels() {
        let qname = name("node1.example.");
        assert_eq!(prefix(&qname, 1), "node1");
        let qname = name("a.b.example.");
        assert_eq!(prefix(&qname, 2), "a.b");
    }
}
