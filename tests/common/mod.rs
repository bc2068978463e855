//! Shared test infrastructure for query-handling integration tests.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hickory_proto::op::{Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncoder};
use hickory_server::authority::{MessageRequest, MessageResponse, MessageResponseBuilder};
use hickory_server::proto::rr::Record;
use hickory_server::proto::xfer::Protocol;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};

use node_dns::{
    AddressKind, AddressResolver, ChainEnd, Error, Fallthrough, NodeAddress, NodeDnsHandler,
    NodeIndex, NodeRecord, Upstream,
};

// --- Constants ---

pub const ZONES: &[&str] = &["example.", "in-addr.arpa.", "ip6.arpa."];
pub const TTL: u32 = 5;

// --- TestResponseHandler ---

/// Captures the serialized DNS response for inspection in tests.
///
/// Implements `ResponseHandler` so it can be passed to
/// `RequestHandler::handle_request()`. The response is serialized via
/// `MessageResponse::destructive_emit()` and stored as raw wire-format
/// bytes, which can then be parsed with `Message::from_vec()`.
#[derive(Clone)]
pub struct TestResponseHandler {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl TestResponseHandler {
    pub fn new() -> Self {
        Self {
            buf: Arc::new(Mutex::new(Vec::with_capacity(512))),
        }
    }

    /// Parse the captured wire bytes into a `Message` for assertions.
    pub fn into_message(self) -> Message {
        let buf = self.buf.lock().unwrap();
        assert!(!buf.is_empty(), "no response was captured");
        Message::from_vec(&buf).expect("failed to parse captured DNS response")
    }
}

#[async_trait]
impl ResponseHandler for TestResponseHandler {
    async fn send_response<'a>(
        &mut self,
        response: MessageResponse<
            '_,
            'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
            impl Iterator<Item = &'a Record> + Send + 'a,
        >,
    ) -> io::Result<ResponseInfo> {
        let mut buf = self.buf.lock().unwrap();
        buf.clear();
        let mut encoder = BinEncoder::new(&mut *buf);
        encoder.set_max_size(u16::MAX);
        let info = response
            .destructive_emit(&mut encoder)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(info)
    }
}

// --- Next-handler probe ---

/// Chain element that counts delegations and answers REFUSED, so tests
/// can tell a delegated query from one answered by the handler itself.
#[derive(Clone, Default)]
pub struct NextProbe {
    hits: Arc<AtomicUsize>,
}

impl NextProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestHandler for NextProbe {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let builder = MessageResponseBuilder::from_message_request(request);
        let mut header = Header::response_from_request(request.header());
        header.set_response_code(ResponseCode::Refused);
        response_handle
            .send_response(builder.build_no_records(header))
            .await
            .unwrap()
    }
}

// --- Stub upstream ---

/// Upstream that answers a single fixed name with fixed addresses.
pub struct StubUpstream {
    name: String,
    answers: Vec<RData>,
    fail: bool,
}

impl StubUpstream {
    pub fn answering(name: &str, addrs: &[IpAddr]) -> Arc<dyn Upstream> {
        let answers = addrs
            .iter()
            .map(|ip| match ip {
                IpAddr::V4(v4) => RData::A((*v4).into()),
                IpAddr::V6(v6) => RData::AAAA((*v6).into()),
            })
            .collect();
        Arc::new(Self {
            name: name.to_string(),
            answers,
            fail: false,
        })
    }

    pub fn failing() -> Arc<dyn Upstream> {
        Arc::new(Self {
            name: String::new(),
            answers: Vec::new(),
            fail: true,
        })
    }
}

#[async_trait]
impl Upstream for StubUpstream {
    async fn lookup(&self, name: &str, _rtype: RecordType) -> Result<Vec<RData>, Error> {
        if self.fail {
            return Err(Error::Io(io::Error::other("upstream unreachable")));
        }
        if name == self.name {
            Ok(self.answers.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

// --- Index/handler builders ---

pub fn internal_ip(ip: &str) -> NodeAddress {
    NodeAddress::new(AddressKind::InternalIp, ip)
}

pub fn external_ip(ip: &str) -> NodeAddress {
    NodeAddress::new(AddressKind::ExternalIp, ip)
}

pub fn internal_dns(name: &str) -> NodeAddress {
    NodeAddress::new(AddressKind::InternalDns, name)
}

pub fn make_index(class: node_dns::AddressClass, nodes: &[(&str, Vec<NodeAddress>)]) -> NodeIndex {
    let index = NodeIndex::new(class);
    for (name, addresses) in nodes {
        index.upsert(NodeRecord::new(*name, addresses.clone()));
    }
    index
}

pub struct HandlerBuilder {
    class: node_dns::AddressClass,
    fallthrough: Fallthrough,
    upstream: Option<Arc<dyn Upstream>>,
    index: NodeIndex,
}

impl HandlerBuilder {
    pub fn internal(index: NodeIndex) -> Self {
        Self {
            class: node_dns::AddressClass::Internal,
            fallthrough: Fallthrough::disabled(),
            upstream: None,
            index,
        }
    }

    pub fn external(index: NodeIndex) -> Self {
        Self {
            class: node_dns::AddressClass::External,
            fallthrough: Fallthrough::disabled(),
            upstream: None,
            index,
        }
    }

    pub fn fallthrough(mut self, fallthrough: Fallthrough) -> Self {
        self.fallthrough = fallthrough;
        self
    }

    pub fn upstream(mut self, upstream: Arc<dyn Upstream>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn build(self) -> NodeDnsHandler<ChainEnd> {
        let zones: Vec<Name> = ZONES.iter().map(|z| Name::from_ascii(z).unwrap()).collect();
        let mut resolver = AddressResolver::new(self.class);
        if let Some(upstream) = self.upstream {
            resolver = resolver.with_upstream(upstream);
        }
        NodeDnsHandler::new(&zones, TTL, self.fallthrough, self.index, resolver).unwrap()
    }

    pub fn build_with_next<M: RequestHandler>(self, next: M) -> NodeDnsHandler<M> {
        self.build().with_next(next)
    }
}

// --- Query/Request construction ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

/// Parse wire bytes into a MessageRequest.
pub fn parse_message_request(bytes: &[u8]) -> MessageRequest {
    let mut decoder = BinDecoder::new(bytes);
    MessageRequest::read(&mut decoder).expect("failed to parse MessageRequest")
}

/// Build a full `Request`.
pub fn build_request(name: &str, record_type: RecordType, id: u16) -> Request {
    let bytes = build_query_bytes(name, record_type, id);
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "127.0.0.1:53000".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

/// Build a request carrying no question section.
pub fn build_queryless_request(id: u16) -> Request {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    let bytes = msg.to_vec().unwrap();
    let msg = parse_message_request(&bytes);
    let src: SocketAddr = "127.0.0.1:53000".parse().unwrap();
    Request::new(msg, src, Protocol::Udp)
}

// --- Response helpers ---

/// Execute a query through the handler chain and return the parsed response.
pub async fn execute_query<H: RequestHandler>(
    handler: &H,
    name: &str,
    record_type: RecordType,
    id: u16,
) -> Message {
    execute_request(handler, &build_request(name, record_type, id)).await
}

/// Execute an already-built request through the handler chain.
pub async fn execute_request<H: RequestHandler>(handler: &H, request: &Request) -> Message {
    let capture = TestResponseHandler::new();
    handler.handle_request(request, capture.clone()).await;
    capture.into_message()
}

/// Extract answer-section addresses (A and AAAA) from a response.
pub fn extract_ips(msg: &Message) -> Vec<IpAddr> {
    msg.answers()
        .iter()
        .filter_map(|r| r.data().ip_addr())
        .collect()
}

/// Extract PTR targets from a response.
pub fn extract_ptr_targets(msg: &Message) -> Vec<String> {
    msg.answers()
        .iter()
        .filter_map(|r| match r.data() {
            RData::PTR(ptr) => Some(ptr.0.to_utf8()),
            _ => None,
        })
        .collect()
}

/// Assert response code.
pub fn assert_response_code(msg: &Message, expected: ResponseCode) {
    assert_eq!(
        msg.response_code(),
        expected,
        "expected {:?}, got {:?}",
        expected,
        msg.response_code()
    );
}

/// Assert a successful answer with exactly the expected IPs, order-insensitive.
pub fn assert_ip_answer(msg: &Message, expected: &[&str]) {
    assert_response_code(msg, ResponseCode::NoError);
    let mut actual = extract_ips(msg);
    actual.sort();
    let mut expected: Vec<IpAddr> = expected.iter().map(|s| s.parse().unwrap()).collect();
    expected.sort();
    assert_eq!(actual, expected);
}

/// Assert the authority section carries exactly one SOA for the canonical zone.
pub fn assert_soa_authority(msg: &Message) {
    let soas: Vec<_> = msg
        .name_servers()
        .iter()
        .filter(|r| matches!(r.data(), RData::SOA(_)))
        .collect();
    assert_eq!(soas.len(), 1, "expected exactly one SOA in authority");
    assert_eq!(soas[0].name(), &Name::from_ascii("example.").unwrap());
}
