//! node-dns - Authoritative DNS for cluster node names.
//!
//! This crate serves A, AAAA and PTR records for the compute nodes of a
//! Kubernetes cluster. It watches `v1 Node` objects, keeps an in-memory
//! index of their addresses, and answers queries for names under its
//! configured zones, delegating everything else to the next handler in
//! the chain.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          node-dns                              │
//! │                                                                │
//! │  ┌──────────────┐   events    ┌────────────────┐               │
//! │  │ Node watch   │────────────▶│ SyncController │               │
//! │  │ (kube)       │  (bounded)  └───────┬────────┘               │
//! │  └──────────────┘                     │ upsert/remove          │
//! │                                       ▼                        │
//! │  ┌──────────────┐   lookup    ┌────────────────┐               │
//! │  │ NodeDns      │────────────▶│   NodeIndex    │               │
//! │  │ Handler      │             │  (in-memory)   │               │
//! │  └──────┬───────┘             └────────────────┘               │
//! │         │                                                      │
//! │         ▼ UDP/TCP :53 (Hickory ServerFuture)                   │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## DNS resolution
//!
//! ```text
//! node1.example.          → forward lookup by node name → A/AAAA
//! 4.3.2.1.in-addr.arpa.   → reverse lookup by IP        → PTR
//! example.                → zone apex                   → SOA
//! ```
//!
//! A node address may itself be a DNS name (InternalDNS/ExternalDNS); it
//! is expanded through one upstream lookup and the answers merged in.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handler;
pub mod index;
pub mod metrics;
pub mod resolve;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod watch;

// Re-export main types
pub use config::{Config, DnsConfig, KubernetesConfig, TelemetryConfig};
pub use error::Error;
pub use handler::{ChainEnd, Fallthrough, NodeDnsHandler};
pub use index::{AddressClass, AddressKind, NodeAddress, NodeIndex, NodeRecord};
pub use resolve::{AddressResolver, RecursiveUpstream, Upstream};
pub use server::DnsServer;
pub use sync::{NodeEvent, SyncController, SyncState};
