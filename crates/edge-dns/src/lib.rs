//! edge-dns: resolves discovery records published in DNS.
//!
//! # Architecture
//!
//! ```text
//! DiscoveryResolver::resolve("example.com")
//!   ├── TxtLookup::lookup_txt("_auth.example.com")   (hickory, or a fake in tests)
//!   │     ├── no answer        → NoRecord (never retried)
//!   │     ├── no nameserver    → DnsTransport (never retried)
//!   │     └── transport/timeout → retry with capped exponential backoff
//!   └── codec::decode_txt(joined chunks) → DiscoveryRecord
//! ```
//!
//! Every wait inside `resolve` also watches a cancellation channel, so a
//! caller can abort an in-flight resolution at any point.

pub mod error;
pub mod lookup;
pub mod resolver;

pub use error::{LookupFailure, ResolutionError, ResolutionResult};
pub use lookup::{BoxFuture, HickoryTxtLookup, TxtLookup, TxtRecord};
pub use resolver::{DiscoveryResolver, ResolverSettings};
