//! TXT lookup seam and its hickory-backed implementation.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use tracing::{debug, warn};

use crate::error::LookupFailure;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One TXT record as its ordered character-strings, undecoded.
///
/// Chunks are raw bytes: a publisher may split a multi-byte character
/// across two of them.
pub type TxtRecord = Vec<Vec<u8>>;

/// One DNS TXT query.
///
/// Returns every TXT record at `host`.
pub trait TxtLookup: Send + Sync {
    fn lookup_txt<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<TxtRecord>, LookupFailure>>;
}

/// Lookup through hickory's async resolver.
///
/// Retries are driven by [`DiscoveryResolver`](crate::DiscoveryResolver),
/// so hickory is configured for a single attempt per query.
pub struct HickoryTxtLookup {
    resolver: TokioAsyncResolver,
}

impl HickoryTxtLookup {
    /// Use `nameserver` if given, else the system configuration, else Cloudflare.
    pub fn new(nameserver: Option<IpAddr>, timeout: Duration) -> Self {
        let (config, mut opts) = match nameserver {
            Some(ip) => {
                let group = NameServerConfigGroup::from_ips_clear(&[ip], 53, true);
                (
                    ResolverConfig::from_parts(None, vec![], group),
                    ResolverOpts::default(),
                )
            }
            None => match hickory_resolver::system_conf::read_system_conf() {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "system resolver config unavailable, using cloudflare");
                    (ResolverConfig::cloudflare(), ResolverOpts::default())
                }
            },
        };
        opts.timeout = timeout;
        opts.attempts = 1;
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl TxtLookup for HickoryTxtLookup {
    fn lookup_txt<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<TxtRecord>, LookupFailure>> {
        Box::pin(async move {
            let lookup = match self.resolver.txt_lookup(host).await {
                Ok(lookup) => lookup,
                Err(e) => {
                    return match e.kind() {
                        ResolveErrorKind::NoRecordsFound { .. } => Err(LookupFailure::NoRecord),
                        ResolveErrorKind::NoConnections => Err(LookupFailure::Unavailable(e.to_string())),
                        _ => Err(LookupFailure::Transport(e.to_string())),
                    };
                }
            };
            let records: Vec<TxtRecord> = lookup
                .iter()
                .map(|txt| txt.txt_data().iter().map(|chunk| chunk.to_vec()).collect())
                .collect();
            debug!(%host, records = records.len(), "TXT answer received");
            if records.is_empty() {
                return Err(LookupFailure::NoRecord);
            }
            Ok(records)
        })
    }
}
