//! Discovery resolution with bounded retries.

use std::sync::Arc;
use std::time::Duration;

use edge_core::codec::{self, DEFAULT_MAX_TXT_STRINGS};
use edge_core::config::ResolverConfig;
use edge_core::{CodecError, DiscoveryRecord, ProtocolVersion, discovery_host, validate};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{LookupFailure, ResolutionError, ResolutionResult};
use crate::lookup::{HickoryTxtLookup, TxtLookup, TxtRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt, for transport failures only.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_txt_strings: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(4),
            max_txt_strings: DEFAULT_MAX_TXT_STRINGS,
        }
    }
}

impl From<&ResolverConfig> for ResolverSettings {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            timeout: config.timeout(),
            max_retries: config.max_retries,
            backoff_base: config.backoff_base(),
            backoff_max: config.backoff_max(),
            max_txt_strings: config.max_txt_strings,
        }
    }
}

impl ResolverSettings {
    /// Delay before retry number `retry` (1-based): base doubled per retry, capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }
}

/// Resolves `_auth.<domain>` into a [`DiscoveryRecord`].
#[derive(Clone)]
pub struct DiscoveryResolver {
    lookup: Arc<dyn TxtLookup>,
    settings: ResolverSettings,
}

impl DiscoveryResolver {
    pub fn new(lookup: Arc<dyn TxtLookup>, settings: ResolverSettings) -> Self {
        Self { lookup, settings }
    }

    /// Hickory-backed resolver built from the `[resolver]` config section.
    pub fn from_config(config: &ResolverConfig) -> Self {
        let settings = ResolverSettings::from(config);
        let lookup = HickoryTxtLookup::new(config.nameserver, settings.timeout);
        Self::new(Arc::new(lookup), settings)
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Resolve without a cancellation source.
    pub async fn resolve(&self, domain: &str) -> ResolutionResult<DiscoveryRecord> {
        let (_tx, rx) = watch::channel(false);
        self.resolve_with_cancel(domain, rx).await
    }

    /// Resolve, returning `Cancelled` as soon as `cancel` turns true.
    ///
    /// Absence of a record is reported after one attempt. Transport
    /// failures and per-attempt timeouts are retried up to `max_retries`
    /// times with backoff.
    pub async fn resolve_with_cancel(
        &self,
        domain: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> ResolutionResult<DiscoveryRecord> {
        validate::domain("domain", domain)?;
        let host = discovery_host(domain);
        let attempts = self.settings.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                let delay = self.settings.backoff(attempt - 1);
                warn!(%host, attempt, ?delay, error = %last_error, "retrying TXT lookup");
                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => return Err(ResolutionError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            debug!(%host, attempt, "querying TXT");
            let outcome = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => return Err(ResolutionError::Cancelled),
                r = tokio::time::timeout(self.settings.timeout, self.lookup.lookup_txt(&host)) => r,
            };

            match outcome {
                Ok(Ok(records)) => {
                    let record = self.decode(&records)?;
                    info!(%host, id = %record.id(), "discovery record resolved");
                    return Ok(record);
                }
                Ok(Err(LookupFailure::NoRecord)) => {
                    return Err(ResolutionError::NoRecord { host });
                }
                Ok(Err(LookupFailure::Unavailable(e))) => {
                    return Err(ResolutionError::DnsTransport(e));
                }
                Ok(Err(LookupFailure::Transport(e))) => last_error = e,
                Err(_) => {
                    last_error = format!("timed out after {:?}", self.settings.timeout);
                }
            }
        }

        Err(ResolutionError::ResolutionTimeout {
            host,
            attempts,
            last_error,
        })
    }

    /// Pick the record carrying exactly our version tag, else the first one.
    fn decode(&self, records: &[TxtRecord]) -> ResolutionResult<DiscoveryRecord> {
        let tag = ProtocolVersion::CURRENT.tag().as_bytes();
        let chosen = records
            .iter()
            .find(|chunks| {
                let content = chunks.concat();
                content
                    .iter()
                    .position(|&b| b == b';')
                    .is_some_and(|at| &content[..at] == tag)
            })
            .or_else(|| records.first())
            .ok_or_else(|| CodecError::Parse("empty TXT answer".to_string()))?;
        if chosen.len() > self.settings.max_txt_strings {
            return Err(CodecError::EncodingTooLarge {
                needed: chosen.len(),
                limit: self.settings.max_txt_strings,
            }
            .into());
        }
        // Chunk boundaries need not fall on UTF-8 boundaries, so decode the
        // joined bytes rather than each chunk.
        let content = String::from_utf8(chosen.concat())
            .map_err(|e| CodecError::Parse(format!("TXT record is not UTF-8: {e}")))?;
        Ok(codec::decode_txt(&[content])?)
    }
}

/// Completes once `cancel` is true. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
