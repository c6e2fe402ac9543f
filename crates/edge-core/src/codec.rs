//! Discovery codec: TXT record and `edge://` link encodings.
//!
//! # TXT format
//!
//! ```text
//! v=edgecli1; {"id":"…","domain":"example.com","protocol":"vless","port":443,"path":"/mcproxy"}
//! ```
//!
//! A rendered record longer than one DNS character-string (255 bytes) is
//! split into consecutive strings; the resolver concatenates them in
//! record order before decoding.
//!
//! # Link format
//!
//! `edge://` followed by unpadded URL-safe base64 of a compact JSON object
//! holding the version tag (`v`) and the record fields.
//!
//! Both decoders gate on the exact version tag before looking at the rest
//! of the payload, and both reject unknown fields.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CodecError;
use crate::identity::Credential;
use crate::record::{DiscoveryRecord, Protocol, ProtocolVersion};
use crate::validate;

/// Link URI scheme, including the separator.
pub const LINK_SCHEME: &str = "edge://";

/// Maximum link payload length (characters after the scheme).
pub const MAX_LINK_PAYLOAD: usize = 2048;

/// Maximum bytes in one DNS TXT character-string.
pub const TXT_STRING_MAX: usize = 255;

/// Default cap on the number of TXT strings one record may span.
pub const DEFAULT_MAX_TXT_STRINGS: usize = 4;

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TxtPayload {
    id: String,
    domain: String,
    protocol: String,
    port: u64,
    path: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkPayload {
    v: String,
    id: String,
    domain: String,
    protocol: String,
    port: u64,
    path: String,
}

impl From<&DiscoveryRecord> for TxtPayload {
    fn from(r: &DiscoveryRecord) -> Self {
        TxtPayload {
            id: r.id().to_string(),
            domain: r.domain().to_string(),
            protocol: r.protocol().as_str().to_string(),
            port: u64::from(r.port()),
            path: r.path().to_string(),
        }
    }
}

fn build_record(
    id: &str,
    domain: String,
    protocol: &str,
    port: u64,
    path: String,
) -> Result<DiscoveryRecord, CodecError> {
    let id = Credential::parse(id)?;
    let protocol: Protocol = protocol.parse()?;
    let port = validate::port_from_u64("port", port)?;
    Ok(DiscoveryRecord::new(id, domain, protocol, port, path)?)
}

fn unsupported(found: &str) -> CodecError {
    CodecError::UnsupportedVersion {
        found: found.to_string(),
        expected: ProtocolVersion::CURRENT.tag(),
    }
}

// ── TXT ────────────────────────────────────────────────────────────

/// Render a record as one logical TXT value (`"<tag>; <json>"`).
pub fn render_txt(record: &DiscoveryRecord) -> Result<String, CodecError> {
    let payload = serde_json::to_string(&TxtPayload::from(record))
        .map_err(|e| CodecError::Parse(e.to_string()))?;
    Ok(format!("{}; {}", record.version().tag(), payload))
}

/// Encode a record into TXT character-strings using the default string cap.
pub fn encode_txt(record: &DiscoveryRecord) -> Result<Vec<String>, CodecError> {
    encode_txt_with_limit(record, DEFAULT_MAX_TXT_STRINGS)
}

/// Encode a record into at most `max_strings` TXT character-strings.
///
/// Never truncates: a record that does not fit is an error.
pub fn encode_txt_with_limit(
    record: &DiscoveryRecord,
    max_strings: usize,
) -> Result<Vec<String>, CodecError> {
    let strings = split_character_strings(&render_txt(record)?);
    if strings.len() > max_strings {
        return Err(CodecError::EncodingTooLarge {
            needed: strings.len(),
            limit: max_strings,
        });
    }
    Ok(strings)
}

/// Decode TXT character-strings, concatenated in the given order.
pub fn decode_txt<S: AsRef<str>>(strings: &[S]) -> Result<DiscoveryRecord, CodecError> {
    let content: String = strings.iter().map(AsRef::as_ref).collect();
    if content.is_empty() {
        return Err(CodecError::Parse("empty TXT record".to_string()));
    }

    let (tag, payload) = content
        .split_once(';')
        .ok_or_else(|| CodecError::Parse("missing `;` after version tag".to_string()))?;
    if ProtocolVersion::parse(tag).is_none() {
        return Err(unsupported(tag));
    }

    let p: TxtPayload =
        serde_json::from_str(payload.trim()).map_err(|e| CodecError::Parse(e.to_string()))?;
    let record = build_record(&p.id, p.domain, &p.protocol, p.port, p.path)?;
    debug!(domain = %record.domain(), parts = strings.len(), "decoded TXT discovery record");
    Ok(record)
}

/// Split at 255-byte boundaries without cutting a UTF-8 sequence.
fn split_character_strings(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        let mut end = rest.len().min(TXT_STRING_MAX);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        out.push(head.to_string());
        rest = tail;
    }
    out
}

// ── Link ───────────────────────────────────────────────────────────

/// Encode a record as an `edge://` link.
pub fn encode_link(record: &DiscoveryRecord) -> Result<String, CodecError> {
    let payload = LinkPayload {
        v: record.version().tag().to_string(),
        id: record.id().to_string(),
        domain: record.domain().to_string(),
        protocol: record.protocol().as_str().to_string(),
        port: u64::from(record.port()),
        path: record.path().to_string(),
    };
    let json = serde_json::to_vec(&payload).map_err(|e| CodecError::Parse(e.to_string()))?;
    let encoded = URL_SAFE_NO_PAD.encode(json);
    if encoded.len() > MAX_LINK_PAYLOAD {
        return Err(CodecError::EncodingTooLarge {
            needed: encoded.len(),
            limit: MAX_LINK_PAYLOAD,
        });
    }
    Ok(format!("{LINK_SCHEME}{encoded}"))
}

/// Decode an `edge://` link.
pub fn decode_link(link: &str) -> Result<DiscoveryRecord, CodecError> {
    let malformed = |msg: &str| CodecError::MalformedLink(msg.to_string());

    let encoded = link
        .trim()
        .strip_prefix(LINK_SCHEME)
        .ok_or_else(|| malformed("expected the edge:// scheme"))?;
    if encoded.is_empty() {
        return Err(malformed("empty payload"));
    }
    if encoded.len() > MAX_LINK_PAYLOAD {
        return Err(CodecError::MalformedLink(format!(
            "payload exceeds {MAX_LINK_PAYLOAD} characters"
        )));
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| CodecError::MalformedLink(format!("bad base64: {e}")))?;
    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| CodecError::MalformedLink(format!("bad JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| malformed("payload is not a JSON object"))?;

    match object.get("v").and_then(|v| v.as_str()) {
        Some(tag) if ProtocolVersion::parse(tag).is_some() => {}
        Some(tag) => return Err(unsupported(tag)),
        None => return Err(unsupported("")),
    }

    let p: LinkPayload = serde_json::from_value(value)
        .map_err(|e| CodecError::MalformedLink(format!("bad fields: {e}")))?;
    build_record(&p.id, p.domain, &p.protocol, p.port, p.path)
}

/// Decode either form: links by scheme, anything else as a single TXT value.
pub fn decode_any(input: &str) -> Result<DiscoveryRecord, CodecError> {
    let input = input.trim();
    if input.starts_with(LINK_SCHEME) {
        decode_link(input)
    } else {
        decode_txt(&[input])
    }
}
