use http::{HeaderName, HeaderValue};
use naive_protocol::PaddingType;

use crate::error::UpstreamError;

/// Parses a verbatim CRLF- or LF-delimited header block from configuration
/// (`extra-headers`, spec.md §6) into `(name, value)` pairs ready to insert
/// into the CONNECT request. Blank lines are ignored so the block can carry
/// a trailing newline without producing a spurious empty header.
pub fn parse_extra_headers(block: &str) -> Result<Vec<(HeaderName, HeaderValue)>, UpstreamError> {
    let mut headers = Vec::new();
    for line in block.split(['\r', '\n']).filter(|l| !l.trim().is_empty()) {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| UpstreamError::InvalidExtraHeader(line.to_string()))?;
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|_| UpstreamError::InvalidExtraHeader(line.to_string()))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|_| UpstreamError::InvalidExtraHeader(line.to_string()))?;
        headers.push((name, value));
    }
    Ok(headers)
}

/// Builds the csv value for `Padding-Type-Request`, in preference order, for
/// every padding type this process supports.
pub fn padding_type_request_value() -> HeaderValue {
    let csv = PaddingType::supported()
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(",");
    HeaderValue::from_str(&csv).expect("padding type names are valid header tokens")
}

/// Whether the CONNECT response's `Padding-Type-Reply` header (if any)
/// names a padding type this process actually supports. A header present
/// but naming an unrecognized scheme does not count as Capable (spec.md
/// §4.B): the registry must never frame a leg with a codec the upstream
/// cannot strip.
pub fn reply_header_seen(headers: &http::HeaderMap) -> bool {
    headers
        .get("padding-type-reply")
        .and_then(|v| v.to_str().ok())
        .and_then(PaddingType::parse)
        .is_some_and(|parsed| PaddingType::supported().contains(&parsed))
}
