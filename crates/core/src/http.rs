//! Shared HTTP utilities for Lectern crates.

/// Derive the absolute base URL for a request.
///
/// `PUBLIC_BASE_URL` (passed as `public_base`) wins when configured;
/// otherwise the scheme comes from `X-Forwarded-Proto` (default `https`)
/// and the host from `X-Forwarded-Host` falling back to the `Host` header.
///
/// **Security note:** forwarded headers are set by the reverse proxy. Only
/// use the derived value for composing resource URLs in responses — never
/// for authorization decisions.
pub fn base_url(
    public_base: Option<&str>,
    forwarded_proto: Option<&str>,
    forwarded_host: Option<&str>,
    host: Option<&str>,
) -> String {
    if let Some(base) = public_base.filter(|b| !b.is_empty()) {
        return base.trim_end_matches('/').to_string();
    }
    let scheme = forwarded_proto.filter(|s| !s.is_empty()).unwrap_or("https");
    let host = forwarded_host
        .filter(|h| !h.is_empty())
        .or(host)
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

/// Percent-encode a path segment (unreserved characters pass through).
pub fn encode_path_segment(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
