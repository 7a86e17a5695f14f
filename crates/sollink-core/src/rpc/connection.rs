use reqwest::Url;

use crate::error::TransportError;

/// Validate an HTTP(S) JSON-RPC endpoint.
pub(crate) fn parse_http_endpoint(endpoint: &str) -> Result<Url, TransportError> {
    parse_endpoint(endpoint, &["http", "https"])
}

/// Validate a streaming endpoint: `ws`/`wss` only, and no embedded
/// credentials, which the handshake would otherwise leak into logs.
pub(crate) fn parse_ws_endpoint(endpoint: &str) -> Result<Url, TransportError> {
    let url = parse_endpoint(endpoint, &["ws", "wss"])?;
    if !url.username().is_empty() || url.password().is_some() {
        return Err(invalid(endpoint, "credentials in the URL are not supported"));
    }
    Ok(url)
}

fn parse_endpoint(endpoint: &str, schemes: &[&str]) -> Result<Url, TransportError> {
    let url = Url::parse(endpoint).map_err(|e| invalid(endpoint, &e.to_string()))?;
    if !schemes.contains(&url.scheme()) {
        return Err(invalid(
            endpoint,
            &format!(
                "unsupported scheme `{}`; expected {}",
                url.scheme(),
                schemes.join(" or ")
            ),
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid(endpoint, "missing host"));
    }
    Ok(url)
}

fn invalid(url: &str, reason: &str) -> TransportError {
    TransportError::InvalidEndpoint {
        url: url.to_owned(),
        reason: reason.to_owned(),
    }
}
