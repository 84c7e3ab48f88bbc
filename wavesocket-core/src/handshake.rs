//! Opening handshake for both roles
//!
//! The client side builds the HTTP upgrade request, validates the 101
//! response and the `Sec-WebSocket-Accept` value; the server side
//! validates the upgrade request, negotiates a sub-protocol and
//! permessage-deflate, and writes the switching-protocols response.
//! Reserved headers are owned by this engine and override user values.
//!
//! All header lookups are case-insensitive: headers are normalized to
//! lowercase keys at parse time, and `Upgrade`/`Connection` values are
//! compared with lowercase token matching.

use crate::deflate::DeflateConfig;
use crate::error::{Error, HandshakeError, Result};
use crate::protocol::{constants, http_header};
use crate::stream::{read_line, ByteStream, CancelToken};
use base64::{engine::general_purpose, Engine as _};
use sha1::{Digest, Sha1};
use std::collections::HashMap;

/// Headers the handshake engine owns; user-supplied values are dropped
const RESERVED_HEADERS: &[&str] = &[
    http_header::UPGRADE,
    http_header::CONNECTION,
    http_header::SEC_WEBSOCKET_KEY,
    http_header::SEC_WEBSOCKET_ACCEPT,
    http_header::SEC_WEBSOCKET_VERSION,
    http_header::SEC_WEBSOCKET_PROTOCOL,
    http_header::SEC_WEBSOCKET_EXTENSIONS,
];

/// Generate a random `Sec-WebSocket-Key`: 16 random bytes, base64
pub fn generate_key() -> String {
    use rand::RngCore;
    let mut key_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    general_purpose::STANDARD.encode(key_bytes)
}

/// Compute `Sec-WebSocket-Accept` from the client key (RFC 6455 §1.3)
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(constants::WEBSOCKET_MAGIC.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Client-side handshake parameters
#[derive(Debug)]
pub struct ClientHandshakeOptions<'a> {
    /// The url being connected to, echoed into the result and errors
    pub url: &'a str,
    /// `Host` header host part
    pub host: &'a str,
    /// `Host` header port part
    pub port: u16,
    /// Request path, `/` at minimum
    pub path: &'a str,
    /// Extra headers merged into the request (reserved names dropped)
    pub extra_headers: &'a [(String, String)],
    /// Sub-protocols offered, in preference order
    pub sub_protocols: &'a [String],
    /// Optional `Origin` header
    pub origin: Option<&'a str>,
    /// `User-Agent` header, unless overridden by an extra header
    pub user_agent: &'a str,
    /// Offer permessage-deflate with these parameters
    pub deflate: Option<DeflateConfig>,
}

/// Outcome of a successful handshake, either role
#[derive(Debug, Clone)]
pub struct HandshakeResult {
    /// Negotiated request uri
    pub uri: String,
    /// Peer headers, lowercase keys
    pub headers: HashMap<String, String>,
    /// Selected sub-protocol, empty when none was negotiated
    pub protocol: String,
    /// Negotiated deflate parameters, `None` when the extension is off
    pub deflate: Option<DeflateConfig>,
}

/// Perform the client side of the opening handshake on a connected stream.
pub async fn client_handshake(
    stream: &mut dyn ByteStream,
    opts: &ClientHandshakeOptions<'_>,
    cancel: &CancelToken,
) -> Result<HandshakeResult> {
    client_handshake_with_key(stream, opts, &generate_key(), cancel).await
}

pub(crate) async fn client_handshake_with_key(
    stream: &mut dyn ByteStream,
    opts: &ClientHandshakeOptions<'_>,
    key: &str,
    cancel: &CancelToken,
) -> Result<HandshakeResult> {
    let request = build_client_request(opts, key);
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let status_line = read_line(stream, cancel).await?;
    let (version, status) = parse_status_line(&status_line)?;
    if version != "HTTP/1.1" {
        return Err(HandshakeError::InvalidHttpVersion(version).into());
    }

    let headers = read_headers(stream, cancel).await?;

    // A non-101 answer could be a redirect or an auth challenge; surface
    // the status so the supervisor can report it.
    if status != 101 {
        return Err(HandshakeError::UnexpectedStatus(status).into());
    }

    validate_client_response(&headers, key)?;

    let deflate = match opts.deflate {
        Some(_) => headers
            .get(http_header::SEC_WEBSOCKET_EXTENSIONS)
            .and_then(|value| DeflateConfig::parse(value)),
        None => None,
    };

    let protocol = headers
        .get(http_header::SEC_WEBSOCKET_PROTOCOL)
        .cloned()
        .unwrap_or_default();

    tracing::debug!(url = opts.url, protocol = %protocol, deflate = deflate.is_some(), "client handshake complete");

    Ok(HandshakeResult {
        uri: opts.path.to_string(),
        headers,
        protocol,
        deflate,
    })
}

fn build_client_request(opts: &ClientHandshakeOptions<'_>, key: &str) -> String {
    let has_extra = |name: &str| {
        opts.extra_headers
            .iter()
            .any(|(n, _)| n.eq_ignore_ascii_case(name))
    };

    let mut request = format!("GET {} HTTP/1.1\r\n", opts.path);
    if !has_extra(http_header::HOST) {
        request.push_str(&format!("Host: {}:{}\r\n", opts.host, opts.port));
    }
    request.push_str("Upgrade: websocket\r\n");
    request.push_str("Connection: Upgrade\r\n");
    request.push_str("Sec-WebSocket-Version: 13\r\n");
    request.push_str(&format!("Sec-WebSocket-Key: {}\r\n", key));
    if !has_extra(http_header::USER_AGENT) {
        request.push_str(&format!("User-Agent: {}\r\n", opts.user_agent));
    }
    if let Some(origin) = opts.origin {
        if !has_extra(http_header::ORIGIN) {
            request.push_str(&format!("Origin: {}\r\n", origin));
        }
    }
    if !opts.sub_protocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            opts.sub_protocols.join(",")
        ));
    }
    for (name, value) in opts.extra_headers {
        if RESERVED_HEADERS
            .iter()
            .any(|reserved| name.eq_ignore_ascii_case(reserved))
        {
            continue;
        }
        request.push_str(&format!("{}: {}\r\n", name, value));
    }
    if let Some(deflate) = &opts.deflate {
        request.push_str(&format!(
            "Sec-WebSocket-Extensions: {}\r\n",
            deflate.header_value()
        ));
    }
    request.push_str("\r\n");
    request
}

fn validate_client_response(headers: &HashMap<String, String>, key: &str) -> Result<()> {
    let connection = headers
        .get(http_header::CONNECTION)
        .ok_or(HandshakeError::MissingHeader("Connection"))?;
    if !header_has_token(connection, "upgrade") {
        return Err(HandshakeError::InvalidHeader {
            header: "Connection",
            value: connection.clone(),
        }
        .into());
    }

    let accept = headers
        .get(http_header::SEC_WEBSOCKET_ACCEPT)
        .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;
    if accept.trim() != compute_accept_key(key) {
        return Err(HandshakeError::InvalidAcceptKey.into());
    }
    Ok(())
}

/// Server-side handshake parameters
#[derive(Debug)]
pub struct ServerHandshakeOptions<'a> {
    /// Accept the permessage-deflate offer when a client makes one
    pub enable_deflate: bool,
    /// Sub-protocols this server speaks, in preference order
    pub sub_protocols: &'a [String],
    /// Value of the `Server` response header
    pub server_header: &'a str,
}

/// Perform the server side of the opening handshake on an accepted stream.
///
/// Any validation failure writes a `4xx` response before returning the
/// error; the caller terminates the connection.
pub async fn server_handshake(
    stream: &mut dyn ByteStream,
    opts: &ServerHandshakeOptions<'_>,
    cancel: &CancelToken,
) -> Result<HandshakeResult> {
    let request_line = read_line(stream, cancel).await?;
    let (method, uri, version) = parse_request_line(&request_line)?;

    if method != "GET" {
        return send_error_response(stream, opts, 400, HandshakeError::InvalidMethod(method)).await;
    }
    if version != "HTTP/1.1" {
        return send_error_response(stream, opts, 400, HandshakeError::InvalidHttpVersion(version))
            .await;
    }

    let headers = read_headers(stream, cancel).await?;

    let key = match headers.get(http_header::SEC_WEBSOCKET_KEY) {
        Some(key) => key.clone(),
        None => {
            return send_error_response(
                stream,
                opts,
                400,
                HandshakeError::MissingHeader("Sec-WebSocket-Key"),
            )
            .await;
        }
    };

    match headers.get(http_header::UPGRADE) {
        None => {
            return send_error_response(
                stream,
                opts,
                400,
                HandshakeError::MissingHeader("Upgrade"),
            )
            .await;
        }
        Some(upgrade) => {
            // `keep-alive, Upgrade` is what Firefox sends; tolerate it.
            if !upgrade.eq_ignore_ascii_case("websocket")
                && !upgrade.eq_ignore_ascii_case("keep-alive, upgrade")
            {
                return send_error_response(
                    stream,
                    opts,
                    400,
                    HandshakeError::InvalidHeader {
                        header: "Upgrade",
                        value: upgrade.clone(),
                    },
                )
                .await;
            }
        }
    }

    match headers.get(http_header::SEC_WEBSOCKET_VERSION) {
        None => {
            return send_error_response(
                stream,
                opts,
                400,
                HandshakeError::MissingHeader("Sec-WebSocket-Version"),
            )
            .await;
        }
        Some(ws_version) if ws_version.trim() != constants::WEBSOCKET_VERSION => {
            return send_error_response(
                stream,
                opts,
                400,
                HandshakeError::UnsupportedVersion(ws_version.clone()),
            )
            .await;
        }
        Some(_) => {}
    }

    let mut response = String::from("HTTP/1.1 101 Switching Protocols\r\n");
    response.push_str(&format!(
        "Sec-WebSocket-Accept: {}\r\n",
        compute_accept_key(&key)
    ));
    response.push_str("Upgrade: websocket\r\n");
    response.push_str("Connection: Upgrade\r\n");
    response.push_str(&format!("Server: {}\r\n", opts.server_header));

    let protocol = select_sub_protocol(
        opts.sub_protocols,
        headers.get(http_header::SEC_WEBSOCKET_PROTOCOL).map(String::as_str),
    );
    if !protocol.is_empty() {
        response.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", protocol));
    }

    let deflate = if opts.enable_deflate {
        headers
            .get(http_header::SEC_WEBSOCKET_EXTENSIONS)
            .and_then(|value| DeflateConfig::parse(value))
    } else {
        None
    };
    if let Some(deflate) = &deflate {
        response.push_str(&format!(
            "Sec-WebSocket-Extensions: {}\r\n",
            deflate.header_value()
        ));
    }

    response.push_str("\r\n");
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;

    tracing::debug!(uri = %uri, protocol = %protocol, deflate = deflate.is_some(), "server handshake complete");

    Ok(HandshakeResult {
        uri,
        headers,
        protocol,
        deflate,
    })
}

/// Select the first server-offered protocol present in the client's
/// comma-separated list; empty when no overlap exists.
fn select_sub_protocol(server: &[String], client: Option<&str>) -> String {
    let Some(client) = client else {
        return String::new();
    };
    let client_protocols: Vec<&str> = client.split(',').map(str::trim).collect();
    server
        .iter()
        .find(|candidate| client_protocols.contains(&candidate.as_str()))
        .cloned()
        .unwrap_or_default()
}

async fn send_error_response(
    stream: &mut dyn ByteStream,
    opts: &ServerHandshakeOptions<'_>,
    code: u16,
    error: HandshakeError,
) -> Result<HandshakeResult> {
    let reason = error.to_string();
    let response = format!(
        "HTTP/1.1 {} {}\r\nServer: {}\r\nContent-Length: 0\r\n\r\n",
        code, reason, opts.server_header
    );
    // Best effort: the handshake already failed, the error we report is
    // the validation failure, not a secondary write problem.
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.flush().await;
    tracing::debug!(code, %reason, "rejected websocket upgrade");
    Err(error.into())
}

/// Parse `HTTP/1.1 101 Switching Protocols` into `(version, status)`
pub fn parse_status_line(line: &str) -> Result<(String, u16)> {
    let mut parts = line.split_whitespace();
    let version = parts
        .next()
        .ok_or(HandshakeError::Malformed("status line"))?
        .to_string();
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or(HandshakeError::Malformed("status line"))?;
    Ok((version, status))
}

/// Parse `GET /path HTTP/1.1` into `(method, uri, version)`
pub fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some(version)) => {
            Ok((method.to_string(), uri.to_string(), version.to_string()))
        }
        _ => Err(HandshakeError::Malformed("request line").into()),
    }
}

/// Read headers until the bare CRLF, normalizing names to lowercase
pub async fn read_headers(
    stream: &mut dyn ByteStream,
    cancel: &CancelToken,
) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
    let mut total = 0usize;
    loop {
        let line = read_line(stream, cancel).await?;
        if line.is_empty() {
            return Ok(headers);
        }
        total += line.len();
        if total > constants::MAX_HEADER_SIZE {
            return Err(HandshakeError::HeadersTooLarge.into());
        }
        let (name, value) = line
            .split_once(':')
            .ok_or(HandshakeError::Malformed("header line"))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }
}

/// Lowercase token matching for `Connection`-style list headers
fn header_has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}
