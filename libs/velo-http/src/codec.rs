//! HTTP/1.1 wire codec: request serialization and response parsing.
//!
//! The serializer validates header fields (CRLF injection, 7-bit
//! cleanliness) immediately before write, so a malformed request fails
//! with [`HttpError::InvalidRequest`] without touching the socket. The
//! parser works over a caller-owned buffer so leftover bytes stay with the
//! connection between responses.

use crate::config::CodecLimits;
use crate::error::HttpError;
use crate::headers::HeaderStore;
use crate::request::Request;
use bytes::{Bytes, BytesMut};
use memchr::memchr;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A fully framed response as read off the wire.
#[derive(Debug)]
pub(crate) struct ParsedResponse {
    pub status: http::StatusCode,
    pub headers: HeaderStore,
    pub body: Bytes,
    /// Whether the connection may be returned to the pool, derived from
    /// the HTTP version, the `Connection` header, and the framing mode.
    pub keep_alive: bool,
}

/// Serialize a request into HTTP/1.1 wire bytes.
///
/// Auto-injects `Host`, `Connection: keep-alive`, `User-Agent`, and
/// `Content-Length` when the caller did not provide them; a caller
/// `Content-Length` that disagrees with the body length is rejected.
pub(crate) fn serialize_request(request: &Request, user_agent: &str) -> Result<Vec<u8>, HttpError> {
    let headers = request.headers();
    validate_headers(headers)?;

    let uri = request.uri();
    let path = match uri.path_and_query() {
        Some(pq) if !pq.as_str().is_empty() => pq.as_str(),
        _ => "/",
    };

    let mut out = Vec::with_capacity(256 + request.body().map_or(0, |b| b.len()));
    out.extend_from_slice(request.method().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(path.as_bytes());
    out.extend_from_slice(b" HTTP/1.1\r\n");

    if !headers.contains("host") {
        write_header(&mut out, "Host", &host_header_value(uri)?);
    }
    if !headers.contains("connection") {
        write_header(&mut out, "Connection", "keep-alive");
    }
    if !headers.contains("user-agent") {
        write_header(&mut out, "User-Agent", user_agent);
    }

    if let Some(body) = request.body() {
        if let Some(declared) = headers.get_first("content-length") {
            let declared: usize = declared.trim().parse().map_err(|_| {
                HttpError::invalid_request("Content-Length header is not a valid integer")
            })?;
            if declared != body.len() {
                return Err(HttpError::invalid_request(format!(
                    "Content-Length {declared} disagrees with body length {}",
                    body.len()
                )));
            }
        } else if !headers.contains("transfer-encoding") {
            write_header(&mut out, "Content-Length", &body.len().to_string());
        }
    }

    for (name, value) in headers.iter() {
        write_header(&mut out, name, value);
    }

    out.extend_from_slice(b"\r\n");
    if let Some(body) = request.body() {
        out.extend_from_slice(body);
    }
    Ok(out)
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

/// Compute the `Host` header value: bracketed for IPv6 literals, port only
/// when it differs from the scheme default.
fn host_header_value(uri: &http::Uri) -> Result<String, HttpError> {
    let host = uri
        .host()
        .ok_or_else(|| HttpError::invalid_request("request URI has no host"))?;

    let mut value = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_owned()
    };

    if let Some(port) = uri.port_u16()
        && port != default_port(uri)
    {
        value.push(':');
        value.push_str(&port.to_string());
    }
    Ok(value)
}

pub(crate) fn default_port(uri: &http::Uri) -> u16 {
    if uri.scheme_str() == Some("https") { 443 } else { 80 }
}

/// Reject header fields that cannot appear on the wire: empty names,
/// `:`/CR/LF in names, CR/LF in values, and anything not 7-bit clean.
fn validate_headers(headers: &HeaderStore) -> Result<(), HttpError> {
    for (name, value) in headers.iter() {
        if name.is_empty() {
            return Err(HttpError::invalid_request("empty header name"));
        }
        if name.bytes().any(|b| b == b':' || b == b'\r' || b == b'\n') || !name.is_ascii() {
            return Err(HttpError::invalid_request(format!(
                "invalid header name {name:?}"
            )));
        }
        if value.bytes().any(|b| b == b'\r' || b == b'\n') || !value.is_ascii() {
            return Err(HttpError::invalid_request(format!(
                "invalid value for header {name:?}"
            )));
        }
    }
    Ok(())
}

/// Parse one response off `stream`, using `buf` as the connection's read
/// buffer. Leftover bytes beyond the framed response stay in `buf`.
pub(crate) async fn parse_response<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    limits: &CodecLimits,
    head_request: bool,
) -> Result<ParsedResponse, HttpError>
where
    S: AsyncRead + Unpin,
{
    let mut head_bytes = 0usize;
    let status_line = read_line(stream, buf, limits.max_header_bytes, &mut head_bytes).await?;
    let (version_11, status) = parse_status_line(&status_line)?;

    let mut headers = HeaderStore::new();
    loop {
        let line = read_line(stream, buf, limits.max_header_bytes, &mut head_bytes).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = split_header_line(&line)?;
        headers.append(name, value);
    }

    let mut keep_alive = version_11;
    if let Some(connection) = headers.get_first("connection") {
        let connection = connection.to_ascii_lowercase();
        let mut tokens = connection.split(',').map(str::trim);
        if tokens.clone().any(|t| t == "close") {
            keep_alive = false;
        } else if tokens.any(|t| t == "keep-alive") {
            keep_alive = true;
        }
    }

    // HEAD, 1xx, 204, and 304 never carry a body, even when the headers
    // advertise framing for the equivalent GET.
    let code = status.as_u16();
    if head_request || (100..200).contains(&code) || code == 204 || code == 304 {
        return Ok(ParsedResponse {
            status,
            headers,
            body: Bytes::new(),
            keep_alive,
        });
    }

    if headers
        .get_first("transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().split(',').any(|t| t.trim() == "chunked"))
    {
        let body = read_chunked_body(stream, buf, limits).await?;
        return Ok(ParsedResponse {
            status,
            headers,
            body,
            keep_alive,
        });
    }

    if let Some(declared) = headers.get_first("content-length") {
        let len: usize = declared.trim().parse().map_err(|_| {
            HttpError::network(format!("invalid Content-Length in response: {declared:?}"))
        })?;
        if len > limits.max_body_bytes {
            return Err(HttpError::network(format!(
                "response body of {len} bytes exceeds the {} byte limit",
                limits.max_body_bytes
            )));
        }
        let body = read_exact(stream, buf, len).await?;
        return Ok(ParsedResponse {
            status,
            headers,
            body,
            keep_alive,
        });
    }

    // No framing: the body runs to EOF and the connection cannot be reused.
    let body = read_to_eof(stream, buf, limits.max_body_bytes).await?;
    Ok(ParsedResponse {
        status,
        headers,
        body,
        keep_alive: false,
    })
}

fn parse_status_line(line: &str) -> Result<(bool, http::StatusCode), HttpError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| HttpError::network("empty status line"))?;
    let version_11 = match version {
        "HTTP/1.1" => true,
        "HTTP/1.0" => false,
        other => {
            return Err(HttpError::network(format!(
                "unsupported HTTP version in status line: {other:?}"
            )));
        }
    };
    let code = parts
        .next()
        .ok_or_else(|| HttpError::network("status line missing status code"))?;
    let status = code
        .parse::<u16>()
        .ok()
        .and_then(|c| http::StatusCode::from_u16(c).ok())
        .ok_or_else(|| HttpError::network(format!("invalid status code: {code:?}")))?;
    Ok((version_11, status))
}

fn split_header_line(line: &str) -> Result<(&str, &str), HttpError> {
    let (name, value) = line
        .split_once(':')
        .ok_or_else(|| HttpError::network(format!("malformed header line: {line:?}")))?;
    let name = name.trim_end();
    if name.is_empty() {
        return Err(HttpError::network("empty header name in response"));
    }
    Ok((name, value.trim()))
}

/// Read one line, tolerating either CRLF or bare LF terminators.
/// `consumed` tracks the running header-block size against `max`.
async fn read_line<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max: usize,
    consumed: &mut usize,
) -> Result<String, HttpError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(pos) = memchr(b'\n', buf) {
            *consumed += pos + 1;
            if *consumed > max {
                return Err(HttpError::network(format!(
                    "response header block exceeds the {max} byte limit"
                )));
            }
            let mut line = buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            return String::from_utf8(line.to_vec())
                .map_err(|_| HttpError::network("response header line is not valid ASCII"));
        }
        if buf.len() + *consumed > max {
            return Err(HttpError::network(format!(
                "response header block exceeds the {max} byte limit"
            )));
        }
        fill(stream, buf).await?;
    }
}

async fn read_chunked_body<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    limits: &CodecLimits,
) -> Result<Bytes, HttpError>
where
    S: AsyncRead + Unpin,
{
    let mut body = BytesMut::new();
    loop {
        let mut line_budget = 0usize;
        let size_line = read_line(stream, buf, limits.max_header_bytes, &mut line_budget).await?;
        // Chunk extensions after ';' are ignored.
        let size_str = size_line
            .split(';')
            .next()
            .unwrap_or_default()
            .trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| {
            HttpError::network(format!("invalid chunk size: {size_str:?}"))
        })?;
        if size > limits.max_chunk_bytes {
            return Err(HttpError::network(format!(
                "chunk of {size} bytes exceeds the {} byte limit",
                limits.max_chunk_bytes
            )));
        }

        if size == 0 {
            // Trailer section: consume lines until the terminating blank.
            // The whole section shares one header-sized budget.
            let mut trailer_budget = 0usize;
            loop {
                let line =
                    read_line(stream, buf, limits.max_header_bytes, &mut trailer_budget).await?;
                if line.is_empty() {
                    break;
                }
            }
            return Ok(body.freeze());
        }

        if body.len() + size > limits.max_body_bytes {
            return Err(HttpError::network(format!(
                "chunked response body exceeds the {} byte limit",
                limits.max_body_bytes
            )));
        }
        let chunk = read_exact(stream, buf, size).await?;
        body.extend_from_slice(&chunk);

        let mut terminator_budget = 0usize;
        let terminator =
            read_line(stream, buf, limits.max_header_bytes, &mut terminator_budget).await?;
        if !terminator.is_empty() {
            return Err(HttpError::network("missing CRLF after chunk data"));
        }
    }
}

async fn read_exact<S>(stream: &mut S, buf: &mut BytesMut, n: usize) -> Result<Bytes, HttpError>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < n {
        fill(stream, buf).await?;
    }
    Ok(buf.split_to(n).freeze())
}

async fn read_to_eof<S>(
    stream: &mut S,
    buf: &mut BytesMut,
    max: usize,
) -> Result<Bytes, HttpError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if buf.len() > max {
            return Err(HttpError::network(format!(
                "response body exceeds the {max} byte limit"
            )));
        }
        let read = stream
            .read_buf(buf)
            .await
            .map_err(|e| HttpError::io("read response body", e))?;
        if read == 0 {
            return Ok(buf.split().freeze());
        }
    }
}

/// Read more bytes into the buffer; EOF mid-message is a network error.
async fn fill<S>(stream: &mut S, buf: &mut BytesMut) -> Result<(), HttpError>
where
    S: AsyncRead + Unpin,
{
    let read = stream
        .read_buf(buf)
        .await
        .map_err(|e| HttpError::io("read response", e))?;
    if read == 0 {
        return Err(HttpError::io(
            "connection closed before the response was complete",
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "unexpected EOF"),
        ));
    }
    Ok(())
}
