//! HTTP bridge: services outbound HTTP requests the native engine delegates to the host.
//!
//! Request header block: repeated `{i32 BE key_len, key, i32 BE value_len, value}`.
//! PUT body block: `{i64 BE len, len bytes}`. Every request is answered exactly once with
//! `receivedHttpResponse`; failures carry a negative status (see [`HttpError::status`]).

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::OnceCell;
use tracing::{info, warn};

use crate::marshal::Arena;
use crate::native::{EndpointHandle, NativeEngine};

/// Method byte for PUT. Any other value means GET.
pub const METHOD_PUT: u8 = 0x1;

/// Default bound on a single request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Put,
}

impl HttpMethod {
    pub fn from_byte(b: u8) -> Self {
        if b == METHOD_PUT {
            HttpMethod::Put
        } else {
            HttpMethod::Get
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub uri: String,
    pub method: HttpMethod,
    pub headers: HashMap<String, String>,
    /// Present for PUT only.
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
}

impl HttpError {
    /// Status reported to the native engine for a failed request.
    pub fn status(&self) -> i32 {
        match self {
            HttpError::Malformed(_) => -1,
            HttpError::Timeout => -2,
            HttpError::Transport(_) => -3,
        }
    }
}

fn read_i32(block: &[u8], off: usize) -> Option<i32> {
    let bytes = block.get(off..off + 4)?;
    Some(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_field(block: &[u8], off: &mut usize, what: &str) -> Result<String, HttpError> {
    let len = read_i32(block, *off)
        .ok_or_else(|| HttpError::Malformed(format!("truncated {what} length at {off}")))?;
    let len = usize::try_from(len)
        .map_err(|_| HttpError::Malformed(format!("negative {what} length {len}")))?;
    *off += 4;
    let bytes = block
        .get(*off..*off + len)
        .ok_or_else(|| HttpError::Malformed(format!("{what} of {len} bytes overruns block")))?;
    *off += len;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Decode a header block. Duplicate keys: last write wins.
pub fn decode_headers(block: &[u8]) -> Result<HashMap<String, String>, HttpError> {
    let mut headers = HashMap::new();
    let mut off = 0;
    while off < block.len() {
        let key = read_field(block, &mut off, "header key")?;
        let value = read_field(block, &mut off, "header value")?;
        headers.insert(key, value);
    }
    Ok(headers)
}

/// Decode a PUT body block. Trailing bytes after the declared length are ignored.
pub fn decode_body(block: &[u8]) -> Result<Vec<u8>, HttpError> {
    let len_bytes: [u8; 8] = block
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| HttpError::Malformed("truncated body length".to_string()))?;
    let len = i64::from_be_bytes(len_bytes);
    let len = usize::try_from(len)
        .map_err(|_| HttpError::Malformed(format!("negative body length {len}")))?;
    block
        .get(8..8usize.saturating_add(len))
        .map(<[u8]>::to_vec)
        .ok_or_else(|| HttpError::Malformed(format!("body of {len} bytes overruns block")))
}

impl HttpRequest {
    /// Build a request from the raw blocks handed over by the native engine.
    pub fn from_blocks(uri: String, method: u8, header_block: &[u8], body_block: &[u8]) -> Result<Self, HttpError> {
        let method = HttpMethod::from_byte(method);
        let headers = decode_headers(header_block)?;
        let body = match method {
            HttpMethod::Put => Some(decode_body(body_block)?),
            HttpMethod::Get => None,
        };
        Ok(Self {
            uri,
            method,
            headers,
            body,
        })
    }
}

/// Performs one blocking HTTP exchange.
pub trait HttpClient: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// [`HttpClient`] backed by `reqwest::blocking`. The inner client is built on first use so it
/// is created on the executor thread rather than inside a caller's async runtime.
pub struct ReqwestClient {
    timeout: Duration,
    client: OnceCell<reqwest::blocking::Client>,
}

impl ReqwestClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> Result<&reqwest::blocking::Client, HttpError> {
        self.client.get_or_try_init(|| {
            reqwest::blocking::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| HttpError::Transport(e.to_string()))
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else if e.is_builder() {
        HttpError::Malformed(e.to_string())
    } else {
        HttpError::Transport(e.to_string())
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let client = self.client()?;
        let mut builder = match request.method {
            HttpMethod::Get => client.get(&request.uri),
            HttpMethod::Put => client.put(&request.uri),
        };
        for (k, v) in &request.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let resp = builder.send().map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        let body = resp.bytes().map_err(map_reqwest_error)?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// Runs requests and reports the outcome back across the boundary.
#[derive(Clone)]
pub struct HttpBridge {
    client: std::sync::Arc<dyn HttpClient>,
}

impl HttpBridge {
    pub fn new(client: std::sync::Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Perform `request` (already decoded, possibly failed) and always send exactly one response.
    pub fn respond(
        &self,
        engine: &dyn NativeEngine,
        endpoint: EndpointHandle,
        request_id: u32,
        request: Result<HttpRequest, HttpError>,
    ) {
        let outcome = request.and_then(|req| {
            info!(request_id, method = ?req.method, uri = %req.uri, "performing http request");
            self.client.send(&req)
        });
        let (status, body) = match outcome {
            Ok(resp) => (i32::from(resp.status), resp.body),
            Err(e) => {
                warn!(request_id, error = %e, "http request failed");
                (e.status(), Vec::new())
            }
        };
        let arena = Arena::new();
        engine.received_http_response(endpoint, request_id, status, arena.bytes(&body));
        info!(request_id, status, body_len = body.len(), "http response delivered");
    }
}
