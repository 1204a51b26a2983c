//! Transport-ready request descriptors and raw response results.
//!
//! # Design
//! `HttpRequest` is plain data produced by the builder: everything the
//! transport needs is resolved up front (query flattened, default headers
//! applied, file bodies read or template-expanded). Only multipart file
//! attachments stay as paths so they can be streamed from disk at send time.
//!
//! `RequestResult` is what the transport hands to the response router, on
//! success and on failure alike.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Delete,
    Get,
    Patch,
    Post,
    Put,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Delete,
        HttpMethod::Get,
        HttpMethod::Patch,
        HttpMethod::Post,
        HttpMethod::Put,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Delete => "DELETE",
            HttpMethod::Get => "GET",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
        }
    }

    /// Lowercase verb used in handler identifiers (`http.get.json`).
    pub fn name(self) -> &'static str {
        match self {
            HttpMethod::Delete => "delete",
            HttpMethod::Get => "get",
            HttpMethod::Patch => "patch",
            HttpMethod::Post => "post",
            HttpMethod::Put => "put",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An outbound HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestPayload,
    pub timeout: Duration,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestPayload {
    #[default]
    Empty,
    Bytes(Bytes),
    Multipart(MultipartPayload),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MultipartPayload {
    pub fields: Vec<(String, String)>,
    /// Field name and absolute path of each attachment.
    pub files: Vec<(String, PathBuf)>,
}

/// A response header value; repeated headers keep every value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderField {
    Single(String),
    Multiple(Vec<String>),
}

pub type ResponseHeaders = BTreeMap<String, HeaderField>;

/// Status reported when the request never produced a response.
pub const STATUS_UNAVAILABLE: i64 = -1;

/// Where the captured response body ended up.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ResponseBody {
    /// Not captured, either by configuration or because nothing arrived.
    #[default]
    NotCaptured,
    Bytes(Bytes),
    Saved(PathBuf),
}

/// Raw outcome of one request, filled in as information becomes available.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RequestResult {
    pub status_code: Option<u16>,
    pub headers: ResponseHeaders,
    pub body: ResponseBody,
}

impl RequestResult {
    pub fn status_value(&self) -> Value {
        match self.status_code {
            Some(code) => Value::from(code),
            None => Value::from(STATUS_UNAVAILABLE),
        }
    }

    pub fn headers_value(&self) -> Value {
        serde_json::to_value(&self.headers).unwrap_or(Value::Null)
    }
}
