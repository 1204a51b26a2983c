//! Transport executor: sends an `HttpRequest`, streams the body into a sink
//! and classifies the outcome.
//!
//! # Design
//! `execute` never returns early. It always yields an `Exchange` holding
//! whatever status, headers and body were observed, plus the error when the
//! exchange failed, so the response router can deliver partial results.
//! The whole send-and-stream cycle runs under one `tokio::time::timeout`;
//! a timed-out exchange reports no status and no headers.

use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use tokio_util::io::ReaderStream;

use crate::builder::mime_for_path;
use crate::config::TransportConfig;
use crate::error::{ActionError, TransportFault};
use crate::http::{
    HeaderField, HttpMethod, HttpRequest, MultipartPayload, RequestPayload, RequestResult,
    ResponseHeaders,
};
use crate::sink::Sink;

/// Outcome of one request/response cycle.
#[derive(Debug)]
pub struct Exchange {
    pub result: RequestResult,
    pub error: Option<ActionError>,
}

/// Default `< 300` rule, or membership in the explicit allow-list.
pub fn is_successful(status: u16, successful: Option<&[u16]>) -> bool {
    match successful {
        Some(codes) => codes.contains(&status),
        None => status < 300,
    }
}

#[derive(Debug, Clone)]
pub struct Transport {
    client: reqwest::Client,
    config: TransportConfig,
}

impl Transport {
    /// # Errors
    /// Fails when the underlying HTTP client cannot be initialized.
    pub fn new(config: TransportConfig) -> Result<Self, ActionError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| TransportFault::network(e, None, None))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        request: &HttpRequest,
        sink: &mut dyn Sink,
        successful: Option<&[u16]>,
    ) -> Exchange {
        tracing::info!(method = %request.method, url = %request.url, "sending request");

        let cycle = tokio::time::timeout(request.timeout, self.exchange(request, &mut *sink)).await;
        let outcome = match cycle {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportFault::timeout(request.timeout).into()),
        };

        let mut result = RequestResult::default();
        let mut error = match outcome {
            Ok((status, headers)) => {
                result.status_code = Some(status);
                result.headers = headers.clone();
                if is_successful(status, successful) {
                    None
                } else {
                    Some(ActionError::from(TransportFault::status(status, headers)))
                }
            }
            Err(e) => {
                if let ActionError::Transport(fault) = &e {
                    result.status_code = fault.status;
                    result.headers = fault.headers.clone().unwrap_or_default();
                }
                Some(e)
            }
        };

        result.body = if error.is_some() {
            sink.abort().await
        } else {
            match sink.finalize().await {
                Ok(body) => body,
                Err(e) => {
                    error = Some(e);
                    sink.abort().await
                }
            }
        };

        match &error {
            None => tracing::info!(
                method = %request.method,
                url = %request.url,
                status = result.status_code,
                "request complete"
            ),
            Some(e) => tracing::warn!(
                method = %request.method,
                url = %request.url,
                status = result.status_code,
                error = %e,
                "request failed"
            ),
        }
        Exchange { result, error }
    }

    async fn exchange(
        &self,
        request: &HttpRequest,
        sink: &mut dyn Sink,
    ) -> Result<(u16, ResponseHeaders), ActionError> {
        let mut builder = self.client.request(reqwest_method(request.method), &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestPayload::Empty => builder,
            RequestPayload::Bytes(bytes) => builder.body(bytes.clone()),
            RequestPayload::Multipart(payload) => builder.multipart(multipart_form(payload).await?),
        };

        let response = builder.send().await.map_err(|e| map_reqwest_error(e, request))?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| TransportFault::network(e, Some(status), Some(headers.clone())))?;
            sink.write(&chunk).await?;
        }
        Ok((status, headers))
    }
}

fn reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
    }
}

fn map_reqwest_error(err: reqwest::Error, request: &HttpRequest) -> ActionError {
    if err.is_timeout() {
        return TransportFault::timeout(request.timeout).into();
    }
    TransportFault::network(err, None, None).into()
}

/// Attachments are streamed from disk with a known length.
async fn multipart_form(payload: &MultipartPayload) -> Result<Form, ActionError> {
    let mut form = Form::new();
    for (name, value) in &payload.fields {
        form = form.text(name.clone(), value.clone());
    }
    for (name, path) in &payload.files {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ActionError::MissingFile { path: path.clone() }
            } else {
                ActionError::io(path, e)
            }
        })?;
        let length = file
            .metadata()
            .await
            .map_err(|e| ActionError::io(path, e))?
            .len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let mut part = Part::stream_with_length(body, length)
            .mime_str(mime_for_path(path))
            .map_err(|e| TransportFault::network(e, None, None))?;
        if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            part = part.file_name(file_name.to_string());
        }
        form = form.part(name.clone(), part);
    }
    Ok(form)
}

/// Repeated headers are joined with `, `; `set-cookie` always stays a list.
fn collect_headers(map: &HeaderMap) -> ResponseHeaders {
    let mut headers = ResponseHeaders::new();
    for name in map.keys() {
        let values: Vec<String> = map
            .get_all(name)
            .iter()
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
            .collect();
        let field = if *name == reqwest::header::SET_COOKIE {
            HeaderField::Multiple(values)
        } else {
            HeaderField::Single(values.join(", "))
        };
        headers.insert(name.as_str().to_string(), field);
    }
    headers
}
