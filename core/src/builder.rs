//! Request builder: declarative `RequestSpec` to transport-ready `HttpRequest`.
//!
//! # Design
//! Everything except multipart attachments is resolved here, so the
//! transport never touches the working directory or the template engine.
//! Header defaults (`user-agent`, `content-type`, `accept`) are only applied
//! when the caller did not supply the header under any casing.

use std::path::Path;

use bytes::Bytes;
use serde_json::Value;

use crate::config::TransportConfig;
use crate::context::{ActionSnapshot, DelegatedParameters, ExecutionContext};
use crate::error::ActionError;
use crate::http::{HttpRequest, MultipartPayload, RequestPayload};
use crate::template::{expand_twice, TemplateResolver};
use crate::types::{FileRef, MultipartForm, ParamValue, RequestBody, RequestSpec};

const USER_AGENT: &str = "user-agent";
const CONTENT_TYPE: &str = "content-type";
const ACCEPT: &str = "accept";
const OCTET_STREAM: &str = "application/octet-stream";

/// Mapping of file extensions to MIME types
/// Format: `(extension, mime_type)`
const EXTENSION_MIME_MAPPINGS: &[(&str, &str)] = &[
    ("json", "application/json"),
    ("txt", "text/plain"),
    ("text", "text/plain"),
    ("csv", "text/csv"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "application/javascript"),
    ("xml", "application/xml"),
    ("yaml", "text/yaml"),
    ("yml", "text/yaml"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
];

/// How the body is encoded and which defaults apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Streaming handler: every body variant, raw file payloads.
    Generic,
    /// JSON handlers: JSON in, JSON out.
    Json,
}

/// Per-invocation inputs the builder reads from.
pub struct RequestBuilder<'a> {
    pub config: &'a TransportConfig,
    pub templates: &'a dyn TemplateResolver,
    pub snapshot: &'a ActionSnapshot,
    pub context: &'a ExecutionContext,
    pub parameters: &'a DelegatedParameters,
}

impl RequestBuilder<'_> {
    /// # Errors
    /// `MissingFile` when a body file disappeared after validation,
    /// `Template` when expansion fails, `Validation` when a JSON-mode file
    /// does not hold a JSON document.
    pub async fn build(&self, spec: &RequestSpec, mode: BuildMode) -> Result<HttpRequest, ActionError> {
        let mut headers: Vec<(String, String)> = spec
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();
        set_default(&mut headers, USER_AGENT, &self.config.user_agent);
        if mode == BuildMode::Json {
            set_default(&mut headers, ACCEPT, mime::APPLICATION_JSON.essence_str());
        }

        let query = spec
            .query
            .iter()
            .map(|(name, value)| (name.clone(), value.joined()))
            .collect();

        let body = match &spec.body {
            None => RequestPayload::Empty,
            Some(RequestBody::Inline(value)) => {
                set_default(&mut headers, CONTENT_TYPE, mime::APPLICATION_JSON.essence_str());
                json_payload(value)?
            }
            Some(RequestBody::File(file)) => self.file_payload(file, mode, &mut headers).await?,
            Some(RequestBody::UrlencodedForm(fields)) => urlencoded_payload(fields, &mut headers)?,
            Some(RequestBody::MultipartForm(form)) => self.multipart_payload(form),
        };

        let request = HttpRequest {
            method: spec.method,
            url: spec.url.clone(),
            query,
            headers,
            body,
            timeout: self.config.timeout(spec.timeout),
        };
        tracing::debug!(
            method = %request.method,
            url = %request.url,
            headers = request.headers.len(),
            "built request"
        );
        Ok(request)
    }

    async fn file_payload(
        &self,
        file: &FileRef,
        mode: BuildMode,
        headers: &mut Vec<(String, String)>,
    ) -> Result<RequestPayload, ActionError> {
        let path = self.snapshot.absolute_path(file.path());
        let content = if file.is_template() {
            let text = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| file_error(&path, e))?;
            let expanded = expand_twice(
                self.templates,
                &self.snapshot.wd,
                &text,
                self.context,
                self.parameters,
            )
            .await?;
            Bytes::from(expanded)
        } else {
            Bytes::from(tokio::fs::read(&path).await.map_err(|e| file_error(&path, e))?)
        };

        match mode {
            BuildMode::Json => {
                let value: Value = serde_json::from_slice(&content).map_err(|e| {
                    ActionError::validation(
                        "request.body.file",
                        format!("{} is not a JSON document: {e}", path.display()),
                    )
                })?;
                set_default(headers, CONTENT_TYPE, mime::APPLICATION_JSON.essence_str());
                json_payload(&value)
            }
            BuildMode::Generic => {
                set_default(headers, CONTENT_TYPE, mime_for_path(&path));
                Ok(RequestPayload::Bytes(content))
            }
        }
    }

    fn multipart_payload(&self, form: &MultipartForm) -> RequestPayload {
        let fields = form
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.joined()))
            .collect();
        let files = form
            .files
            .iter()
            .map(|(name, path)| (name.clone(), self.snapshot.absolute_path(path)))
            .collect();
        RequestPayload::Multipart(MultipartPayload { fields, files })
    }
}

fn set_default(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !headers.iter().any(|(key, _)| key.eq_ignore_ascii_case(name)) {
        headers.push((name.to_string(), value.to_string()));
    }
}

fn json_payload(value: &Value) -> Result<RequestPayload, ActionError> {
    let text = serde_json::to_vec(value)
        .map_err(|e| ActionError::validation("request.body", e.to_string()))?;
    Ok(RequestPayload::Bytes(Bytes::from(text)))
}

/// Arrays repeat the key. An empty form sends no body at all.
fn urlencoded_payload(
    fields: &std::collections::BTreeMap<String, ParamValue>,
    headers: &mut Vec<(String, String)>,
) -> Result<RequestPayload, ActionError> {
    set_default(
        headers,
        CONTENT_TYPE,
        mime::APPLICATION_WWW_FORM_URLENCODED.essence_str(),
    );
    if fields.is_empty() {
        return Ok(RequestPayload::Empty);
    }
    let pairs: Vec<(&str, String)> = fields
        .iter()
        .flat_map(|(name, value)| {
            value
                .values()
                .into_iter()
                .map(move |item| (name.as_str(), item))
        })
        .collect();
    let encoded = serde_urlencoded::to_string(&pairs)
        .map_err(|e| ActionError::validation("request.body.form.urlencoded", e.to_string()))?;
    Ok(RequestPayload::Bytes(Bytes::from(encoded)))
}

fn file_error(path: &Path, error: std::io::Error) -> ActionError {
    if error.kind() == std::io::ErrorKind::NotFound {
        ActionError::MissingFile {
            path: path.to_path_buf(),
        }
    } else {
        ActionError::io(path, error)
    }
}

/// MIME type for a path by extension, `application/octet-stream` otherwise.
pub fn mime_for_path(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| {
            EXTENSION_MIME_MAPPINGS
                .iter()
                .find(|(known, _)| known.eq_ignore_ascii_case(ext))
                .map(|(_, mime_type)| *mime_type)
        })
        .unwrap_or(OCTET_STREAM)
}
