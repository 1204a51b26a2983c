//! Response router: delivers status, headers and body to their destinations.
//!
//! # Design
//! Routing runs after every exchange, failed or not, in a fixed order:
//! status code, headers, body. Each delivery is attempted even when an
//! earlier one failed; the first delivery error is returned afterwards.
//! The handler decides precedence: a transport fault always wins over a
//! delivery error.

use base64::Engine as _;
use bytes::Bytes;
use serde_json::Value;

use crate::builder::BuildMode;
use crate::context::{assign_to, push_to, ActionSnapshot, DelegatedParameters, ExecutionContext};
use crate::error::ActionError;
use crate::http::{RequestResult, ResponseBody};
use crate::types::{BodyEncoding, BodyRoute, Destination, ResponseSpec};

/// Convert raw body bytes into a context value.
///
/// # Errors
/// `ActionError::Encoding` when `json` is requested and the body is not
/// UTF-8 JSON.
pub fn encode_body(bytes: &[u8], encoding: BodyEncoding) -> Result<Value, ActionError> {
    let value = match encoding {
        BodyEncoding::Base64 => Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
        BodyEncoding::Hex => Value::String(hex::encode(bytes)),
        BodyEncoding::Utf8 => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        BodyEncoding::Json => {
            let text = std::str::from_utf8(bytes).map_err(|e| ActionError::Encoding {
                encoding,
                reason: e.to_string(),
            })?;
            serde_json::from_str(text).map_err(|e| ActionError::Encoding {
                encoding,
                reason: e.to_string(),
            })?
        }
    };
    Ok(value)
}

/// Keeps the first failure while letting later deliveries run.
#[derive(Default)]
struct Deliveries {
    first_error: Option<ActionError>,
}

impl Deliveries {
    fn record(&mut self, outcome: Result<(), ActionError>) {
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "response delivery failed");
            self.first_error.get_or_insert(e);
        }
    }

    fn finish(self) -> Result<(), ActionError> {
        match self.first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub struct ResponseRouter<'a> {
    pub context: &'a mut ExecutionContext,
    pub parameters: &'a mut DelegatedParameters,
    pub snapshot: &'a ActionSnapshot,
    pub mode: BuildMode,
}

impl ResponseRouter<'_> {
    /// Deliver every facet of `result` named in `spec`. `failed` marks an
    /// exchange that ended with an error.
    ///
    /// # Errors
    /// The first delivery, encoding or file error encountered.
    pub async fn route(
        &mut self,
        spec: &ResponseSpec,
        result: &RequestResult,
        failed: bool,
    ) -> Result<(), ActionError> {
        let mut deliveries = Deliveries::default();

        if let Some(route) = &spec.status_code {
            let status = result.status_value();
            deliveries.record(self.deliver(route.assign_to.as_ref(), route.push_to.as_ref(), &status));
        }

        if let Some(route) = &spec.headers {
            let headers = result.headers_value();
            deliveries.record(self.deliver(route.assign_to.as_ref(), route.push_to.as_ref(), &headers));
        }

        if let Some(route) = &spec.body {
            let outcome = match self.mode {
                BuildMode::Generic => self.route_raw_body(route, result).await,
                BuildMode::Json => self.route_json_body(route, result, failed).await,
            };
            deliveries.record(outcome);
        }

        deliveries.finish()
    }

    fn deliver(
        &mut self,
        assign: Option<&Destination>,
        push: Option<&Destination>,
        value: &Value,
    ) -> Result<(), ActionError> {
        let mut deliveries = Deliveries::default();
        if let Some(destination) = assign {
            deliveries.record(assign_to(self.context, self.parameters, destination, value.clone()));
        }
        if let Some(destination) = push {
            deliveries.record(push_to(self.context, self.parameters, destination, value.clone()));
        }
        deliveries.finish()
    }

    async fn route_raw_body(&mut self, route: &BodyRoute, result: &RequestResult) -> Result<(), ActionError> {
        if !route.wants_content() {
            return Ok(());
        }
        let Some(bytes) = captured_bytes(&result.body).await? else {
            return Ok(());
        };

        let mut deliveries = Deliveries::default();
        if let Some(destination) = &route.assign_to {
            let outcome = encode_body(&bytes, destination.encoding())
                .and_then(|value| assign_to(self.context, self.parameters, destination, value));
            deliveries.record(outcome);
        }
        if let Some(destination) = &route.push_to {
            let outcome = encode_body(&bytes, destination.encoding())
                .and_then(|value| push_to(self.context, self.parameters, destination, value));
            deliveries.record(outcome);
        }
        deliveries.finish()
    }

    /// The body is JSON and delivered as parsed; `saveTo` gets it back as
    /// JSON text, and only when the exchange succeeded.
    async fn route_json_body(
        &mut self,
        route: &BodyRoute,
        result: &RequestResult,
        failed: bool,
    ) -> Result<(), ActionError> {
        let Some(bytes) = captured_bytes(&result.body).await? else {
            return Ok(());
        };
        let parsed = encode_body(&bytes, BodyEncoding::Json)?;

        let mut deliveries = Deliveries::default();
        if route.wants_content() {
            deliveries.record(self.deliver(route.assign_to.as_ref(), route.push_to.as_ref(), &parsed));
        }
        if let (Some(save_to), false) = (route.save_to.as_deref(), failed) {
            deliveries.record(self.save_json(save_to, &parsed).await);
        }
        deliveries.finish()
    }

    async fn save_json(&mut self, save_to: &str, value: &Value) -> Result<(), ActionError> {
        let path = self.snapshot.absolute_path(save_to);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ActionError::io(parent, e))?;
        }
        let text = serde_json::to_string(value).map_err(|e| ActionError::Encoding {
            encoding: BodyEncoding::Json,
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| ActionError::io(&path, e))?;
        tracing::debug!(path = %path.display(), "saved JSON response body");
        Ok(())
    }
}

/// Non-empty body content, read back from disk when it was saved there.
async fn captured_bytes(body: &ResponseBody) -> Result<Option<Bytes>, ActionError> {
    let bytes = match body {
        ResponseBody::NotCaptured => return Ok(None),
        ResponseBody::Bytes(bytes) => bytes.clone(),
        ResponseBody::Saved(path) => Bytes::from(
            tokio::fs::read(path)
                .await
                .map_err(|e| ActionError::io(path, e))?,
        ),
    };
    Ok((!bytes.is_empty()).then_some(bytes))
}
