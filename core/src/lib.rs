//! HTTP request actions for a flow-automation host.
//!
//! # Overview
//! Each action takes a declarative options object describing a request and
//! where the response should go. The pipeline is
//! validate → build → execute → route:
//!
//! - `validation` rejects malformed or inconsistent options before any I/O.
//! - `builder` turns a `RequestSpec` into a transport-ready `HttpRequest`.
//! - `transport` sends it with `reqwest`, streaming the body into a `Sink`.
//! - `router` writes status, headers and body into the execution context.
//!
//! # Design
//! - The host's collaborators (context, templates, temp files) are modelled
//!   by `context`, `template` and `temp`, passed in explicitly.
//! - Handlers are stateless; everything per-invocation lives on the stack
//!   of `ActionHandler::execute`.
//! - Routing always runs, even after a failed exchange, so partial results
//!   (status, headers, partial body) reach their destinations.

pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod http;
pub mod router;
pub mod sink;
pub mod temp;
pub mod template;
pub mod transport;
pub mod types;
pub mod user_agent;
pub mod validation;

pub use config::TransportConfig;
pub use context::{ActionSnapshot, DelegatedParameters, ExecutionContext};
pub use error::{ActionError, TransportFault, TransportFaultKind};
pub use handlers::{
    ActionHandler, ActionMetadata, ActionServices, FileDownloadAction, HttpRequestAction,
    Invocation, JsonAction, PluginRegistry,
};
pub use http::{HttpMethod, HttpRequest, RequestResult};
pub use types::{ActionOptions, BodyEncoding, Destination, RequestSpec, ResponseSpec};
