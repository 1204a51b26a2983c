//! Action handlers and the plugin registry.
//!
//! # Design
//! Every handler runs the same pipeline: validate, build, execute, route.
//! Routing happens whether or not the exchange failed, and a failure of
//! the exchange itself is reported in preference to any routing failure.
//! The handlers hold no per-invocation state, so one instance serves any
//! number of concurrent invocations.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::builder::{BuildMode, RequestBuilder};
use crate::config::TransportConfig;
use crate::context::{ActionSnapshot, DelegatedParameters, ExecutionContext};
use crate::error::ActionError;
use crate::http::{HttpMethod, RequestResult};
use crate::router::ResponseRouter;
use crate::sink::{FileSink, MemorySink, Sink};
use crate::temp::{TempFileAllocator, TempPathsRegistry};
use crate::template::{PlaceholderTemplates, TemplateResolver};
use crate::transport::Transport;
use crate::types::ActionOptions;
use crate::validation::{validate_options, HandlerKind};

pub const PLUGIN_NAME: &str = "@fbl-plugins/http";
pub const PLUGIN_DESCRIPTION: &str = "Plugin that helps to make HTTP requests from FBL flow.";
/// Template utilities the plugin contributes to the host.
pub const TEMPLATE_UTILITIES: &[&str] = &["http.randomUserAgent"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMetadata {
    pub id: String,
    pub aliases: Vec<String>,
}

impl ActionMetadata {
    fn new(id: impl Into<String>, aliases: &[String]) -> Self {
        Self {
            id: id.into(),
            aliases: aliases.to_vec(),
        }
    }

    pub fn matches(&self, id_or_alias: &str) -> bool {
        self.id == id_or_alias || self.aliases.iter().any(|alias| alias == id_or_alias)
    }
}

/// Host state an invocation reads and writes.
pub struct Invocation<'a> {
    pub context: &'a mut ExecutionContext,
    pub snapshot: &'a mut ActionSnapshot,
    pub parameters: &'a mut DelegatedParameters,
}

/// Collaborators shared by every handler.
#[derive(Clone)]
pub struct ActionServices {
    pub transport: Transport,
    pub templates: Arc<dyn TemplateResolver>,
    pub temp_files: Arc<dyn TempFileAllocator>,
}

impl ActionServices {
    /// Services backed by the built-in template resolver and temp registry.
    ///
    /// # Errors
    /// Fails when the HTTP client or the temp directory cannot be created.
    pub fn new(config: TransportConfig) -> Result<Self, ActionError> {
        Ok(Self {
            transport: Transport::new(config)?,
            templates: Arc::new(PlaceholderTemplates),
            temp_files: Arc::new(TempPathsRegistry::new()?),
        })
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn metadata(&self) -> &ActionMetadata;

    /// Check `options` without side effects beyond file-existence probes.
    async fn validate(&self, options: &Value, invocation: &mut Invocation<'_>) -> Result<(), ActionError>;

    async fn execute(&self, options: &Value, invocation: &mut Invocation<'_>) -> Result<(), ActionError>;
}

/// Build, execute and route one request. `sink` is only created once the
/// request has been built.
async fn run_pipeline<F>(
    services: &ActionServices,
    options: &ActionOptions,
    mode: BuildMode,
    invocation: &mut Invocation<'_>,
    create_sink: F,
) -> Result<(), ActionError>
where
    F: std::future::Future<Output = Result<Box<dyn Sink>, ActionError>> + Send,
{
    let prepared = async {
        let request = RequestBuilder {
            config: services.transport.config(),
            templates: services.templates.as_ref(),
            snapshot: &*invocation.snapshot,
            context: &*invocation.context,
            parameters: &*invocation.parameters,
        }
        .build(&options.request, mode)
        .await?;
        Ok::<_, ActionError>((request, create_sink.await?))
    }
    .await;

    let (result, error) = match prepared {
        Ok((request, mut sink)) => {
            invocation
                .snapshot
                .log(format!("Make {} request to {}", request.method, request.url));
            let successful = options.response.as_ref().and_then(|r| r.successful_codes());
            let exchange = services
                .transport
                .execute(&request, sink.as_mut(), successful)
                .await;
            if exchange.error.is_none() {
                invocation
                    .snapshot
                    .log(format!("Complete {} request to {}", request.method, request.url));
            }
            (exchange.result, exchange.error)
        }
        Err(e) => (RequestResult::default(), Some(e)),
    };

    let routed = match &options.response {
        Some(response) => {
            ResponseRouter {
                context: &mut *invocation.context,
                parameters: &mut *invocation.parameters,
                snapshot: &*invocation.snapshot,
                mode,
            }
            .route(response, &result, error.is_some())
            .await
        }
        None => Ok(()),
    };

    match (error, routed) {
        (Some(e), _) | (None, Err(e)) => Err(e),
        (None, Ok(())) => Ok(()),
    }
}

/// Generic streaming request handler.
pub struct HttpRequestAction {
    services: ActionServices,
    metadata: ActionMetadata,
}

impl HttpRequestAction {
    pub const ID: &'static str = "com.fireblink.fbl.plugins.http.request";

    pub fn new(services: ActionServices) -> Self {
        let aliases = ["fbl.plugins.http.request", "http.request", "http"].map(String::from);
        Self {
            services,
            metadata: ActionMetadata::new(Self::ID, &aliases),
        }
    }
}

#[async_trait]
impl ActionHandler for HttpRequestAction {
    fn metadata(&self) -> &ActionMetadata {
        &self.metadata
    }

    async fn validate(&self, options: &Value, invocation: &mut Invocation<'_>) -> Result<(), ActionError> {
        validate_options(options, HandlerKind::Generic, invocation.snapshot).await?;
        Ok(())
    }

    async fn execute(&self, options: &Value, invocation: &mut Invocation<'_>) -> Result<(), ActionError> {
        let options = validate_options(options, HandlerKind::Generic, invocation.snapshot).await?;
        let save_to = options
            .response
            .as_ref()
            .and_then(|r| r.save_to())
            .map(|path| invocation.snapshot.absolute_path(path));
        let create_sink = async move {
            let sink: Box<dyn Sink> = match save_to {
                Some(path) => Box::new(FileSink::create(path).await?),
                None => Box::new(MemorySink::new()),
            };
            Ok::<_, ActionError>(sink)
        };
        run_pipeline(&self.services, &options, BuildMode::Generic, invocation, create_sink).await
    }
}

/// JSON request handler for one HTTP verb.
pub struct JsonAction {
    services: ActionServices,
    method: HttpMethod,
    metadata: ActionMetadata,
}

impl JsonAction {
    pub fn new(services: ActionServices, method: HttpMethod) -> Self {
        let verb = method.name();
        let aliases = [
            format!("fbl.plugins.http.{verb}.json"),
            format!("plugins.http.{verb}.json"),
            format!("http.{verb}.json"),
            format!("{verb}.json"),
        ];
        Self {
            services,
            method,
            metadata: ActionMetadata::new(format!("com.fireblink.fbl.plugins.http.{verb}.json"), &aliases),
        }
    }
}

#[async_trait]
impl ActionHandler for JsonAction {
    fn metadata(&self) -> &ActionMetadata {
        &self.metadata
    }

    async fn validate(&self, options: &Value, invocation: &mut Invocation<'_>) -> Result<(), ActionError> {
        validate_options(options, HandlerKind::Json, invocation.snapshot).await?;
        Ok(())
    }

    async fn execute(&self, options: &Value, invocation: &mut Invocation<'_>) -> Result<(), ActionError> {
        let mut options = validate_options(options, HandlerKind::Json, invocation.snapshot).await?;
        if options.request.method != self.method {
            tracing::debug!(
                handler = %self.method,
                requested = %options.request.method,
                "using the handler's method"
            );
            options.request.method = self.method;
        }
        let create_sink = async { Ok::<_, ActionError>(Box::new(MemorySink::new()) as Box<dyn Sink>) };
        run_pipeline(&self.services, &options, BuildMode::Json, invocation, create_sink).await
    }
}

/// Streams a response body to disk, to `saveTo` or to a scratch file.
pub struct FileDownloadAction {
    services: ActionServices,
    metadata: ActionMetadata,
}

impl FileDownloadAction {
    pub const ID: &'static str = "com.fireblink.fbl.plugins.http.download";

    pub fn new(services: ActionServices) -> Self {
        let aliases = [
            "fbl.plugins.http.download",
            "plugins.http.download",
            "http.download",
            "download",
        ]
        .map(String::from);
        Self {
            services,
            metadata: ActionMetadata::new(Self::ID, &aliases),
        }
    }
}

#[async_trait]
impl ActionHandler for FileDownloadAction {
    fn metadata(&self) -> &ActionMetadata {
        &self.metadata
    }

    async fn validate(&self, options: &Value, invocation: &mut Invocation<'_>) -> Result<(), ActionError> {
        validate_options(options, HandlerKind::Download, invocation.snapshot).await?;
        Ok(())
    }

    async fn execute(&self, options: &Value, invocation: &mut Invocation<'_>) -> Result<(), ActionError> {
        let options = validate_options(options, HandlerKind::Download, invocation.snapshot).await?;
        let (target, scratch) = match options.response.as_ref().and_then(|r| r.save_to()) {
            Some(path) => (invocation.snapshot.absolute_path(path), false),
            None => (self.services.temp_files.create_temp_file(false, None).await?, true),
        };
        tracing::debug!(path = %target.display(), scratch, "download target selected");

        let sink_path = target.clone();
        let create_sink = async move {
            Ok::<_, ActionError>(Box::new(FileSink::create(sink_path).await?) as Box<dyn Sink>)
        };
        let outcome =
            run_pipeline(&self.services, &options, BuildMode::Generic, invocation, create_sink).await;

        if scratch {
            match tokio::fs::remove_file(&target).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %target.display(), error = %e, "unable to remove scratch file"),
            }
        }
        outcome
    }
}

/// Every handler the plugin provides, looked up by id or alias.
pub struct PluginRegistry {
    handlers: Vec<Arc<dyn ActionHandler>>,
}

impl PluginRegistry {
    pub fn new(services: ActionServices) -> Self {
        let mut handlers: Vec<Arc<dyn ActionHandler>> =
            vec![Arc::new(HttpRequestAction::new(services.clone()))];
        handlers.extend(
            HttpMethod::ALL
                .iter()
                .map(|method| Arc::new(JsonAction::new(services.clone(), *method)) as Arc<dyn ActionHandler>),
        );
        handlers.push(Arc::new(FileDownloadAction::new(services)));
        Self { handlers }
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn description(&self) -> &'static str {
        PLUGIN_DESCRIPTION
    }

    /// Template utilities available to file-body templates, see
    /// `template::PlaceholderTemplates`.
    pub fn template_utilities(&self) -> &'static [&'static str] {
        TEMPLATE_UTILITIES
    }

    pub fn handlers(&self) -> &[Arc<dyn ActionHandler>] {
        &self.handlers
    }

    pub fn find(&self, id_or_alias: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers
            .iter()
            .find(|handler| handler.metadata().matches(id_or_alias))
            .cloned()
    }
}
