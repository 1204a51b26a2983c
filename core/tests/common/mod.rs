//! Shared harness: a mock server on a random port plus the host state one
//! invocation needs.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use http_actions::temp::TempPathsRegistry;
use http_actions::{
    ActionError, ActionServices, ActionSnapshot, DelegatedParameters, ExecutionContext,
    Invocation, PluginRegistry, TransportConfig,
};
use serde_json::Value;

pub struct Harness {
    pub base: String,
    pub context: ExecutionContext,
    pub parameters: DelegatedParameters,
    pub temp: Arc<TempPathsRegistry>,
    pub messages: Vec<String>,
    dir: tempfile::TempDir,
    registry: PluginRegistry,
}

impl Harness {
    pub async fn start() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(mock_server::run(listener));

        let temp = Arc::new(TempPathsRegistry::new().unwrap());
        let services = ActionServices {
            temp_files: temp.clone(),
            ..ActionServices::new(TransportConfig::default()).unwrap()
        };

        Self {
            base: format!("http://{addr}"),
            context: ExecutionContext::default(),
            parameters: DelegatedParameters::default(),
            temp,
            messages: Vec::new(),
            dir: tempfile::tempdir().unwrap(),
            registry: PluginRegistry::new(services),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Working directory of every invocation.
    pub fn wd(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, content: &str) {
        let path = self.wd().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn ctx(&self, key: &str) -> &Value {
        self.context
            .ctx
            .get(key)
            .unwrap_or_else(|| panic!("ctx.{key} was not written"))
    }

    /// Validate and then execute `options` with the handler named `id`.
    pub async fn run(&mut self, id: &str, options: Value) -> Result<(), ActionError> {
        let handler = self
            .registry
            .find(id)
            .unwrap_or_else(|| panic!("no handler for {id}"));
        let mut snapshot = ActionSnapshot::new(handler.metadata().id.clone(), self.dir.path());
        let outcome = {
            let mut invocation = Invocation {
                context: &mut self.context,
                snapshot: &mut snapshot,
                parameters: &mut self.parameters,
            };
            match handler.validate(&options, &mut invocation).await {
                Ok(()) => handler.execute(&options, &mut invocation).await,
                Err(e) => Err(e),
            }
        };
        self.messages.extend(snapshot.messages().iter().cloned());
        outcome
    }
}

/// Request headers the server saw, decoded from the `x-request` response header.
pub fn observed_request(headers: &Value) -> Value {
    let raw = headers[mock_server::X_REQUEST]
        .as_str()
        .expect("x-request header missing");
    serde_json::from_str(raw).unwrap()
}
