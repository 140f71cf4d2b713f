//! Request pipeline orchestration

use crate::config::InstanceConfig;
use crate::deps::DependencyResolver;
use crate::sandbox::PythonSandbox;
use crate::types::{Arguments, Request, Response};
use crate::validate::validate;
use serde::{Deserialize, Serialize};

/// Unique request identifier for log correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub uuid::Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs the full pipeline for one request.
///
/// Every expected outcome becomes a [`Response`]; an `Err` from
/// [`Handler::handle`] is an instance-level fault for the hosting platform
/// to report through its own channel.
pub struct Handler {
    resolver: DependencyResolver,
    sandbox: PythonSandbox,
}

impl Handler {
    /// Create a handler with default instance paths
    pub fn new() -> crate::Result<Self> {
        Self::with_config(InstanceConfig::default())
    }

    /// Create a handler with explicit per-instance configuration
    pub fn with_config(config: InstanceConfig) -> crate::Result<Self> {
        Ok(Self {
            resolver: DependencyResolver::new(config),
            sandbox: PythonSandbox::new()?,
        })
    }

    /// Run the pipeline under a fresh request id
    pub fn handle(&self, request: &Request) -> crate::Result<Response> {
        self.handle_with_id(RequestId::new(), request)
    }

    /// Run the pipeline under a caller-chosen request id
    pub fn handle_with_id(&self, id: RequestId, request: &Request) -> crate::Result<Response> {
        tracing::info!(
            request_id = %id,
            code_len = request.code.len(),
            args = request.args.len(),
            kwargs = request.kwargs.len(),
            "handling request"
        );

        let response = self.run_pipeline(request)?;

        tracing::info!(
            request_id = %id,
            status_code = response.status_code,
            "request complete"
        );
        Ok(response)
    }

    fn run_pipeline(&self, request: &Request) -> crate::Result<Response> {
        let parsed = match validate(&request.code) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::debug!(error = %err, "submission rejected");
                return Ok(Response::rejected(format!("Code Error: {err}")));
            }
        };

        let program = match self.resolver.prepare(parsed, &self.sandbox) {
            Ok(program) => program,
            Err(err) if err.is_reportable() => {
                return Ok(Response::rejected(format!("Dependency Error: {err}")));
            }
            Err(err) => return Err(err.into()),
        };

        let result = self.sandbox.execute(&program, &Arguments::from(request))?;
        Ok(Response::from_execution(result))
    }

    /// Instance paths shared across requests
    pub fn config(&self) -> &InstanceConfig {
        self.resolver.config()
    }
}
