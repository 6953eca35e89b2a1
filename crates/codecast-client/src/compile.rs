//! Compile collaborator.
//!
//! Running code is delegated to an external HTTP service. The room session
//! does not depend on it; failures end up as text in the output pane.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use codecast_protocol::{CompileRequest, CompileResponse, CompileServiceError};

use crate::config::ClientConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The service answered with an error body
    #[error("{0}")]
    Service(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Something that can compile and run a program.
#[async_trait]
pub trait Compiler: Send + Sync {
    async fn compile(&self, request: CompileRequest) -> Result<CompileResponse, CompileError>;
}

/// `Compiler` backed by `POST <compile_url>/compile`. No retries.
pub struct HttpCompiler {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpCompiler {
    pub fn new(config: &ClientConfig) -> Result<Self, CompileError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CompileError::Network(e.to_string()))?;

        Ok(Self {
            endpoint: config.compile_endpoint(),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Compiler for HttpCompiler {
    async fn compile(&self, request: CompileRequest) -> Result<CompileResponse, CompileError> {
        debug!(endpoint = %self.endpoint, language = %request.language, "Sending compile request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| CompileError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CompileError::Network(e.to_string()))?;

        if !status.is_success() {
            warn!(status = %status, "Compile service returned an error");
            return Err(match serde_json::from_str::<CompileServiceError>(&body) {
                Ok(e) => CompileError::Service(e.error),
                Err(_) => CompileError::Service(format!("HTTP {status}: {body}")),
            });
        }

        serde_json::from_str(&body).map_err(|e| CompileError::InvalidResponse(e.to_string()))
    }
}

// ============================================================================
// Output Pane
// ============================================================================

/// State of the output area under the editor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPane {
    pub loading: bool,
    pub output: String,
}

impl OutputPane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles `code` and replaces the output with the result.
    ///
    /// Empty code does nothing. `loading` is back to `false` on return,
    /// whatever the outcome.
    pub async fn run(&mut self, compiler: &dyn Compiler, code: &str, language: &str, input: &str) {
        if code.is_empty() {
            return;
        }

        self.loading = true;
        let request = CompileRequest {
            code: code.to_string(),
            language: language.to_string(),
            input: input.to_string(),
        };

        self.output = match compiler.compile(request).await {
            Ok(response) => response.output_text().to_string(),
            Err(e) => format!("Error: {e}"),
        };
        self.loading = false;
    }

    pub fn clear(&mut self) {
        self.output.clear();
    }
}
