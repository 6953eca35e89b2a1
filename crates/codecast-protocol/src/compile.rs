//! Request and response bodies of the external compile service.
//!
//! The service is a plain HTTP endpoint: `POST /compile` with a JSON
//! body, answering with captured stdout/stderr or an `error` string.

use serde::{Deserialize, Serialize};

/// Body of `POST /compile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileRequest {
    pub code: String,
    pub language: String,
    /// Text fed to the program's standard input
    #[serde(default)]
    pub input: String,
}

/// Successful compile-and-run result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileResponse {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl CompileResponse {
    /// Text to show the user: stdout when it has anything, stderr otherwise.
    pub fn output_text(&self) -> &str {
        if self.stdout.is_empty() {
            &self.stderr
        } else {
            &self.stdout
        }
    }
}

/// Error body returned with a non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileServiceError {
    pub error: String,
}
