//! HTTP command interface of the MSE.
//!
//! Playout commands are stateless `POST /profiles/<profile>/<command>` calls
//! whose `text/plain` body names the target path in the tree.

use crate::error::MseError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Playout commands accepted by a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MseCommand {
    Cue,
    Take,
    Continue,
    ContinueReverse,
    Out,
    Initialize,
    Cleanup,
}

impl MseCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            MseCommand::Cue => "cue",
            MseCommand::Take => "take",
            MseCommand::Continue => "continue",
            MseCommand::ContinueReverse => "continue_reverse",
            MseCommand::Out => "out",
            MseCommand::Initialize => "initialize",
            MseCommand::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for MseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful command response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub status: u16,
    pub response: String,
}

/// Sends playout commands to a profile.
#[async_trait]
pub trait MseHttp: Send + Sync {
    /// Sends `command` for the node at `path` to `profile`.
    async fn command(
        &self,
        profile: &str,
        command: MseCommand,
        path: &str,
    ) -> Result<CommandResult, MseError>;

    async fn cue(&self, profile: &str, path: &str) -> Result<CommandResult, MseError> {
        self.command(profile, MseCommand::Cue, path).await
    }

    async fn take(&self, profile: &str, path: &str) -> Result<CommandResult, MseError> {
        self.command(profile, MseCommand::Take, path).await
    }

    async fn continue_(&self, profile: &str, path: &str) -> Result<CommandResult, MseError> {
        self.command(profile, MseCommand::Continue, path).await
    }

    async fn continue_reverse(
        &self,
        profile: &str,
        path: &str,
    ) -> Result<CommandResult, MseError> {
        self.command(profile, MseCommand::ContinueReverse, path).await
    }

    async fn out(&self, profile: &str, path: &str) -> Result<CommandResult, MseError> {
        self.command(profile, MseCommand::Out, path).await
    }

    async fn initialize(&self, profile: &str, path: &str) -> Result<CommandResult, MseError> {
        self.command(profile, MseCommand::Initialize, path).await
    }

    async fn cleanup(&self, profile: &str, path: &str) -> Result<CommandResult, MseError> {
        self.command(profile, MseCommand::Cleanup, path).await
    }

    async fn initialize_show(&self, profile: &str, show: &str) -> Result<CommandResult, MseError> {
        self.initialize(profile, &crate::show_path(show)).await
    }

    async fn initialize_playlist(
        &self,
        profile: &str,
        playlist: &str,
    ) -> Result<CommandResult, MseError> {
        self.initialize(profile, &crate::playlist_path(playlist)).await
    }

    async fn cleanup_show(&self, profile: &str, show: &str) -> Result<CommandResult, MseError> {
        self.cleanup(profile, &crate::show_path(show)).await
    }

    async fn cleanup_playlist(
        &self,
        profile: &str,
        playlist: &str,
    ) -> Result<CommandResult, MseError> {
        self.cleanup(profile, &crate::playlist_path(playlist)).await
    }
}

/// `reqwest`-backed command client.
#[derive(Debug)]
pub struct HttpClient {
    base_url: String,
    client: reqwest::Client,
    timeout_ms: AtomicU64,
}

impl HttpClient {
    /// Creates a client for `http://<host>:<port>`.
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_base_url(format!("http://{}:{}", host, port))
    }

    /// Creates a client for an explicit base URL (scheme, host and port).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout_ms: AtomicU64::new(3000),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.set_timeout(timeout);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Changes the timeout of subsequent commands.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    fn request_error(&self, err: reqwest::Error) -> MseError {
        MseError::HttpRequest {
            base_url: self.base_url.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl MseHttp for HttpClient {
    async fn command(
        &self,
        profile: &str,
        command: MseCommand,
        path: &str,
    ) -> Result<CommandResult, MseError> {
        let url = format!("{}/profiles/{}/{}", self.base_url, profile, command);
        tracing::debug!("POST {} {}", url, path);

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "text/plain")
            .body(path.to_string())
            .timeout(self.timeout())
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| self.request_error(e))?;

        if status.is_client_error() {
            return Err(MseError::HttpClient {
                path: path.to_string(),
                status: status.as_u16(),
                response: text,
            });
        }
        if status.is_server_error() {
            return Err(MseError::HttpServer {
                path: path.to_string(),
                status: status.as_u16(),
                response: text,
            });
        }

        Ok(CommandResult {
            status: status.as_u16(),
            response: text,
        })
    }
}
