//! Typed wrappers for the agent's request methods.
//!
//! Each wrapper builds the method's params, sends it through
//! [`Session::send_request`] and deserialises the fields the client uses.
//! Unknown result fields are ignored.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::rpc::methods;
use crate::session::Session;
use crate::Result;

/// Thread summary returned by `thread/start`, `thread/resume` and
/// `thread/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadInfo {
    /// Thread id.
    pub id: String,
    /// First user message, when the agent reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadEnvelope {
    thread: ThreadInfo,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Entries on this page.
    pub data: Vec<T>,
    /// Cursor for the next page, absent on the last one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Model advertised by `model/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model id.
    pub id: String,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Whether the agent uses this model by default.
    #[serde(default)]
    pub is_default: bool,
}

/// Result of `command/exec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured standard output.
    #[serde(default)]
    pub stdout: String,
    /// Captured standard error.
    #[serde(default)]
    pub stderr: String,
}

/// Credentials for `account/login/start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMethod {
    /// Log in with an API key.
    ApiKey(String),
    /// Start a browser-based login.
    Browser,
}

impl Session {
    /// Create a thread rooted at `cwd`.
    ///
    /// # Errors
    ///
    /// Request errors from [`Session::send_request`];
    /// [`AppError::MalformedEnvelope`](crate::AppError::MalformedEnvelope)
    /// if the result has no `thread.id`.
    pub async fn start_thread(&self, cwd: Option<&Path>) -> Result<ThreadInfo> {
        let params = match cwd {
            Some(dir) => json!({ "cwd": dir.to_string_lossy() }),
            None => json!({}),
        };
        let result = self.send_request(methods::THREAD_START, params).await?;
        Ok(serde_json::from_value::<ThreadEnvelope>(result)?.thread)
    }

    /// Reopen a stored thread.
    ///
    /// # Errors
    ///
    /// Same as [`Session::start_thread`].
    pub async fn resume_thread(&self, thread_id: &str) -> Result<ThreadInfo> {
        let result = self
            .send_request(methods::THREAD_RESUME, json!({ "threadId": thread_id }))
            .await?;
        Ok(serde_json::from_value::<ThreadEnvelope>(result)?.thread)
    }

    /// List stored threads.
    ///
    /// # Errors
    ///
    /// Request errors, or a malformed page.
    pub async fn list_threads(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<ThreadInfo>> {
        let result = self
            .send_request(methods::THREAD_LIST, page_params(cursor, limit))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// List the models the agent can use.
    ///
    /// # Errors
    ///
    /// Request errors, or a malformed page.
    pub async fn list_models(
        &self,
        cursor: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Page<ModelInfo>> {
        let result = self
            .send_request(methods::MODEL_LIST, page_params(cursor, limit))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Read the signed-in account; the result is returned as sent.
    ///
    /// # Errors
    ///
    /// Request errors from [`Session::send_request`].
    pub async fn read_account(&self) -> Result<Value> {
        self.send_request(methods::ACCOUNT_READ, json!({})).await
    }

    /// Begin a login flow; the result (login id, browser URL) is returned
    /// as sent.
    ///
    /// # Errors
    ///
    /// Request errors from [`Session::send_request`].
    pub async fn start_login(&self, method: &LoginMethod) -> Result<Value> {
        let params = match method {
            LoginMethod::ApiKey(key) => json!({ "type": "apiKey", "apiKey": key }),
            LoginMethod::Browser => json!({ "type": "chatgpt" }),
        };
        self.send_request(methods::ACCOUNT_LOGIN_START, params).await
    }

    /// Run `argv` through the agent's sandboxed command runner.
    ///
    /// The request deadline is extended by `timeout` so the command has the
    /// whole window to finish.
    ///
    /// # Errors
    ///
    /// Request errors, or a result without `exitCode`.
    pub async fn exec_command(
        &self,
        argv: &[String],
        cwd: Option<&Path>,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        let mut params = json!({ "command": argv });
        if let Some(dir) = cwd {
            params["cwd"] = json!(dir.to_string_lossy());
        }
        if let Some(limit) = timeout {
            params["timeoutMs"] = json!(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX));
        }

        let deadline = match (self.options().request_timeout, timeout) {
            (Some(base), Some(extra)) => Some(base + extra),
            (base, _) => base,
        };
        let result = self
            .send_request_with_timeout(methods::COMMAND_EXEC, params, deadline)
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

fn page_params(cursor: Option<&str>, limit: Option<u32>) -> Value {
    let mut params = json!({});
    if let Some(cursor) = cursor {
        params["cursor"] = json!(cursor);
    }
    if let Some(limit) = limit {
        params["limit"] = json!(limit);
    }
    params
}
