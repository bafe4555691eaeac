//! Dropbox v2 API client.

use chrono::{DateTime, Utc};
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use photopush_common::{Error, Result};

/// RPC endpoint base URL.
const API_BASE: &str = "https://api.dropboxapi.com/2";
/// Content upload/download endpoint base URL.
const CONTENT_BASE: &str = "https://content.dropboxapi.com/2";

/// Header carrying the JSON arguments of content endpoints.
const API_ARG_HEADER: &str = "Dropbox-API-Arg";

/// Listing entry as returned by `files/list_folder`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum DbxEntry {
    File(DbxFile),
    Folder(DbxFolder),
    Deleted(DbxDeleted),
}

/// File metadata from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbxFile {
    pub name: String,
    pub path_display: String,
    pub size: u64,
    pub content_hash: String,
    pub client_modified: DateTime<Utc>,
    pub server_modified: DateTime<Utc>,
}

/// Folder metadata from the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbxFolder {
    pub name: String,
    pub path_display: String,
}

/// Tombstone for deleted entries; only present when explicitly requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbxDeleted {
    pub name: String,
}

/// Response from listing a folder.
#[derive(Debug, Deserialize)]
pub struct ListFolderResult {
    pub entries: Vec<DbxEntry>,
    pub cursor: String,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct SessionStartResult {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountName {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Account {
    name: AccountName,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_summary: String,
}

/// Dropbox API client authenticated with a bearer token.
pub struct DropboxClient {
    http: Client,
    access_token: String,
}

impl DropboxClient {
    /// Create a new client.
    pub fn new(access_token: impl Into<String>, client_identifier: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent(client_identifier)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            access_token: access_token.into(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Display name of the account owning the token.
    pub async fn current_account_name(&self) -> Result<String> {
        let account: Account = self.rpc("users/get_current_account", None).await?;
        Ok(account.name.display_name)
    }

    /// First page of a folder listing. `path` is "" for the root.
    pub async fn list_folder(&self, path: &str) -> Result<ListFolderResult> {
        let body = serde_json::json!({
            "path": path,
            "recursive": false,
            "include_deleted": false,
        });
        self.rpc("files/list_folder", Some(body)).await
    }

    /// Next page of a folder listing.
    pub async fn list_folder_continue(&self, cursor: &str) -> Result<ListFolderResult> {
        let body = serde_json::json!({ "cursor": cursor });
        self.rpc("files/list_folder/continue", Some(body)).await
    }

    /// Upload a file in one request, overwriting any existing file.
    pub async fn upload(&self, path: &str, data: Vec<u8>) -> Result<DbxFile> {
        let arg = serde_json::json!({
            "path": path,
            "mode": "overwrite",
            "autorename": false,
            "mute": false,
        });
        self.content("files/upload", arg, data).await
    }

    /// Start an upload session.
    pub async fn upload_session_start(&self) -> Result<String> {
        let arg = serde_json::json!({ "close": false });
        let result: SessionStartResult = self
            .content("files/upload_session/start", arg, Vec::new())
            .await?;
        Ok(result.session_id)
    }

    /// Append a chunk to an upload session.
    pub async fn upload_session_append(
        &self,
        session_id: &str,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        let arg = serde_json::json!({
            "cursor": { "session_id": session_id, "offset": offset },
            "close": false,
        });
        let _: serde_json::Value = self
            .content("files/upload_session/append_v2", arg, data)
            .await?;
        Ok(())
    }

    /// Commit an upload session to `path`.
    pub async fn upload_session_finish(
        &self,
        session_id: &str,
        offset: u64,
        path: &str,
        mode: &str,
        client_modified: Option<DateTime<Utc>>,
    ) -> Result<DbxFile> {
        let mut commit = serde_json::json!({
            "path": path,
            "mode": mode,
            "autorename": false,
            "mute": false,
        });
        if let Some(modified) = client_modified {
            commit["client_modified"] =
                serde_json::json!(modified.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        }
        let arg = serde_json::json!({
            "cursor": { "session_id": session_id, "offset": offset },
            "commit": commit,
        });
        self.content("files/upload_session/finish", arg, Vec::new())
            .await
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}/{}", API_BASE, endpoint);
        let mut request = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.auth_header());
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", endpoint, e)))?;

        self.handle_response(endpoint, response).await
    }

    async fn content<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        arg: serde_json::Value,
        data: Vec<u8>,
    ) -> Result<T> {
        let url = format!("{}/{}", CONTENT_BASE, endpoint);
        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, self.auth_header())
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header(API_ARG_HEADER, header_safe_json(&arg))
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", endpoint, e)))?;

        self.handle_response(endpoint, response).await
    }

    /// Handle API response with error checking.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| Error::Network(format!("{}: failed to parse response: {}", endpoint, e)));
        }

        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        let summary = serde_json::from_str::<ApiError>(&body)
            .map(|e| e.error_summary)
            .unwrap_or(body);

        Err(classify_error(endpoint, status, summary, retry_after))
    }
}

/// Map an HTTP failure onto the common error kinds.
fn classify_error(
    endpoint: &str,
    status: StatusCode,
    summary: String,
    retry_after: Option<Duration>,
) -> Error {
    let message = format!("{}: {} - {}", endpoint, status, summary);
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited {
            message,
            retry_after,
        },
        StatusCode::UNAUTHORIZED => Error::Authentication(message),
        StatusCode::CONFLICT if is_session_error(&summary) => Error::SessionExpired(message),
        StatusCode::CONFLICT if summary.contains("too_many_write_operations") => {
            Error::RateLimited {
                message,
                retry_after,
            }
        }
        s if s.is_server_error() => Error::Network(message),
        _ => Error::RemoteRejected(message),
    }
}

fn is_session_error(summary: &str) -> bool {
    ["incorrect_offset", "closed", "not_found"]
        .iter()
        .any(|tag| summary.contains(tag))
        && !summary.starts_with("path/")
        && !summary.contains("/path/")
}

/// Serialize JSON for an HTTP header, escaping every non-ASCII character.
fn header_safe_json(value: &serde_json::Value) -> String {
    let json = value.to_string();
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}
