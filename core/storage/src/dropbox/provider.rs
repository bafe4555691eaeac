//! Dropbox remote store implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use photopush_common::{Error, RemotePath, Result};

use crate::provider::{
    CommitInfo, FileMetadata, FolderMetadata, ListPage, RemoteEntry, RemoteStore, SessionId,
    WriteMode,
};

use super::client::{DbxEntry, DbxFile, DropboxClient, ListFolderResult};

/// Default user agent sent with every request.
pub const DEFAULT_CLIENT_IDENTIFIER: &str = "PhotoPush/0.1";

/// Dropbox store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropboxConfig {
    /// OAuth2 access token.
    pub access_token: String,
    /// Client identifier used as user agent.
    #[serde(default = "default_client_identifier")]
    pub client_identifier: String,
}

fn default_client_identifier() -> String {
    DEFAULT_CLIENT_IDENTIFIER.to_string()
}

/// Dropbox remote store.
pub struct DropboxStore {
    client: DropboxClient,
}

impl DropboxStore {
    /// Create a store without contacting the service.
    ///
    /// # Errors
    /// - Empty access token
    pub fn new(config: DropboxConfig) -> Result<Self> {
        if config.access_token.trim().is_empty() {
            return Err(Error::Authentication("access token is empty".to_string()));
        }
        let client = DropboxClient::new(config.access_token, &config.client_identifier)?;
        Ok(Self { client })
    }

    /// Create a store and verify the token by fetching the account.
    pub async fn connect(config: DropboxConfig) -> Result<Self> {
        let store = Self::new(config)?;
        let name = store.client.current_account_name().await?;
        info!("Logged in as {}", name);
        Ok(store)
    }

    /// The API addresses the root folder as "", not "/".
    fn api_path(path: &RemotePath) -> String {
        if path.is_root() {
            String::new()
        } else {
            path.to_string_path()
        }
    }

    fn convert_file(file: DbxFile) -> Result<FileMetadata> {
        Ok(FileMetadata {
            path: RemotePath::parse(&file.path_display)?,
            name: file.name,
            size: file.size,
            content_hash: file.content_hash,
            client_modified: file.client_modified,
            server_modified: file.server_modified,
        })
    }

    fn convert_page(result: ListFolderResult) -> Result<ListPage> {
        let mut entries = Vec::with_capacity(result.entries.len());
        for entry in result.entries {
            match entry {
                DbxEntry::File(file) => entries.push(RemoteEntry::File(Self::convert_file(file)?)),
                DbxEntry::Folder(folder) => entries.push(RemoteEntry::Folder(FolderMetadata {
                    path: RemotePath::parse(&folder.path_display)?,
                    name: folder.name,
                })),
                DbxEntry::Deleted(_) => {}
            }
        }
        Ok(ListPage {
            entries,
            cursor: Some(result.cursor),
            has_more: result.has_more,
        })
    }
}

#[async_trait]
impl RemoteStore for DropboxStore {
    fn name(&self) -> &str {
        "dropbox"
    }

    async fn list_folder(&self, path: &RemotePath) -> Result<ListPage> {
        let result = self.client.list_folder(&Self::api_path(path)).await?;
        Self::convert_page(result)
    }

    async fn list_folder_continue(&self, cursor: &str) -> Result<ListPage> {
        let result = self.client.list_folder_continue(cursor).await?;
        Self::convert_page(result)
    }

    async fn upload_small(&self, path: &RemotePath, data: Vec<u8>) -> Result<FileMetadata> {
        let file = self.client.upload(&path.to_string_path(), data).await?;
        Self::convert_file(file)
    }

    async fn start_session(&self) -> Result<SessionId> {
        Ok(SessionId(self.client.upload_session_start().await?))
    }

    async fn append_session(&self, session: &SessionId, offset: u64, data: Vec<u8>) -> Result<()> {
        self.client
            .upload_session_append(session.as_str(), offset, data)
            .await
    }

    async fn finish_session(
        &self,
        session: &SessionId,
        offset: u64,
        commit: CommitInfo,
    ) -> Result<FileMetadata> {
        let mode = match commit.mode {
            WriteMode::Add => "add",
            WriteMode::Overwrite => "overwrite",
        };
        let file = self
            .client
            .upload_session_finish(
                session.as_str(),
                offset,
                &commit.path.to_string_path(),
                mode,
                commit.client_modified,
            )
            .await?;
        Self::convert_file(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_rejected() {
        let result = DropboxStore::new(DropboxConfig {
            access_token: "  ".to_string(),
            client_identifier: default_client_identifier(),
        });
        assert!(matches!(result, Err(Error::Authentication(_))));
    }

    #[test]
    fn test_root_api_path_is_empty() {
        assert_eq!(DropboxStore::api_path(&RemotePath::root()), "");
        assert_eq!(
            DropboxStore::api_path(&RemotePath::parse("/photos").unwrap()),
            "/photos"
        );
    }

    #[test]
    fn test_convert_page_drops_deleted_entries() {
        let json = r#"{
            "entries": [
                {".tag": "deleted", "name": "old.jpg"},
                {".tag": "folder", "name": "2021", "path_display": "/photos/2021"}
            ],
            "cursor": "abc",
            "has_more": false
        }"#;
        let result: ListFolderResult = serde_json::from_str(json).unwrap();
        let page = DropboxStore::convert_page(result).unwrap();

        assert_eq!(page.entries.len(), 1);
        assert!(matches!(&page.entries[0], RemoteEntry::Folder(f) if f.name == "2021"));
        assert!(!page.has_more);
    }

    #[test]
    fn test_config_defaults_client_identifier() {
        let config: DropboxConfig = serde_json::from_str(r#"{"access_token": "t"}"#).unwrap();
        assert_eq!(config.client_identifier, DEFAULT_CLIENT_IDENTIFIER);
    }
}
