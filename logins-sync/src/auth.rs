//! Credentials for one sync pass.

use crate::error::SyncResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the token server hands out for a sync pass.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub key_id: String,
    pub access_token: String,
    pub sync_key: String,
    #[serde(rename = "tokenServerURL")]
    pub token_server_url: String,
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("key_id", &self.key_id)
            .field("access_token", &"<redacted>")
            .field("sync_key", &"<redacted>")
            .field("token_server_url", &self.token_server_url)
            .finish()
    }
}

/// Supplies credentials at the start of each sync pass.
///
/// Implementations return [`SyncError::AuthInvalid`](crate::SyncError::AuthInvalid)
/// when the account needs to sign in again.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn auth_info(&self) -> SyncResult<AuthInfo>;
}

/// Hands out the same credentials every time.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    info: AuthInfo,
}

impl StaticTokenProvider {
    #[must_use]
    pub fn new(info: AuthInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn auth_info(&self) -> SyncResult<AuthInfo> {
        Ok(self.info.clone())
    }
}
