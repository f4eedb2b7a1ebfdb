//! Object-storage service contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::CollaboratorResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPage {
    pub objects: Vec<StoredObject>,
    /// Present when more objects remain under the prefix
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignedUrlMethod {
    Get,
    Put,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedUrlOptions {
    pub expires_in: Duration,
    pub content_type: Option<String>,
}

impl Default for SignedUrlOptions {
    fn default() -> Self {
        Self {
            expires_in: Duration::from_secs(900),
            content_type: None,
        }
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn list_objects(
        &self,
        prefix: &str,
        continuation_token: Option<&str>,
        max_keys: u32,
    ) -> CollaboratorResult<ObjectPage>;

    async fn generate_signed_url(
        &self,
        key: &str,
        method: SignedUrlMethod,
        options: &SignedUrlOptions,
    ) -> CollaboratorResult<String>;

    /// Deleting a missing key succeeds
    async fn delete_object(&self, key: &str) -> CollaboratorResult<()>;
}
