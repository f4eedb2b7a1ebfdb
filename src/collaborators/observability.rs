//! Observability-rendering service contract.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use super::error::CollaboratorResult;

/// Chunks of a rendered image
pub type RenderStream = BoxStream<'static, CollaboratorResult<Vec<u8>>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderParams {
    pub dashboard_uid: String,
    pub panel_id: Option<u32>,
    pub from: String,
    pub to: String,
    pub width: u32,
    pub height: u32,
    pub theme: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub title: String,
    pub state: String,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub uid: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    pub uid: String,
    pub title: String,
    pub folder_uid: Option<String>,
    pub url: String,
}

#[async_trait]
pub trait ObservabilityRenderer: Send + Sync {
    async fn render_url(&self, params: &RenderParams) -> CollaboratorResult<String>;

    async fn proxy_render(&self, url: &str) -> CollaboratorResult<RenderStream>;

    async fn list_alerts(&self) -> CollaboratorResult<Vec<Alert>>;

    async fn list_folders(&self) -> CollaboratorResult<Vec<Folder>>;

    async fn list_dashboards(&self) -> CollaboratorResult<Vec<Dashboard>>;
}
