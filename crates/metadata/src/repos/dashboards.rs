//! Dashboard and app repositories (soft-archived UUID records).

use crate::error::MetadataResult;
use crate::models::{AppRow, DashboardRow};
use async_trait::async_trait;
use uuid::Uuid;

/// Repository for dashboard and app records.
#[async_trait]
pub trait DashboardRepo: Send + Sync {
    async fn create_app(&self, app: &AppRow) -> MetadataResult<()>;

    async fn get_app(&self, id: Uuid) -> MetadataResult<Option<AppRow>>;

    /// Non-archived apps, oldest first.
    async fn list_apps(&self) -> MetadataResult<Vec<AppRow>>;

    async fn update_app_state(&self, id: Uuid, state: &str, updated_at: i64)
    -> MetadataResult<()>;

    /// Soft-archive an app.
    async fn archive_app(&self, id: Uuid, updated_at: i64) -> MetadataResult<()>;

    async fn create_dashboard(&self, dashboard: &DashboardRow) -> MetadataResult<()>;

    async fn get_dashboard(&self, id: Uuid) -> MetadataResult<Option<DashboardRow>>;

    /// Non-archived dashboards, oldest first.
    async fn list_dashboards(&self) -> MetadataResult<Vec<DashboardRow>>;

    async fn update_dashboard(
        &self,
        id: Uuid,
        name: &str,
        description: &str,
        updated_at: i64,
    ) -> MetadataResult<()>;

    /// Soft-archive a dashboard.
    async fn archive_dashboard(&self, id: Uuid, updated_at: i64) -> MetadataResult<()>;
}
