//! Read-only resources. `schema.plan.json` is static; the others compose the
//! identity resolver with a gateway read.

use std::sync::Arc;

use chrono::{Days, Utc};
use serde_json::{Value, json};
use stas_core::schema::plan_schema;

use crate::error::AppError;
use crate::gateway::{Gateway, training_date};
use crate::identity::IdentityResolver;

/// Days before `newest` scanned for the last training (two weeks inclusive).
pub(crate) const LAST_TRAINING_WINDOW_DAYS: u64 = 13;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Current,
    LastTraining,
    PlanSchema,
}

impl Resource {
    /// Manifest order.
    pub const ALL: [Resource; 3] = [Resource::Current, Resource::LastTraining, Resource::PlanSchema];

    pub fn name(self) -> &'static str {
        match self {
            Resource::Current => "current.json",
            Resource::LastTraining => "last_training.json",
            Resource::PlanSchema => "schema.plan.json",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Resource::Current => "Current athlete summary from the gateway",
            Resource::LastTraining => "Most recent completed training of the last two weeks",
            Resource::PlanSchema => "JSON schema for plan drafts accepted by plan.validate and plan.publish",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.name() == name)
    }

    pub fn path(self) -> String {
        format!("/mcp/resource/{}", self.name())
    }

    pub fn uri(self) -> String {
        format!("stas://{}", self.name())
    }

    /// Accepts `stas://name`, `/mcp/resource/name` or the bare name.
    pub fn from_uri(uri: &str) -> Option<Self> {
        let name = uri
            .strip_prefix("stas://")
            .or_else(|| uri.strip_prefix("/mcp/resource/"))
            .unwrap_or(uri);
        Self::from_name(name)
    }
}

#[derive(Clone)]
pub struct ResourceReader {
    gateway: Arc<dyn Gateway>,
    identity: IdentityResolver,
}

impl ResourceReader {
    pub fn new(gateway: Arc<dyn Gateway>, identity: IdentityResolver) -> Self {
        Self { gateway, identity }
    }

    pub async fn read(&self, name: &str, connection_id: Option<&str>) -> Result<Value, AppError> {
        let resource = Resource::from_name(name)
            .ok_or_else(|| AppError::NotFound(format!("resource '{name}'")))?;
        self.read_resource(resource, connection_id).await
    }

    pub async fn read_resource(
        &self,
        resource: Resource,
        connection_id: Option<&str>,
    ) -> Result<Value, AppError> {
        match resource {
            Resource::PlanSchema => Ok(plan_schema().clone()),
            Resource::Current => {
                let identity = self.identity.resolve(connection_id).await?;
                let summary = self.gateway.get_summary(&identity.user_id).await?;
                tracing::debug!(event = "resource_read", resource = resource.name(), "summary read");
                Ok(summary)
            }
            Resource::LastTraining => {
                let identity = self.identity.resolve(connection_id).await?;
                let newest = Utc::now().date_naive();
                let oldest = newest
                    .checked_sub_days(Days::new(LAST_TRAINING_WINDOW_DAYS))
                    .unwrap_or(newest);
                let trainings = self
                    .gateway
                    .get_trainings(&identity.user_id, oldest, newest)
                    .await?;
                tracing::debug!(
                    event = "resource_read",
                    resource = resource.name(),
                    count = trainings.len(),
                    "trainings read"
                );
                Ok(most_recent(trainings).unwrap_or_else(|| json!({})))
            }
        }
    }
}

/// Latest entry by date; undated entries lose to dated ones and later list
/// positions win ties.
pub(crate) fn most_recent(trainings: Vec<Value>) -> Option<Value> {
    trainings
        .into_iter()
        .enumerate()
        .max_by_key(|(index, t)| (training_date(t), *index))
        .map(|(_, t)| t)
}

#[cfg(test)]
mod tests {
    use crate::gateway::StubGateway;
    use crate::identity::MemoryLinkStore;

    use super::*;

    fn reader(fixed: Option<&str>) -> ResourceReader {
        ResourceReader::new(
            Arc::new(StubGateway::new()),
            IdentityResolver::new(fixed.map(str::to_string), Arc::new(MemoryLinkStore::default())),
        )
    }

    #[test]
    fn resource_names_resolve_from_uris() {
        assert_eq!(Resource::from_uri("stas://current.json"), Some(Resource::Current));
        assert_eq!(
            Resource::from_uri("/mcp/resource/schema.plan.json"),
            Some(Resource::PlanSchema)
        );
        assert_eq!(Resource::from_uri("last_training.json"), Some(Resource::LastTraining));
        assert_eq!(Resource::from_uri("secrets.json"), None);
    }

    #[test]
    fn most_recent_picks_latest_date() {
        let picked = most_recent(vec![
            json!({"id": 1, "date": "2025-11-01"}),
            json!({"id": 2, "date": "2025-11-03"}),
            json!({"id": 3, "date": "2025-11-02"}),
            json!({"id": 4}),
        ]);
        assert_eq!(picked.unwrap()["id"], 2);
        assert!(most_recent(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn schema_needs_no_identity() {
        let reader = reader(None);
        let first = reader.read("schema.plan.json", None).await.unwrap();
        let second = reader.read("schema.plan.json", Some("unknown-conn")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(&first, plan_schema());
    }

    #[tokio::test]
    async fn identity_backed_resources_require_a_link() {
        let reader = reader(None);
        let err = reader.read("current.json", Some("conn-1")).await.unwrap_err();
        assert!(matches!(err, AppError::Unlinked { .. }));

        reader.identity.link("conn-1", "7").await.unwrap();
        let summary = reader.read("current.json", Some("conn-1")).await.unwrap();
        assert_eq!(summary["user_id"], "7");
    }

    #[tokio::test]
    async fn last_training_is_the_latest_past_session() {
        let reader = reader(Some("stub"));
        let training = reader.read("last_training.json", None).await.unwrap();
        assert_eq!(training["id"], "stub-3");
    }

    #[tokio::test]
    async fn unknown_resource_is_not_found() {
        let err = reader(Some("stub")).read("nope.json", None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
