use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{IdentityError, LinkStatus, LinkStore};

#[derive(Debug, Clone)]
struct Entry {
    status: LinkStatus,
    code_hash: Option<String>,
    code_issued_at: Option<DateTime<Utc>>,
}

/// Process-local link store used in stub mode, without `DATABASE_URL`, and in tests.
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    links: RwLock<HashMap<String, Entry>>,
}

#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn status(&self, connection_id: &str) -> Result<LinkStatus, IdentityError> {
        let links = self.links.read().unwrap_or_else(|e| e.into_inner());
        Ok(links
            .get(connection_id)
            .map(|entry| entry.status.clone())
            .unwrap_or(LinkStatus::Unknown))
    }

    async fn mark_pending(
        &self,
        connection_id: &str,
        code_hash: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        if matches!(
            links.get(connection_id),
            Some(Entry {
                status: LinkStatus::Linked { .. },
                ..
            })
        ) {
            return Ok(());
        }
        links.insert(
            connection_id.to_string(),
            Entry {
                status: LinkStatus::Pending,
                code_hash: Some(code_hash.to_string()),
                code_issued_at: Some(issued_at),
            },
        );
        Ok(())
    }

    async fn link(&self, connection_id: &str, user_id: &str) -> Result<(), IdentityError> {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        links.insert(
            connection_id.to_string(),
            Entry {
                status: LinkStatus::Linked {
                    user_id: user_id.to_string(),
                },
                code_hash: None,
                code_issued_at: None,
            },
        );
        Ok(())
    }

    async fn complete(
        &self,
        connection_id: &str,
        code_hash: &str,
        user_id: &str,
        issued_after: DateTime<Utc>,
    ) -> Result<bool, IdentityError> {
        let mut links = self.links.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = links.get_mut(connection_id) else {
            return Ok(false);
        };
        let redeemable = entry.status == LinkStatus::Pending
            && entry.code_hash.as_deref() == Some(code_hash)
            && entry.code_issued_at.is_some_and(|at| at >= issued_after);
        if !redeemable {
            return Ok(false);
        }
        *entry = Entry {
            status: LinkStatus::Linked {
                user_id: user_id.to_string(),
            },
            code_hash: None,
            code_issued_at: None,
        };
        Ok(true)
    }
}
