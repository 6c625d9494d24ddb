//! Business logic. Services own an `Arc<DatabaseConnection>` and return
//! `Result<_, ServiceError>`; handlers stay thin.

pub mod cart;
pub mod coupons;
pub mod order_status;
pub mod orders;
pub mod payments;
pub mod reconciliation;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Who is calling a service operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: false,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_admin: true,
        }
    }

    /// Owners and admins may read a resource.
    pub fn can_access(&self, owner: Uuid) -> bool {
        self.is_admin || self.user_id == owner
    }
}

/// Pagination parameters shared by list operations.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u64,
    pub limit: u64,
}

impl Page {
    pub const MAX_LIMIT: u64 = 100;

    /// The page is capped so the row offset always fits an `i64`.
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        let limit = limit.unwrap_or(20).clamp(1, Self::MAX_LIMIT);
        let last_page = i64::MAX as u64 / limit;
        Self {
            page: page.unwrap_or(1).clamp(1, last_page),
            limit,
        }
    }

    /// Zero-based page index for sea-orm paginators.
    pub fn index(&self) -> u64 {
        self.page - 1
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results plus the total count.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}
