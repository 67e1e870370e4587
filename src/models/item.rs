use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ItemStatus;

/// A rentable unit (car) or a stocked product.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: i64,
    pub name: String,
    pub status: ItemStatus,
    pub owner_id: Option<i64>,
    /// `None` for single units; `Some(n)` for stocked products.
    pub stock: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub owner_id: Option<i64>,
    pub stock: Option<i32>,
}

impl NewItem {
    pub fn unit(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn stocked(name: impl Into<String>, stock: i32) -> Self {
        Self {
            name: name.into(),
            stock: Some(stock),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub status: Option<ItemStatus>,
    /// Case-insensitive substring match on the name.
    pub name: Option<String>,
}

impl ItemFilter {
    pub fn matches(&self, item: &ItemRecord) -> bool {
        if let Some(status) = self.status {
            if item.status != status {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if !item.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// An item whose status disagrees with its ongoing transactions.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct InvariantViolation {
    pub item_id: i64,
    pub status: ItemStatus,
    pub ongoing: i64,
}

impl InvariantViolation {
    /// Returns a violation when `status` and the ongoing count disagree.
    pub fn check(item_id: i64, status: ItemStatus, ongoing: i64) -> Option<Self> {
        let reserved = status == ItemStatus::Reserved;
        if reserved != (ongoing > 0) || ongoing > 1 {
            Some(Self {
                item_id,
                status,
                ongoing,
            })
        } else {
            None
        }
    }
}
