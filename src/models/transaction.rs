use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::TransactionStatus;

/// A rental or an order linking one requester to one item.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub item_id: i64,
    pub requester_id: i64,
    pub status: TransactionStatus,
    pub quantity: i32,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenTransaction {
    pub requester_id: i64,
    pub item_id: i64,
    pub quantity: i32,
}

/// How an ongoing transaction ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    Complete,
    Cancel,
}

impl Closure {
    pub fn target(&self) -> TransactionStatus {
        match self {
            Closure::Complete => TransactionStatus::Completed,
            Closure::Cancel => TransactionStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub status: Option<TransactionStatus>,
    pub requester_id: Option<i64>,
    pub item_id: Option<i64>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &TransactionRecord) -> bool {
        self.status.map_or(true, |s| tx.status == s)
            && self.requester_id.map_or(true, |id| tx.requester_id == id)
            && self.item_id.map_or(true, |id| tx.item_id == id)
    }
}
