//! Raw list queries as they arrive from callers. Status text is normalized
//! here and nowhere else.

use serde::Deserialize;

use super::{parse_optional, ItemFilter, Page, TransactionFilter};
use crate::error::AppResult;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionQuery {
    #[serde(default, alias = "estado")]
    pub status: Option<String>,
    #[serde(default)]
    pub requester_id: Option<i64>,
    #[serde(default)]
    pub item_id: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl TransactionQuery {
    pub fn filter(&self) -> AppResult<TransactionFilter> {
        Ok(TransactionFilter {
            status: parse_optional(self.status.as_deref())?,
            requester_id: self.requester_id,
            item_id: self.item_id,
        })
    }

    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemQuery {
    #[serde(default, alias = "estado")]
    pub status: Option<String>,
    #[serde(default, alias = "model", alias = "modelo")]
    pub name: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl ItemQuery {
    pub fn filter(&self) -> AppResult<ItemFilter> {
        Ok(ItemFilter {
            status: parse_optional(self.status.as_deref())?,
            name: self
                .name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }

    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequesterQuery {
    #[serde(default, alias = "username")]
    pub name: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl RequesterQuery {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn page(&self) -> Page {
        Page::new(self.limit, self.offset)
    }
}
