//! In-process store. A single async mutex plays the part of the row locks:
//! it is held across each check-then-write sequence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::db::store::RentalStore;
use crate::error::{AppError, AppResult, Entity};
use crate::models::{
    Closure, InvariantViolation, ItemFilter, ItemRecord, ItemStatus, NewItem, NewRequester,
    OpenTransaction, Page, RequesterRecord, TransactionFilter, TransactionRecord,
    TransactionStatus,
};
use crate::services::workflow::{self, Plan};

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<i64, ItemRecord>,
    requesters: BTreeMap<i64, RequesterRecord>,
    transactions: BTreeMap<i64, TransactionRecord>,
    item_seq: i64,
    requester_seq: i64,
    transaction_seq: i64,
}

impl MemoryState {
    fn item(&self, id: i64) -> AppResult<ItemRecord> {
        self.items
            .get(&id)
            .cloned()
            .ok_or(AppError::NotFound(Entity::Item))
    }

    fn requester(&self, id: i64) -> AppResult<RequesterRecord> {
        self.requesters
            .get(&id)
            .cloned()
            .ok_or(AppError::NotFound(Entity::Requester))
    }

    fn transaction(&self, id: i64) -> AppResult<TransactionRecord> {
        self.transactions
            .get(&id)
            .cloned()
            .ok_or(AppError::NotFound(Entity::Transaction))
    }

    fn ongoing_count(&self, item_id: i64, except: Option<i64>) -> i64 {
        self.transactions
            .values()
            .filter(|t| {
                t.item_id == item_id
                    && t.status == TransactionStatus::Ongoing
                    && Some(t.id) != except
            })
            .count() as i64
    }

    fn update_item(&mut self, id: i64, status: ItemStatus, stock: Option<i32>) -> AppResult<ItemRecord> {
        let item = self
            .items
            .get_mut(&id)
            .ok_or(AppError::NotFound(Entity::Item))?;
        item.status = status;
        item.stock = stock;
        item.updated_at = Utc::now();
        Ok(item.clone())
    }

    fn update_requester(
        &mut self,
        id: i64,
        f: impl FnOnce(&mut RequesterRecord),
    ) -> AppResult<RequesterRecord> {
        let requester = self
            .requesters
            .get_mut(&id)
            .ok_or(AppError::NotFound(Entity::Requester))?;
        f(requester);
        Ok(requester.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRentalStore {
    state: Mutex<MemoryState>,
}

impl MemoryRentalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a record as-is, bypassing the workflow. Used to load data
    /// carried over from elsewhere, which may not honour the invariant.
    pub async fn import_item(&self, record: ItemRecord) {
        let mut state = self.state.lock().await;
        state.item_seq = state.item_seq.max(record.id);
        state.items.insert(record.id, record);
    }
}

#[async_trait]
impl RentalStore for MemoryRentalStore {
    async fn create_item(&self, item: NewItem) -> AppResult<ItemRecord> {
        let mut state = self.state.lock().await;
        state.item_seq += 1;
        let now = Utc::now();
        let record = ItemRecord {
            id: state.item_seq,
            name: item.name,
            status: ItemStatus::Available,
            owner_id: item.owner_id,
            stock: item.stock,
            created_at: now,
            updated_at: now,
        };
        state.items.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_item(&self, id: i64) -> AppResult<ItemRecord> {
        self.state.lock().await.item(id)
    }

    async fn set_item_status(&self, id: i64, status: ItemStatus) -> AppResult<ItemRecord> {
        let mut state = self.state.lock().await;
        let item = state.item(id)?;
        workflow::check_force_status(state.ongoing_count(id, None) > 0, status)?;
        state.update_item(id, status, item.stock)
    }

    async fn list_items(&self, filter: &ItemFilter, page: Page) -> AppResult<Vec<ItemRecord>> {
        let state = self.state.lock().await;
        Ok(page.slice(state.items.values().filter(|i| filter.matches(i)).cloned()))
    }

    async fn create_requester(&self, requester: NewRequester) -> AppResult<RequesterRecord> {
        let mut state = self.state.lock().await;
        state.requester_seq += 1;
        let record = RequesterRecord {
            id: state.requester_seq,
            name: requester.name,
            active: requester.active,
            delinquent: requester.delinquent,
            created_at: Utc::now(),
        };
        state.requesters.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_requester(&self, id: i64) -> AppResult<RequesterRecord> {
        self.state.lock().await.requester(id)
    }

    async fn set_requester_active(&self, id: i64, active: bool) -> AppResult<RequesterRecord> {
        self.state
            .lock()
            .await
            .update_requester(id, |r| r.active = active)
    }

    async fn set_requester_delinquent(
        &self,
        id: i64,
        delinquent: bool,
    ) -> AppResult<RequesterRecord> {
        self.state
            .lock()
            .await
            .update_requester(id, |r| r.delinquent = delinquent)
    }

    async fn list_requesters(
        &self,
        name: Option<&str>,
        page: Page,
    ) -> AppResult<Vec<RequesterRecord>> {
        let state = self.state.lock().await;
        let needle = name.map(str::to_lowercase);
        Ok(page.slice(
            state
                .requesters
                .values()
                .filter(|r| {
                    needle
                        .as_deref()
                        .map_or(true, |n| r.name.to_lowercase().contains(n))
                })
                .cloned(),
        ))
    }

    async fn open_transaction(&self, open: OpenTransaction) -> AppResult<TransactionRecord> {
        let mut state = self.state.lock().await;
        let requester = state.requester(open.requester_id)?;
        let item = state.item(open.item_id)?;
        let has_ongoing = state.ongoing_count(item.id, None) > 0;
        workflow::check_open(&requester, &item, has_ongoing, open.quantity)?;

        state.transaction_seq += 1;
        let record = TransactionRecord {
            id: state.transaction_seq,
            item_id: item.id,
            requester_id: requester.id,
            status: TransactionStatus::Ongoing,
            quantity: open.quantity,
            opened_at: Utc::now(),
            closed_at: None,
        };
        state.transactions.insert(record.id, record.clone());
        state.update_item(
            item.id,
            ItemStatus::Reserved,
            workflow::stock_after_open(&item, open.quantity),
        )?;
        Ok(record)
    }

    async fn close_transaction(&self, id: i64, closure: Closure) -> AppResult<TransactionRecord> {
        let mut state = self.state.lock().await;
        let tx = state.transaction(id)?;
        if workflow::plan_close(&tx, closure)? == Plan::Unchanged {
            return Ok(tx);
        }
        let item = state.item(tx.item_id)?;

        let closed = TransactionRecord {
            status: closure.target(),
            closed_at: Some(tx.closed_at.unwrap_or_else(Utc::now)),
            ..tx.clone()
        };
        state.transactions.insert(id, closed.clone());
        state.update_item(
            item.id,
            ItemStatus::Available,
            workflow::stock_after_close(&item, &tx, closure),
        )?;
        Ok(closed)
    }

    async fn reopen_transaction(&self, id: i64) -> AppResult<TransactionRecord> {
        let mut state = self.state.lock().await;
        let tx = state.transaction(id)?;
        let requester = state.requester(tx.requester_id)?;
        let item = state.item(tx.item_id)?;
        let other_ongoing = state.ongoing_count(item.id, Some(id)) > 0;
        if workflow::plan_reopen(&tx, &requester, &item, other_ongoing)? == Plan::Unchanged {
            return Ok(tx);
        }

        let reopened = TransactionRecord {
            status: TransactionStatus::Ongoing,
            closed_at: None,
            ..tx
        };
        state.transactions.insert(id, reopened.clone());
        state.update_item(
            item.id,
            ItemStatus::Reserved,
            workflow::stock_after_open(&item, reopened.quantity),
        )?;
        Ok(reopened)
    }

    async fn get_transaction(&self, id: i64) -> AppResult<TransactionRecord> {
        self.state.lock().await.transaction(id)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> AppResult<Vec<TransactionRecord>> {
        let state = self.state.lock().await;
        Ok(page.slice(
            state
                .transactions
                .values()
                .filter(|t| filter.matches(t))
                .cloned(),
        ))
    }

    async fn audit_items(&self) -> AppResult<Vec<InvariantViolation>> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .values()
            .filter_map(|item| {
                InvariantViolation::check(item.id, item.status, state.ongoing_count(item.id, None))
            })
            .collect())
    }
}
