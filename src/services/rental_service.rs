use std::sync::Arc;

use crate::db::RentalStore;
use crate::error::{AppError, AppResult};
use crate::models::{
    Closure, InvariantViolation, ItemQuery, ItemRecord, ItemStatus, NewItem, NewRequester,
    OpenTransaction, RequesterQuery, RequesterRecord, TransactionQuery, TransactionRecord,
    TransactionStatus,
};
use crate::services::workflow;

/// Collaborator-facing operations over a [`RentalStore`].
///
/// Raw status text is parsed here; pagination is clamped here. The store
/// is built once at startup and shared through the `Arc`.
pub struct RentalService<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for RentalService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

fn log_failure(op: &str, err: &AppError) {
    match err {
        AppError::Database(e) => tracing::error!("{} failed: {}", op, e),
        AppError::PreconditionFailed(_) => tracing::warn!("{} rejected: {}", op, err.reason()),
        _ => tracing::debug!("{} failed: {}", op, err),
    }
}

fn traced<T>(op: &str, result: AppResult<T>) -> AppResult<T> {
    if let Err(err) = &result {
        log_failure(op, err);
    }
    result
}

impl<S: RentalStore + ?Sized> RentalService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub async fn open_transaction(
        &self,
        requester_id: i64,
        item_id: i64,
    ) -> AppResult<TransactionRecord> {
        self.open_transaction_with_quantity(requester_id, item_id, 1)
            .await
    }

    /// Opens an order for `quantity` units of a stocked item. Units
    /// without stock ignore the count beyond recording it.
    pub async fn open_transaction_with_quantity(
        &self,
        requester_id: i64,
        item_id: i64,
        quantity: i32,
    ) -> AppResult<TransactionRecord> {
        workflow::check_quantity(quantity)?;
        let result = self
            .store
            .open_transaction(OpenTransaction {
                requester_id,
                item_id,
                quantity,
            })
            .await;

        let record = traced("open_transaction", result)?;
        tracing::info!(
            "Opened transaction {}: requester={}, item={}, quantity={}",
            record.id,
            requester_id,
            item_id,
            quantity
        );
        Ok(record)
    }

    /// Idempotent: closing a completed transaction returns it unchanged.
    pub async fn close_transaction(&self, id: i64) -> AppResult<TransactionRecord> {
        let result = self.store.close_transaction(id, Closure::Complete).await;
        let record = traced("close_transaction", result)?;
        tracing::info!("Transaction {} is {}", record.id, record.status);
        Ok(record)
    }

    pub async fn cancel_transaction(&self, id: i64) -> AppResult<TransactionRecord> {
        let result = self.store.close_transaction(id, Closure::Cancel).await;
        let record = traced("cancel_transaction", result)?;
        tracing::info!("Transaction {} is {}", record.id, record.status);
        Ok(record)
    }

    /// Moves a transaction to any state by name ("completado", "en curso", ...).
    pub async fn set_transaction_status(
        &self,
        id: i64,
        raw_status: &str,
    ) -> AppResult<TransactionRecord> {
        let target: TransactionStatus = traced("set_transaction_status", raw_status.parse())?;
        match target {
            TransactionStatus::Completed => self.close_transaction(id).await,
            TransactionStatus::Cancelled => self.cancel_transaction(id).await,
            TransactionStatus::Ongoing => {
                let result = self.store.reopen_transaction(id).await;
                let record = traced("reopen_transaction", result)?;
                tracing::info!("Transaction {} is {}", record.id, record.status);
                Ok(record)
            }
        }
    }

    pub async fn get_transaction(&self, id: i64) -> AppResult<TransactionRecord> {
        traced("get_transaction", self.store.get_transaction(id).await)
    }

    pub async fn list_transactions(
        &self,
        query: &TransactionQuery,
    ) -> AppResult<Vec<TransactionRecord>> {
        let filter = traced("list_transactions", query.filter())?;
        let page = query.page();
        tracing::debug!(
            "list_transactions: filter={:?}, limit={}, offset={}",
            filter,
            page.limit(),
            page.offset()
        );
        traced(
            "list_transactions",
            self.store.list_transactions(&filter, page).await,
        )
    }

    pub async fn create_item(&self, item: NewItem) -> AppResult<ItemRecord> {
        if item.name.trim().is_empty() {
            return Err(AppError::InvalidInput("name is required".into()));
        }
        if matches!(item.stock, Some(stock) if stock < 0) {
            return Err(AppError::InvalidInput("stock must not be negative".into()));
        }
        let record = traced("create_item", self.store.create_item(item).await)?;
        tracing::info!("Created item {} ({})", record.id, record.name);
        Ok(record)
    }

    pub async fn get_item(&self, id: i64) -> AppResult<ItemRecord> {
        traced("get_item", self.store.get_item(id).await)
    }

    /// Administrative override of an item's availability.
    pub async fn set_item_status(&self, item_id: i64, raw_status: &str) -> AppResult<ItemRecord> {
        let status: ItemStatus = traced("set_item_status", raw_status.parse())?;
        let result = self.store.set_item_status(item_id, status).await;
        let record = traced("set_item_status", result)?;
        tracing::info!("Item {} set to {}", record.id, record.status);
        Ok(record)
    }

    pub async fn list_items(&self, query: &ItemQuery) -> AppResult<Vec<ItemRecord>> {
        let filter = traced("list_items", query.filter())?;
        let page = query.page();
        tracing::debug!(
            "list_items: filter={:?}, limit={}, offset={}",
            filter,
            page.limit(),
            page.offset()
        );
        traced("list_items", self.store.list_items(&filter, page).await)
    }

    pub async fn create_requester(&self, requester: NewRequester) -> AppResult<RequesterRecord> {
        if requester.name.trim().is_empty() {
            return Err(AppError::InvalidInput("name is required".into()));
        }
        let record = traced("create_requester", self.store.create_requester(requester).await)?;
        tracing::info!("Created requester {} ({})", record.id, record.name);
        Ok(record)
    }

    pub async fn set_requester_active(&self, id: i64, active: bool) -> AppResult<RequesterRecord> {
        let record = traced(
            "set_requester_active",
            self.store.set_requester_active(id, active).await,
        )?;
        tracing::info!("Requester {} active={}", record.id, record.active);
        Ok(record)
    }

    pub async fn set_requester_delinquent(
        &self,
        id: i64,
        delinquent: bool,
    ) -> AppResult<RequesterRecord> {
        let record = traced(
            "set_requester_delinquent",
            self.store.set_requester_delinquent(id, delinquent).await,
        )?;
        tracing::info!("Requester {} delinquent={}", record.id, record.delinquent);
        Ok(record)
    }

    pub async fn list_requesters(&self, query: &RequesterQuery) -> AppResult<Vec<RequesterRecord>> {
        traced(
            "list_requesters",
            self.store.list_requesters(query.name(), query.page()).await,
        )
    }

    /// Reports every item whose status disagrees with its ongoing transactions.
    pub async fn audit(&self) -> AppResult<Vec<InvariantViolation>> {
        let violations = traced("audit", self.store.audit_items().await)?;
        for v in &violations {
            tracing::warn!(
                "Item {} is {} with {} ongoing transaction(s)",
                v.item_id,
                v.status,
                v.ongoing
            );
        }
        Ok(violations)
    }
}
