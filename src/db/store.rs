use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{
    Closure, InvariantViolation, ItemFilter, ItemRecord, ItemStatus, NewItem, NewRequester,
    OpenTransaction, Page, RequesterRecord, TransactionFilter, TransactionRecord,
};

/// Persistence for items, requesters and their transactions.
///
/// Every mutating method is atomic. Implementations lock the requester
/// and item before they evaluate the rules in `services::workflow`, so
/// two concurrent opens on one item cannot both see it as available.
#[async_trait]
pub trait RentalStore: Send + Sync {
    async fn create_item(&self, item: NewItem) -> AppResult<ItemRecord>;

    async fn get_item(&self, id: i64) -> AppResult<ItemRecord>;

    /// Administrative override; see `workflow::check_force_status`.
    async fn set_item_status(&self, id: i64, status: ItemStatus) -> AppResult<ItemRecord>;

    async fn list_items(&self, filter: &ItemFilter, page: Page) -> AppResult<Vec<ItemRecord>>;

    async fn create_requester(&self, requester: NewRequester) -> AppResult<RequesterRecord>;

    async fn get_requester(&self, id: i64) -> AppResult<RequesterRecord>;

    async fn set_requester_active(&self, id: i64, active: bool) -> AppResult<RequesterRecord>;

    async fn set_requester_delinquent(
        &self,
        id: i64,
        delinquent: bool,
    ) -> AppResult<RequesterRecord>;

    async fn list_requesters(
        &self,
        name: Option<&str>,
        page: Page,
    ) -> AppResult<Vec<RequesterRecord>>;

    async fn open_transaction(&self, open: OpenTransaction) -> AppResult<TransactionRecord>;

    /// Completes or cancels. Repeating the same closure is a no-op.
    async fn close_transaction(&self, id: i64, closure: Closure) -> AppResult<TransactionRecord>;

    async fn reopen_transaction(&self, id: i64) -> AppResult<TransactionRecord>;

    async fn get_transaction(&self, id: i64) -> AppResult<TransactionRecord>;

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: Page,
    ) -> AppResult<Vec<TransactionRecord>>;

    /// Items whose status disagrees with their ongoing transactions.
    async fn audit_items(&self) -> AppResult<Vec<InvariantViolation>>;
}
