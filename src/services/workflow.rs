//! Transition rules for the reservation state machine.
//!
//! `Available -> Ongoing -> {Completed, Cancelled}`
//!
//! These functions only inspect records that the caller has already
//! locked. Stores call them between the locked reads and the writes, so
//! every implementation enforces the same rules.

use crate::error::{AppError, AppResult, Ineligibility, Precondition};
use crate::models::{
    Closure, ItemRecord, ItemStatus, RequesterRecord, TransactionRecord, TransactionStatus,
};

/// Whether a transition writes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Unchanged,
    Apply,
}

pub fn check_quantity(quantity: i32) -> AppResult<()> {
    if quantity < 1 {
        return Err(AppError::InvalidInput(format!(
            "quantity must be at least 1, got {}",
            quantity
        )));
    }
    Ok(())
}

pub fn check_requester(requester: &RequesterRecord) -> AppResult<()> {
    if !requester.active {
        return Err(Precondition::RequesterNotEligible(Ineligibility::Inactive).into());
    }
    if requester.delinquent {
        return Err(Precondition::RequesterNotEligible(Ineligibility::Delinquent).into());
    }
    Ok(())
}

/// Requester eligibility is checked before anything about the item.
pub fn check_open(
    requester: &RequesterRecord,
    item: &ItemRecord,
    has_ongoing: bool,
    quantity: i32,
) -> AppResult<()> {
    check_quantity(quantity)?;
    check_requester(requester)?;
    if item.status != ItemStatus::Available || has_ongoing {
        return Err(Precondition::ItemNotAvailable.into());
    }
    if let Some(stock) = item.stock {
        if stock < quantity {
            return Err(Precondition::InsufficientStock.into());
        }
    }
    Ok(())
}

pub fn stock_after_open(item: &ItemRecord, quantity: i32) -> Option<i32> {
    item.stock.map(|stock| stock - quantity)
}

/// Closing into the state the transaction is already in is a no-op;
/// moving between the two closed states is rejected.
pub fn plan_close(tx: &TransactionRecord, closure: Closure) -> AppResult<Plan> {
    let target = closure.target();
    match tx.status {
        TransactionStatus::Ongoing => Ok(Plan::Apply),
        current if current == target => Ok(Plan::Unchanged),
        _ => Err(Precondition::TransactionClosed.into()),
    }
}

/// Only cancellation gives the reserved quantity back.
pub fn stock_after_close(item: &ItemRecord, tx: &TransactionRecord, closure: Closure) -> Option<i32> {
    match closure {
        Closure::Cancel => item.stock.map(|stock| stock + tx.quantity),
        Closure::Complete => item.stock,
    }
}

/// Puts a closed transaction back to ongoing. The requester must still be
/// eligible and the item must be free again with enough stock for the
/// original quantity.
pub fn plan_reopen(
    tx: &TransactionRecord,
    requester: &RequesterRecord,
    item: &ItemRecord,
    other_ongoing: bool,
) -> AppResult<Plan> {
    if tx.status == TransactionStatus::Ongoing {
        return Ok(Plan::Unchanged);
    }
    check_requester(requester)?;
    if item.status != ItemStatus::Available || other_ongoing {
        return Err(Precondition::ItemNotAvailable.into());
    }
    if let Some(stock) = item.stock {
        if stock < tx.quantity {
            return Err(Precondition::InsufficientStock.into());
        }
    }
    Ok(Plan::Apply)
}

/// Administrative override. `reserved` belongs to the workflow, and no
/// override may run while the item is out on a transaction.
pub fn check_force_status(has_ongoing: bool, target: ItemStatus) -> AppResult<()> {
    if target == ItemStatus::Reserved {
        return Err(Precondition::ReservedByWorkflowOnly.into());
    }
    if has_ongoing {
        return Err(Precondition::ItemHasOpenTransaction.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn requester(active: bool, delinquent: bool) -> RequesterRecord {
        RequesterRecord {
            id: 1,
            name: "ana".into(),
            active,
            delinquent,
            created_at: Utc::now(),
        }
    }

    fn item(status: ItemStatus, stock: Option<i32>) -> ItemRecord {
        let now = Utc::now();
        ItemRecord {
            id: 7,
            name: "Corolla".into(),
            status,
            owner_id: None,
            stock,
            created_at: now,
            updated_at: now,
        }
    }

    fn tx(status: TransactionStatus, quantity: i32) -> TransactionRecord {
        TransactionRecord {
            id: 3,
            item_id: 7,
            requester_id: 1,
            status,
            quantity,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    fn precondition(result: AppResult<impl std::fmt::Debug>) -> Precondition {
        result
            .unwrap_err()
            .precondition()
            .expect("expected a precondition failure")
    }

    #[test]
    fn test_open_happy_path() {
        let it = item(ItemStatus::Available, Some(5));
        assert!(check_open(&requester(true, false), &it, false, 2).is_ok());
        assert_eq!(stock_after_open(&it, 2), Some(3));
        assert_eq!(stock_after_open(&item(ItemStatus::Available, None), 1), None);
    }

    #[test]
    fn test_blocked_requester_fails_regardless_of_item() {
        for status in [
            ItemStatus::Available,
            ItemStatus::Reserved,
            ItemStatus::Maintenance,
            ItemStatus::Disabled,
        ] {
            let it = item(status, None);
            assert_eq!(
                precondition(check_open(&requester(true, true), &it, false, 1)),
                Precondition::RequesterNotEligible(Ineligibility::Delinquent)
            );
            assert_eq!(
                precondition(check_open(&requester(false, false), &it, true, 1)),
                Precondition::RequesterNotEligible(Ineligibility::Inactive)
            );
        }
    }

    #[test]
    fn test_open_rejects_unavailable_item() {
        let r = requester(true, false);
        assert_eq!(
            precondition(check_open(&r, &item(ItemStatus::Maintenance, None), false, 1)),
            Precondition::ItemNotAvailable
        );
        // status says available but a transaction is still open
        assert_eq!(
            precondition(check_open(&r, &item(ItemStatus::Available, None), true, 1)),
            Precondition::ItemNotAvailable
        );
        assert_eq!(
            precondition(check_open(&r, &item(ItemStatus::Available, Some(1)), false, 2)),
            Precondition::InsufficientStock
        );
    }

    #[test]
    fn test_open_rejects_non_positive_quantity() {
        let err = check_open(
            &requester(true, false),
            &item(ItemStatus::Available, Some(3)),
            false,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[test]
    fn test_close_plans() {
        assert_eq!(
            plan_close(&tx(TransactionStatus::Ongoing, 1), Closure::Complete).unwrap(),
            Plan::Apply
        );
        assert_eq!(
            plan_close(&tx(TransactionStatus::Completed, 1), Closure::Complete).unwrap(),
            Plan::Unchanged
        );
        assert_eq!(
            plan_close(&tx(TransactionStatus::Cancelled, 1), Closure::Cancel).unwrap(),
            Plan::Unchanged
        );
        assert_eq!(
            precondition(plan_close(&tx(TransactionStatus::Cancelled, 1), Closure::Complete)),
            Precondition::TransactionClosed
        );
        assert_eq!(
            precondition(plan_close(&tx(TransactionStatus::Completed, 1), Closure::Cancel)),
            Precondition::TransactionClosed
        );
    }

    #[test]
    fn test_only_cancel_restores_stock() {
        let it = item(ItemStatus::Reserved, Some(4));
        let t = tx(TransactionStatus::Ongoing, 2);
        assert_eq!(stock_after_close(&it, &t, Closure::Cancel), Some(6));
        assert_eq!(stock_after_close(&it, &t, Closure::Complete), Some(4));
    }

    #[test]
    fn test_reopen() {
        let ana = requester(true, false);
        let free = item(ItemStatus::Available, None);
        assert_eq!(
            plan_reopen(&tx(TransactionStatus::Completed, 1), &ana, &free, false).unwrap(),
            Plan::Apply
        );
        assert_eq!(
            plan_reopen(&tx(TransactionStatus::Ongoing, 1), &ana, &free, false).unwrap(),
            Plan::Unchanged
        );
        assert_eq!(
            precondition(plan_reopen(&tx(TransactionStatus::Cancelled, 1), &ana, &free, true)),
            Precondition::ItemNotAvailable
        );
    }

    #[test]
    fn test_reopen_needs_eligible_requester() {
        let free = item(ItemStatus::Available, None);
        let closed = tx(TransactionStatus::Completed, 1);
        assert_eq!(
            precondition(plan_reopen(&closed, &requester(true, true), &free, false)),
            Precondition::RequesterNotEligible(Ineligibility::Delinquent)
        );
        assert_eq!(
            precondition(plan_reopen(&closed, &requester(false, false), &free, false)),
            Precondition::RequesterNotEligible(Ineligibility::Inactive)
        );
    }

    #[test]
    fn test_reopen_needs_stock_for_quantity() {
        let ana = requester(true, false);
        let closed = tx(TransactionStatus::Cancelled, 3);
        assert_eq!(
            precondition(plan_reopen(&closed, &ana, &item(ItemStatus::Available, Some(2)), false)),
            Precondition::InsufficientStock
        );
        let shelf = item(ItemStatus::Available, Some(3));
        assert_eq!(plan_reopen(&closed, &ana, &shelf, false).unwrap(), Plan::Apply);
        assert_eq!(stock_after_open(&shelf, closed.quantity), Some(0));
    }

    #[test]
    fn test_force_status() {
        assert!(check_force_status(false, ItemStatus::Maintenance).is_ok());
        assert!(check_force_status(false, ItemStatus::Available).is_ok());
        assert_eq!(
            precondition(check_force_status(true, ItemStatus::Available)),
            Precondition::ItemHasOpenTransaction
        );
        assert_eq!(
            precondition(check_force_status(true, ItemStatus::Disabled)),
            Precondition::ItemHasOpenTransaction
        );
        assert_eq!(
            precondition(check_force_status(false, ItemStatus::Reserved)),
            Precondition::ReservedByWorkflowOnly
        );
    }
}
