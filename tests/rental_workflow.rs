use std::sync::Arc;

use chrono::Utc;
use rental_core::db::{MemoryRentalStore, RentalStore};
use rental_core::error::{Entity, Ineligibility, Precondition};
use rental_core::models::{
    ItemQuery, ItemRecord, ItemStatus, NewItem, NewRequester, RequesterQuery, TransactionQuery,
    TransactionStatus,
};
use rental_core::{AppError, ErrorBody, ErrorCode, RentalService};

type Service = RentalService<MemoryRentalStore>;

fn service() -> Service {
    RentalService::new(Arc::new(MemoryRentalStore::new()))
}

async fn requester(svc: &Service, name: &str) -> i64 {
    svc.create_requester(NewRequester::new(name)).await.unwrap().id
}

async fn car(svc: &Service, name: &str) -> i64 {
    svc.create_item(NewItem::unit(name)).await.unwrap().id
}

fn precondition(err: AppError) -> Precondition {
    err.precondition()
        .unwrap_or_else(|| panic!("expected a precondition failure, got {err:?}"))
}

#[tokio::test]
async fn open_then_close_walks_the_lifecycle() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let luis = requester(&svc, "luis").await;
    let item = car(&svc, "Corolla").await;

    let t1 = svc.open_transaction(ana, item).await.unwrap();
    assert_eq!(t1.status, TransactionStatus::Ongoing);
    assert_eq!(t1.closed_at, None);
    assert_eq!(svc.get_item(item).await.unwrap().status, ItemStatus::Reserved);

    let err = svc.open_transaction(luis, item).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::PreconditionFailed);
    assert_eq!(precondition(err), Precondition::ItemNotAvailable);

    let closed = svc.close_transaction(t1.id).await.unwrap();
    assert_eq!(closed.status, TransactionStatus::Completed);
    assert!(closed.closed_at.is_some());
    assert_eq!(svc.get_item(item).await.unwrap().status, ItemStatus::Available);

    // the item is free again
    let t2 = svc.open_transaction(luis, item).await.unwrap();
    assert_eq!(t2.requester_id, luis);
}

#[tokio::test]
async fn close_is_idempotent() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let item = car(&svc, "Civic").await;
    let t = svc.open_transaction(ana, item).await.unwrap();

    let first = svc.close_transaction(t.id).await.unwrap();
    let second = svc.close_transaction(t.id).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(svc.get_item(item).await.unwrap().status, ItemStatus::Available);
}

#[tokio::test]
async fn closed_transactions_do_not_cross_over() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let item = car(&svc, "Civic").await;

    let t = svc.open_transaction(ana, item).await.unwrap();
    svc.cancel_transaction(t.id).await.unwrap();
    assert_eq!(
        precondition(svc.close_transaction(t.id).await.unwrap_err()),
        Precondition::TransactionClosed
    );
    // cancelling twice is fine
    let again = svc.cancel_transaction(t.id).await.unwrap();
    assert_eq!(again.status, TransactionStatus::Cancelled);
}

#[tokio::test]
async fn blocked_requesters_cannot_open() {
    let svc = service();
    let moroso = requester(&svc, "moroso").await;
    let inactive = requester(&svc, "inactive").await;
    svc.set_requester_delinquent(moroso, true).await.unwrap();
    svc.set_requester_active(inactive, false).await.unwrap();

    let free = car(&svc, "free").await;
    let busy = car(&svc, "busy").await;
    let fixing = car(&svc, "fixing").await;
    let other = requester(&svc, "other").await;
    svc.open_transaction(other, busy).await.unwrap();
    svc.set_item_status(fixing, "mantenimiento").await.unwrap();

    for item in [free, busy, fixing] {
        assert_eq!(
            precondition(svc.open_transaction(moroso, item).await.unwrap_err()),
            Precondition::RequesterNotEligible(Ineligibility::Delinquent)
        );
        assert_eq!(
            precondition(svc.open_transaction(inactive, item).await.unwrap_err()),
            Precondition::RequesterNotEligible(Ineligibility::Inactive)
        );
    }
    assert_eq!(svc.get_item(free).await.unwrap().status, ItemStatus::Available);
}

#[tokio::test]
async fn missing_records_are_not_found() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let item = car(&svc, "Corolla").await;

    let err = svc.open_transaction(ana, 999).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(Entity::Item)));
    let err = svc.open_transaction(999, item).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(Entity::Requester)));
    let err = svc.close_transaction(42).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
    assert_eq!(err.reason(), "TRANSACTION_NOT_FOUND");
}

#[tokio::test]
async fn concurrent_opens_have_exactly_one_winner() {
    for _ in 0..20 {
        let svc = service();
        let a = requester(&svc, "a").await;
        let b = requester(&svc, "b").await;
        let item = car(&svc, "Hilux").await;

        let (svc_a, svc_b) = (svc.clone(), svc.clone());
        let first = tokio::spawn(async move { svc_a.open_transaction(a, item).await });
        let second = tokio::spawn(async move { svc_b.open_transaction(b, item).await });
        let results = [first.await.unwrap(), second.await.unwrap()];

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        let loser = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(precondition(loser), Precondition::ItemNotAvailable);

        let ongoing = svc
            .list_transactions(&TransactionQuery {
                status: Some("ongoing".into()),
                item_id: Some(item),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(ongoing.len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_concurrent_opens_keep_one_ongoing() {
    let svc = service();
    let item = car(&svc, "Yaris").await;
    let mut ids = Vec::new();
    for i in 0..16 {
        ids.push(requester(&svc, &format!("r{i}")).await);
    }

    let handles: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.open_transaction(id, item).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            Err(err) => assert_eq!(precondition(err), Precondition::ItemNotAvailable),
        }
    }
    assert_eq!(winners, 1);
    assert!(svc.audit().await.unwrap().is_empty());
}

#[tokio::test]
async fn stocked_items_reserve_and_restore_quantity() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let food = svc
        .create_item(NewItem::stocked("dog food", 5))
        .await
        .unwrap()
        .id;

    let err = svc
        .open_transaction_with_quantity(ana, food, 6)
        .await
        .unwrap_err();
    assert_eq!(precondition(err), Precondition::InsufficientStock);

    let order = svc.open_transaction_with_quantity(ana, food, 3).await.unwrap();
    assert_eq!(svc.get_item(food).await.unwrap().stock, Some(2));

    svc.cancel_transaction(order.id).await.unwrap();
    let item = svc.get_item(food).await.unwrap();
    assert_eq!(item.stock, Some(5));
    assert_eq!(item.status, ItemStatus::Available);

    let order = svc.open_transaction_with_quantity(ana, food, 2).await.unwrap();
    svc.close_transaction(order.id).await.unwrap();
    assert_eq!(svc.get_item(food).await.unwrap().stock, Some(3));

    let err = svc
        .open_transaction_with_quantity(ana, food, 0)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
}

#[tokio::test]
async fn reopening_a_stocked_order_takes_its_quantity_again() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let food = svc
        .create_item(NewItem::stocked("dog food", 5))
        .await
        .unwrap()
        .id;

    let order = svc.open_transaction_with_quantity(ana, food, 5).await.unwrap();
    svc.cancel_transaction(order.id).await.unwrap();
    assert_eq!(svc.get_item(food).await.unwrap().stock, Some(5));

    let reopened = svc.set_transaction_status(order.id, "en curso").await.unwrap();
    assert_eq!(reopened.status, TransactionStatus::Ongoing);
    let item = svc.get_item(food).await.unwrap();
    assert_eq!(item.stock, Some(0));
    assert_eq!(item.status, ItemStatus::Reserved);

    svc.cancel_transaction(order.id).await.unwrap();
    assert_eq!(svc.get_item(food).await.unwrap().stock, Some(5));

    let sold = svc.open_transaction_with_quantity(ana, food, 5).await.unwrap();
    svc.close_transaction(sold.id).await.unwrap();
    assert_eq!(svc.get_item(food).await.unwrap().stock, Some(0));

    let err = svc
        .set_transaction_status(sold.id, "ongoing")
        .await
        .unwrap_err();
    assert_eq!(precondition(err), Precondition::InsufficientStock);
    let item = svc.get_item(food).await.unwrap();
    assert_eq!(item.stock, Some(0));
    assert_eq!(item.status, ItemStatus::Available);
    assert_eq!(
        svc.get_transaction(sold.id).await.unwrap().status,
        TransactionStatus::Completed
    );
}

#[tokio::test]
async fn blocked_requesters_cannot_reopen() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let item = car(&svc, "Yaris").await;

    let t = svc.open_transaction(ana, item).await.unwrap();
    svc.close_transaction(t.id).await.unwrap();
    svc.set_requester_delinquent(ana, true).await.unwrap();

    let err = svc.set_transaction_status(t.id, "ongoing").await.unwrap_err();
    assert_eq!(
        precondition(err),
        Precondition::RequesterNotEligible(Ineligibility::Delinquent)
    );
    assert_eq!(svc.get_item(item).await.unwrap().status, ItemStatus::Available);

    svc.set_requester_delinquent(ana, false).await.unwrap();
    let reopened = svc.set_transaction_status(t.id, "ongoing").await.unwrap();
    assert_eq!(reopened.status, TransactionStatus::Ongoing);
    assert_eq!(reopened.closed_at, None);
    assert_eq!(svc.get_item(item).await.unwrap().status, ItemStatus::Reserved);
}

#[tokio::test]
async fn force_status_respects_open_transactions() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let item = car(&svc, "Sentra").await;

    let fixed = svc.set_item_status(item, "  MANTENIMIENTO ").await.unwrap();
    assert_eq!(fixed.status, ItemStatus::Maintenance);
    assert_eq!(
        precondition(svc.open_transaction(ana, item).await.unwrap_err()),
        Precondition::ItemNotAvailable
    );
    svc.set_item_status(item, "disponible").await.unwrap();

    let t = svc.open_transaction(ana, item).await.unwrap();
    assert_eq!(
        precondition(svc.set_item_status(item, "available").await.unwrap_err()),
        Precondition::ItemHasOpenTransaction
    );
    assert_eq!(
        precondition(svc.set_item_status(item, "disabled").await.unwrap_err()),
        Precondition::ItemHasOpenTransaction
    );

    svc.close_transaction(t.id).await.unwrap();
    assert_eq!(
        precondition(svc.set_item_status(item, "alquilado").await.unwrap_err()),
        Precondition::ReservedByWorkflowOnly
    );

    let err = svc.set_item_status(item, "lost").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStatus);
}

#[tokio::test]
async fn transaction_status_by_name() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let luis = requester(&svc, "luis").await;
    let item = car(&svc, "Rio").await;
    let t = svc.open_transaction(ana, item).await.unwrap();

    let done = svc.set_transaction_status(t.id, "Finalizado").await.unwrap();
    assert_eq!(done.status, TransactionStatus::Completed);

    let reopened = svc.set_transaction_status(t.id, "en curso").await.unwrap();
    assert_eq!(reopened.status, TransactionStatus::Ongoing);
    assert_eq!(reopened.closed_at, None);
    assert_eq!(svc.get_item(item).await.unwrap().status, ItemStatus::Reserved);

    svc.set_transaction_status(t.id, "cancelado").await.unwrap();
    let t2 = svc.open_transaction(luis, item).await.unwrap();
    assert_eq!(
        precondition(svc.set_transaction_status(t.id, "ongoing").await.unwrap_err()),
        Precondition::ItemNotAvailable
    );
    assert_eq!(svc.get_transaction(t2.id).await.unwrap().status, TransactionStatus::Ongoing);

    let err = svc.set_transaction_status(t.id, "paused").await.unwrap_err();
    assert!(matches!(err, AppError::InvalidStatus(ref s) if s == "paused"));
}

#[tokio::test]
async fn listing_filters_orders_and_clamps() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    let luis = requester(&svc, "luis").await;

    let mut items = Vec::new();
    for i in 0..510 {
        items.push(car(&svc, &format!("car-{i:03}")).await);
    }
    for &item in &items[..3] {
        svc.open_transaction(ana, item).await.unwrap();
    }
    let t = svc.open_transaction(luis, items[3]).await.unwrap();
    svc.close_transaction(t.id).await.unwrap();

    let all = svc
        .list_items(&ItemQuery {
            limit: Some(500_000),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 500);
    assert!(all.windows(2).all(|w| w[0].id < w[1].id));

    let default_page = svc.list_items(&ItemQuery::default()).await.unwrap();
    assert_eq!(default_page.len(), 100);

    let tail = svc
        .list_items(&ItemQuery {
            offset: Some(505),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(tail.len(), 5);

    let reserved = svc
        .list_items(&ItemQuery {
            status: Some("Alquilado".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        reserved.iter().map(|i| i.id).collect::<Vec<_>>(),
        items[..3].to_vec()
    );

    let by_name = svc
        .list_items(&ItemQuery {
            name: Some("CAR-50".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_name.len(), 10);

    let anas = svc
        .list_transactions(&TransactionQuery {
            requester_id: Some(ana),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(anas.len(), 3);

    let completed = svc
        .list_transactions(&TransactionQuery {
            status: Some("completado".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].requester_id, luis);

    let err = svc
        .list_transactions(&TransactionQuery {
            status: Some("whatever".into()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStatus);

    let people = svc
        .list_requesters(&RequesterQuery {
            name: Some("LU".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(people.len(), 1);
    assert_eq!(people[0].name, "luis");
}

#[tokio::test]
async fn audit_reports_inconsistent_items() {
    let store = Arc::new(MemoryRentalStore::new());
    let svc = RentalService::new(store.clone());
    let ana = requester(&svc, "ana").await;
    let ok = car(&svc, "ok").await;
    svc.open_transaction(ana, ok).await.unwrap();
    assert!(svc.audit().await.unwrap().is_empty());

    let now = Utc::now();
    store
        .import_item(ItemRecord {
            id: 50,
            name: "legacy".into(),
            status: ItemStatus::Reserved,
            owner_id: None,
            stock: None,
            created_at: now,
            updated_at: now,
        })
        .await;

    let violations = svc.audit().await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].item_id, 50);
    assert_eq!(violations[0].ongoing, 0);
    assert_eq!(store.get_item(50).await.unwrap().name, "legacy");
}

#[tokio::test]
async fn create_validates_input() {
    let svc = service();
    let err = svc.create_item(NewItem::unit("  ")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    let err = svc
        .create_item(NewItem::stocked("cat litter", -1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
    let err = svc.create_requester(NewRequester::new("")).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidInput);
}

#[tokio::test]
async fn errors_serialize_to_structured_bodies() {
    let svc = service();
    let ana = requester(&svc, "ana").await;
    svc.set_requester_delinquent(ana, true).await.unwrap();
    let item = car(&svc, "Corolla").await;

    let err = svc.open_transaction(ana, item).await.unwrap_err();
    let body = serde_json::to_value(ErrorBody::from(&err)).unwrap();
    assert_eq!(body["code"], "PRECONDITION_FAILED");
    assert_eq!(body["reason"], "REQUESTER_DELINQUENT");

    let t = serde_json::to_value(svc.get_item(item).await.unwrap()).unwrap();
    assert_eq!(t["status"], "available");
}
