// Per-tenant invoice numbering

mod fixtures;

use chrono::Utc;
use fieldquote::audit::{AuditAction, AuditDraft};
use fieldquote::error::ValidationError;
use fieldquote::model::CustomerRef;
use fieldquote::{
    Actor, CoreError, ErrorKind, InvoiceNumber, NewWorkItem, Status, TaxRate, TransitionRequest,
    WorkItem, WorkItemStore,
};
use fixtures::{Harness, TO_IN_PROGRESS};
use futures::future::join_all;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_completions_get_contiguous_numbers() {
    let harness = Harness::new().await;
    let mut ids = Vec::new();
    for _ in 0..50 {
        let id = harness.priced_quote(None).await;
        harness.advance(id, &TO_IN_PROGRESS).await;
        ids.push(id);
    }

    let handles = ids.iter().map(|id| {
        let service = harness.service.clone();
        let id = *id;
        tokio::spawn(async move {
            service
                .transition(id, TransitionRequest::to(Status::Completed), Actor::System)
                .await
        })
    });

    let mut numbers: Vec<u64> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| {
            let report = joined.unwrap().unwrap();
            report.work_item.invoice_number().unwrap().get()
        })
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (1..=50).collect::<Vec<_>>());
    assert_eq!(
        harness.store.last_invoice_number(harness.tenant).await,
        Some(InvoiceNumber::new(50))
    );
}

#[tokio::test]
async fn test_allocate_is_idempotent() {
    let harness = Harness::new().await;
    let id = harness.priced_quote(None).await;
    harness.advance(id, &TO_IN_PROGRESS).await;
    harness.advance(id, &[Status::Completed]).await;
    let history_len = harness.service.history(id).await.unwrap().len();

    let first = harness
        .service
        .allocate_invoice(harness.tenant, id, Actor::System)
        .await
        .unwrap();
    let second = harness
        .service
        .allocate_invoice(harness.tenant, id, Actor::System)
        .await
        .unwrap();
    assert_eq!(first, InvoiceNumber::new(1));
    assert_eq!(first, second);
    assert_eq!(harness.service.history(id).await.unwrap().len(), history_len);

    let item = harness.service.get(id).await.unwrap().work_item;
    let label = harness.service.invoice_label(&item).unwrap();
    assert!(label.starts_with("INV-"));
    assert!(label.ends_with("-0001"));
}

#[tokio::test]
async fn test_allocate_before_completion_is_rejected() {
    let harness = Harness::new().await;
    let id = harness.priced_quote(None).await;
    harness.advance(id, &[Status::Sent, Status::Accepted]).await;

    let err = harness
        .service
        .allocate_invoice(harness.tenant, id, Actor::System)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::InvoiceBeforeCompletion(Status::Accepted))
    ));
    assert_eq!(harness.store.last_invoice_number(harness.tenant).await, None);
}

#[tokio::test]
async fn test_other_tenant_cannot_allocate() {
    let harness = Harness::new().await;
    let id = harness.priced_quote(None).await;
    harness.advance(id, &TO_IN_PROGRESS).await;
    harness.advance(id, &[Status::Completed]).await;

    let err = harness
        .service
        .allocate_invoice(Uuid::new_v4(), id, Actor::System)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_tenants_number_independently() {
    let first = Harness::new().await;
    let second = Harness::new().await;
    for harness in [&first, &second] {
        let id = harness.priced_quote(None).await;
        harness.advance(id, &TO_IN_PROGRESS).await;
        harness.advance(id, &[Status::Completed]).await;
        let item = harness.service.get(id).await.unwrap().work_item;
        assert_eq!(item.invoice_number(), Some(InvoiceNumber::new(1)));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_allocate_on_one_item_agrees() {
    let harness = Harness::new().await;
    let id = harness.priced_quote(None).await;
    harness.advance(id, &TO_IN_PROGRESS).await;
    harness.advance(id, &[Status::Completed]).await;
    let history_len = harness.service.history(id).await.unwrap().len();

    let handles = (0..20).map(|_| {
        let service = harness.service.clone();
        let tenant = harness.tenant;
        tokio::spawn(async move { service.allocate_invoice(tenant, id, Actor::System).await })
    });
    for joined in join_all(handles).await {
        assert_eq!(joined.unwrap().unwrap(), InvoiceNumber::new(1));
    }
    assert_eq!(harness.service.history(id).await.unwrap().len(), history_len);
    assert_eq!(
        harness.store.last_invoice_number(harness.tenant).await,
        Some(InvoiceNumber::new(1))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_allocate_repairs_completed_item_without_number() {
    let harness = Harness::new().await;
    // Imported record that reached completion before numbering existed.
    let legacy = WorkItem::new(
        NewWorkItem::quote(harness.tenant, CustomerRef::named("Lee Park")).in_status(Status::Completed),
        TaxRate::ZERO,
        Utc::now(),
    )
    .unwrap();
    let id = legacy.id;
    harness
        .store
        .insert(
            legacy,
            AuditDraft::new(id, harness.tenant, AuditAction::Created, Actor::System, "Imported"),
        )
        .await
        .unwrap();
    assert_eq!(harness.service.get(id).await.unwrap().work_item.invoice_number(), None);

    let handles = (0..10).map(|_| {
        let service = harness.service.clone();
        let tenant = harness.tenant;
        tokio::spawn(async move { service.allocate_invoice(tenant, id, Actor::System).await })
    });
    for joined in join_all(handles).await {
        assert_eq!(joined.unwrap().unwrap(), InvoiceNumber::new(1));
    }

    let item = harness.service.get(id).await.unwrap().work_item;
    assert_eq!(item.invoice_number(), Some(InvoiceNumber::new(1)));
    let assigned = harness
        .service
        .history(id)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.action == AuditAction::InvoiceAssigned)
        .count();
    assert_eq!(assigned, 1);
}
