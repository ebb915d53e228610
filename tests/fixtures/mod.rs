// Shared setup for integration tests
#![allow(dead_code)]

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use fieldquote::model::{CustomerRef, TenantId, WorkItemId};
use fieldquote::pricing::{Catalog, CatalogEntry, InMemoryCatalogs};
use fieldquote::service::ProposalInput;
use fieldquote::store::{InMemoryStore, WorkItemStore};
use fieldquote::{Actor, Money, NewWorkItem, QuoteService, Status, TransitionRequest};

pub const REPLY: &str = r#"Here is the updated quote:
{"line_items": [
  {"name": "Water Heater", "quantity": 1, "unit_price": 1200.00},
  {"name": "Labor", "quantity": 2, "unit_price": 150.00}
]}"#;

/// Everything from `sent` up to `in_progress`.
pub const TO_IN_PROGRESS: [Status; 4] = [
    Status::Sent,
    Status::Accepted,
    Status::Scheduled,
    Status::InProgress,
];

pub fn catalog() -> Catalog {
    Catalog::with_entries([
        CatalogEntry::new("Water Heater", Money::from_cents(120_000)),
        CatalogEntry::new("Pipe Replacement", Money::from_cents(30_000)),
        CatalogEntry::new("Labor", Money::from_cents(15_000)),
    ])
}

pub struct Harness {
    pub service: Arc<QuoteService>,
    /// Backing store, for tenant-wide assertions.
    pub store: Arc<InMemoryStore>,
    pub tenant: TenantId,
}

impl Harness {
    pub async fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::with_store(store.clone(), store).await
    }

    /// Serve through `front`, which is expected to persist into `store`.
    pub async fn with_store(store: Arc<InMemoryStore>, front: Arc<dyn WorkItemStore>) -> Self {
        let tenant = Uuid::new_v4();
        let catalogs = Arc::new(InMemoryCatalogs::new());
        catalogs.set(tenant, catalog()).await;
        let service = Arc::new(QuoteService::new(front, catalogs));
        Self {
            service,
            store,
            tenant,
        }
    }

    pub async fn lead(&self) -> WorkItemId {
        self.service
            .create_work_item(
                NewWorkItem::lead(self.tenant, CustomerRef::named("Dana Ortiz")),
                Actor::System,
            )
            .await
            .expect("lead is created")
            .id
    }

    /// A draft quote holding the two items in [`REPLY`].
    pub async fn priced_quote(&self, lead_id: Option<WorkItemId>) -> WorkItemId {
        let mut input = NewWorkItem::quote(self.tenant, CustomerRef::named("Dana Ortiz"));
        if let Some(lead_id) = lead_id {
            input = input.from_lead(lead_id);
        }
        let quote = self
            .service
            .create_work_item(input, Actor::System)
            .await
            .expect("quote is created");
        self.service
            .reconcile_and_save(
                quote.id,
                ProposalInput::ModelText(REPLY.to_string()),
                None,
                Actor::System,
            )
            .await
            .expect("proposal is accepted");
        quote.id
    }

    pub async fn advance(&self, id: WorkItemId, targets: &[Status]) {
        for target in targets {
            self.service
                .transition(id, request_for(*target), Actor::System)
                .await
                .unwrap_or_else(|e| panic!("transition to {target} failed: {e}"));
        }
    }
}

pub fn request_for(target: Status) -> TransitionRequest {
    match target {
        Status::Scheduled => TransitionRequest::schedule(Utc::now() + Duration::days(3)),
        Status::Archived => TransitionRequest::archive("customer went quiet"),
        other => TransitionRequest::to(other),
    }
}
