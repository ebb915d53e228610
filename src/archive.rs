// Archiving a lead together with the quotes made from it

use tracing::{info, warn, Instrument};

use crate::audit::Actor;
use crate::error::{CascadeFailure, CoreError, CoreResult, ValidationError};
use crate::lifecycle::TransitionRequest;
use crate::model::{RecordKind, Status, WorkItemId};
use crate::service::QuoteService;
use crate::telemetry::{generate_correlation_id, operation_span};

/// Propagates an archive from a lead to its dependent quotes.
///
/// Each record is archived through the normal transition path, so every one
/// gets its own audit entry. Already archived or paid dependents are left
/// alone, which makes a repeated call a no-op.
#[derive(Debug, Clone, Copy)]
pub struct ArchiveCascade<'a> {
    service: &'a QuoteService,
}

impl<'a> ArchiveCascade<'a> {
    pub fn new(service: &'a QuoteService) -> Self {
        Self { service }
    }

    /// Archive `lead_id` and its live dependents with `reason`. Returns the
    /// ids this call archived.
    pub async fn archive_lead(
        &self,
        lead_id: WorkItemId,
        reason: &str,
        actor: Actor,
    ) -> CoreResult<Vec<WorkItemId>> {
        let span = operation_span("archive_lead", None, Some(lead_id), &generate_correlation_id());
        async move {
            if reason.trim().is_empty() {
                return Err(ValidationError::InvalidField {
                    field: "reason",
                    reason: "must not be blank".to_string(),
                }
                .into());
            }

            let lead = self.service.get(lead_id).await?.work_item;
            if lead.kind != RecordKind::Lead {
                return Err(ValidationError::InvalidField {
                    field: "lead_id",
                    reason: format!("{lead_id} is not a lead"),
                }
                .into());
            }

            let mut archived = Vec::new();
            let report = self
                .service
                .transition(lead_id, TransitionRequest::archive(reason), actor)
                .await?;
            if report.applied() {
                archived.push(lead_id);
            }

            let dependents = self.service.store.dependents_of(lead_id).await?;
            let mut failed = Vec::new();
            for dependent in dependents
                .into_iter()
                .filter(|d| !matches!(d.status(), Status::Archived | Status::Paid))
            {
                match self
                    .service
                    .transition(dependent.id, TransitionRequest::archive(reason), actor)
                    .await
                {
                    Ok(report) if report.applied() => archived.push(dependent.id),
                    Ok(_) => {}
                    Err(error) => {
                        warn!(
                            lead.id = %lead_id,
                            work_item.id = %dependent.id,
                            error = %error,
                            "Failed to archive dependent"
                        );
                        failed.push(CascadeFailure {
                            id: dependent.id,
                            error: error.to_string(),
                        });
                    }
                }
            }

            if !failed.is_empty() {
                return Err(CoreError::PartialCascadeFailure { archived, failed });
            }

            info!(lead.id = %lead_id, archived = archived.len(), "Archive cascade finished");
            Ok(archived)
        }
        .instrument(span)
        .await
    }
}

impl QuoteService {
    /// See [`ArchiveCascade::archive_lead`].
    pub async fn archive_lead(
        &self,
        lead_id: WorkItemId,
        reason: &str,
        actor: Actor,
    ) -> CoreResult<Vec<WorkItemId>> {
        ArchiveCascade::new(self).archive_lead(lead_id, reason, actor).await
    }
}
