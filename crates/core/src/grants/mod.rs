//! Document-access grant workflow.
//!
//! A buyer opens a request against a property, the owning seller approves or
//! rejects it exactly once, and an approved request becomes a grant that
//! expires `expiry_days` after approval and caps downloads per document.
//!
//! ```text
//! pending --approve(expiry_days)--> approved --downloads--> approved
//! pending --reject(reason)--------> rejected
//!
//! Expired and exhausted are derived at query time, never stored.
//! ```

pub mod memory;
pub mod policy;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::clock::{Clock, SystemClock};
use crate::domain::access::{AccessLookup, AccessSnapshot, DocumentAccessLog, DownloadResult};
use crate::domain::document_request::{
    ApprovalError, DocumentRequest, DocumentRequestId, GrantState, RequestStatus,
};
use crate::domain::property::{PropertyId, PropertySummary};
use crate::domain::UserId;
use crate::errors::AccessError;
use crate::session::Session;
use crate::tickets::{TicketError, TicketSigner};

pub use memory::{InMemoryGrantStore, InMemoryPropertyDirectory};
pub use policy::GrantPolicy;
pub use store::{DownloadOutcome, GrantStore, PropertyDirectory};

/// A seller's answer to a pending request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Approve { expiry_days: Option<u32> },
    Reject { reason: Option<String> },
}

impl Decision {
    fn label(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
        }
    }
}

#[derive(Clone)]
pub struct AccessGrantWorkflow {
    store: Arc<dyn GrantStore>,
    properties: Arc<dyn PropertyDirectory>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
    tickets: TicketSigner,
    policy: GrantPolicy,
}

impl AccessGrantWorkflow {
    pub fn new(
        store: Arc<dyn GrantStore>,
        properties: Arc<dyn PropertyDirectory>,
        tickets: TicketSigner,
    ) -> Self {
        Self {
            store,
            properties,
            clock: Arc::new(SystemClock),
            audit: Arc::new(TracingAuditSink),
            tickets,
            policy: GrantPolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_policy(mut self, policy: GrantPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &GrantPolicy {
        &self.policy
    }

    /// Opens a pending request for the session's buyer.
    pub async fn create(
        &self,
        session: &Session,
        property_id: &PropertyId,
        message: Option<String>,
    ) -> Result<DocumentRequest, AccessError> {
        let result = self.create_request(session, property_id, message).await;
        self.finish(session, "grant.request.create", AuditCategory::Request, None, result)
    }

    async fn create_request(
        &self,
        session: &Session,
        property_id: &PropertyId,
        message: Option<String>,
    ) -> Result<DocumentRequest, AccessError> {
        let buyer_id = session.require_buyer()?.clone();
        let property = self.require_property(property_id).await?;
        let now = self.clock.now();

        if self.policy.reuse_open_requests {
            let existing = self.store.list_for_pair(property_id, &buyer_id).await?;
            let open = existing.into_iter().find(|request| {
                matches!(request.grant_state(now), GrantState::Pending | GrantState::Active)
            });
            if let Some(open) = open {
                info!(
                    event_name = "grant.request.reused",
                    correlation_id = %session.correlation_id,
                    request_id = %open.id,
                    property_id = %property_id,
                    status = open.status.as_str(),
                    "buyer already holds an open request for this property"
                );
                return Ok(open);
            }
        }

        let request =
            DocumentRequest::new_pending(property.id, buyer_id, property.seller_id, message, now);
        self.store.insert(&request).await?;

        self.emit(
            session,
            Some(&request.id),
            "grant.request.created",
            AuditCategory::Request,
            AuditOutcome::Success,
            &[("property_id", request.property_id.0.clone())],
        );
        info!(
            event_name = "grant.request.created",
            correlation_id = %session.correlation_id,
            request_id = %request.id,
            property_id = %request.property_id,
            "document access request created"
        );
        Ok(request)
    }

    /// Applies the owning seller's decision. Succeeds at most once per request.
    pub async fn decide(
        &self,
        session: &Session,
        request_id: &DocumentRequestId,
        decision: Decision,
    ) -> Result<DocumentRequest, AccessError> {
        let result = self.decide_request(session, request_id, decision).await;
        self.finish(session, "grant.decision", AuditCategory::Decision, Some(request_id), result)
    }

    async fn decide_request(
        &self,
        session: &Session,
        request_id: &DocumentRequestId,
        decision: Decision,
    ) -> Result<DocumentRequest, AccessError> {
        let seller_id = session.require_seller()?;
        let mut request = self
            .store
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| AccessError::not_found("document request", &request_id.0))?;
        let property = self.require_property(&request.property_id).await?;

        if &property.seller_id != seller_id {
            return Err(AccessError::Forbidden(format!(
                "property `{}` is not owned by the caller",
                property.id
            )));
        }
        if request.status.is_terminal() {
            return Err(AccessError::InvalidState { status: request.status });
        }

        let now = self.clock.now();
        let label = decision.label();
        match decision {
            Decision::Approve { expiry_days } => {
                let days = self.policy.resolve_expiry_days(expiry_days)?;
                request
                    .approve(
                        days,
                        property.document_indices(),
                        self.policy.max_downloads_per_document,
                        now,
                    )
                    .map_err(|error| match error {
                        ApprovalError::NotPending(status) => AccessError::InvalidState { status },
                        ApprovalError::ExpiryOutOfRange(days) => AccessError::Validation(format!(
                            "expiry_days {days} puts access_expires_on out of range"
                        )),
                    })?;
            }
            Decision::Reject { reason } => {
                let reason = reason
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .ok_or_else(|| {
                        AccessError::Validation("rejection_reason is required".to_string())
                    })?;
                request.reject(reason, now).map_err(|status| AccessError::InvalidState { status })?;
            }
        }

        if !self.store.commit_decision(&request).await? {
            let status = self
                .store
                .find_by_id(request_id)
                .await?
                .map(|current| current.status)
                .unwrap_or(request.status);
            return Err(AccessError::InvalidState { status });
        }

        let mut metadata = vec![("decision", label.to_string())];
        if let Some(expires_on) = request.access_expires_on {
            metadata.push(("access_expires_on", expires_on.to_rfc3339()));
            metadata.push(("documents", request.document_limits.len().to_string()));
        }
        self.emit(
            session,
            Some(&request.id),
            "grant.decision.applied",
            AuditCategory::Decision,
            AuditOutcome::Success,
            &metadata,
        );
        info!(
            event_name = "grant.decision.applied",
            correlation_id = %session.correlation_id,
            request_id = %request.id,
            decision = label,
            status = request.status.as_str(),
            "document access request decided"
        );
        Ok(request)
    }

    /// Reports whether a grant currently authorizes access. Missing, pending,
    /// rejected and expired grants all yield `has_access = false`.
    pub async fn check_access(&self, lookup: &AccessLookup) -> Result<AccessSnapshot, AccessError> {
        let now = self.clock.now();
        let request = match lookup {
            AccessLookup::Request(request_id) => self.store.find_by_id(request_id).await?,
            AccessLookup::PropertyBuyer { property_id, buyer_id } => {
                let candidates = self.store.list_for_pair(property_id, buyer_id).await?;
                pick_for_access(candidates, now)
            }
        };

        Ok(match request {
            Some(request) => AccessSnapshot::of(&request, now),
            None => match lookup {
                AccessLookup::Request(_) => AccessSnapshot::not_requested(None, None),
                AccessLookup::PropertyBuyer { property_id, buyer_id } => {
                    AccessSnapshot::not_requested(Some(property_id.clone()), Some(buyer_id.clone()))
                }
            },
        })
    }

    /// Consumes one download unit for the session's buyer. Not retry-safe:
    /// every success counts.
    pub async fn record_download(
        &self,
        session: &Session,
        request_id: &DocumentRequestId,
        document_index: u32,
    ) -> Result<DownloadResult, AccessError> {
        let result = self.consume_download(session, request_id, document_index).await;
        self.finish(session, "grant.download", AuditCategory::Download, Some(request_id), result)
    }

    async fn consume_download(
        &self,
        session: &Session,
        request_id: &DocumentRequestId,
        document_index: u32,
    ) -> Result<DownloadResult, AccessError> {
        let buyer_id = session.require_buyer()?;
        let request = self
            .store
            .find_by_id(request_id)
            .await?
            .filter(|request| &request.buyer_id == buyer_id)
            .ok_or_else(|| AccessError::AccessDenied("no document access grant".to_string()))?;

        let now = self.clock.now();
        match request.grant_state(now) {
            GrantState::Active => {}
            GrantState::Expired => {
                return Err(AccessError::AccessDenied("document access has expired".to_string()))
            }
            GrantState::Pending | GrantState::Rejected => {
                return Err(AccessError::AccessDenied(format!(
                    "request is {}, not approved",
                    request.status.as_str()
                )))
            }
        }

        let limit = request.limit_for(document_index).ok_or_else(|| {
            AccessError::not_found("document", format!("{request_id}/{document_index}"))
        })?;
        if limit.is_exhausted() {
            return Err(AccessError::LimitExceeded {
                request_id: request_id.clone(),
                document_index,
            });
        }

        let log = DocumentAccessLog::new(
            &request,
            document_index,
            now,
            session.client.ip.clone(),
            session.client.user_agent.clone(),
        );
        let limit = match self.store.record_download(request_id, document_index, &log).await? {
            DownloadOutcome::Recorded(limit) => limit,
            DownloadOutcome::Exhausted(_) => {
                return Err(AccessError::LimitExceeded {
                    request_id: request_id.clone(),
                    document_index,
                })
            }
            DownloadOutcome::UnknownDocument => {
                return Err(AccessError::not_found(
                    "document",
                    format!("{request_id}/{document_index}"),
                ))
            }
        };

        let ticket = self.tickets.issue(request_id, document_index, buyer_id, now);
        let remaining = limit.remaining_downloads();
        self.emit(
            session,
            Some(request_id),
            "grant.download.recorded",
            AuditCategory::Download,
            AuditOutcome::Success,
            &[
                ("document_index", document_index.to_string()),
                ("remaining_downloads", remaining.to_string()),
            ],
        );
        info!(
            event_name = "grant.download.recorded",
            correlation_id = %session.correlation_id,
            request_id = %request_id,
            document_index,
            remaining_downloads = remaining,
            "document download recorded"
        );

        Ok(DownloadResult {
            request_id: request_id.clone(),
            document_index,
            download_count: limit.download_count,
            max_downloads: limit.max_downloads,
            remaining_downloads: remaining,
            ticket,
        })
    }

    pub async fn list_for_buyer(
        &self,
        session: &Session,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, AccessError> {
        let buyer_id = session.require_buyer()?;
        Ok(self.store.list_for_buyer(buyer_id, status).await?)
    }

    pub async fn list_for_seller(
        &self,
        session: &Session,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, AccessError> {
        let seller_id = session.require_seller()?;
        Ok(self.store.list_for_seller(seller_id, status).await?)
    }

    /// Checks a ticket handed out by `record_download` against the shared clock.
    pub fn verify_ticket(
        &self,
        token: &str,
        request_id: &DocumentRequestId,
        document_index: u32,
        buyer_id: &UserId,
    ) -> Result<DateTime<Utc>, TicketError> {
        self.tickets.verify(token, request_id, document_index, buyer_id, self.clock.now())
    }

    async fn require_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<PropertySummary, AccessError> {
        self.properties
            .find_property(property_id)
            .await?
            .ok_or_else(|| AccessError::not_found("property", &property_id.0))
    }

    fn finish<T>(
        &self,
        session: &Session,
        event_type: &str,
        category: AuditCategory,
        request_id: Option<&DocumentRequestId>,
        result: Result<T, AccessError>,
    ) -> Result<T, AccessError> {
        if let Err(error) = &result {
            let outcome = match error {
                AccessError::Store(_) => AuditOutcome::Failed,
                _ => AuditOutcome::Rejected,
            };
            self.emit(
                session,
                request_id,
                &format!("{event_type}.refused"),
                category,
                outcome,
                &[("error_code", error.code().to_string()), ("error", error.to_string())],
            );
            warn!(
                event_name = %format!("{event_type}.refused"),
                correlation_id = %session.correlation_id,
                request_id = request_id.map(|id| id.0.as_str()).unwrap_or("unknown"),
                error_code = error.code(),
                error = %error,
                "grant operation refused"
            );
        }
        result
    }

    fn emit(
        &self,
        session: &Session,
        request_id: Option<&DocumentRequestId>,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: &[(&str, String)],
    ) {
        let event = metadata.iter().fold(
            AuditEvent::new(
                request_id.cloned(),
                session.correlation_id.clone(),
                event_type,
                category,
                session.actor(),
                outcome,
                self.clock.now(),
            ),
            |event, (key, value)| event.with_metadata(*key, value.clone()),
        );
        self.audit.emit(event);
    }
}

/// An active grant wins, then the newest approved request, then the newest of any status.
fn pick_for_access(
    candidates: Vec<DocumentRequest>,
    now: DateTime<Utc>,
) -> Option<DocumentRequest> {
    if let Some(active) = candidates.iter().find(|request| request.has_access(now)) {
        return Some(active.clone());
    }
    if let Some(approved) =
        candidates.iter().find(|request| request.status == RequestStatus::Approved)
    {
        return Some(approved.clone());
    }
    candidates.into_iter().next()
}

