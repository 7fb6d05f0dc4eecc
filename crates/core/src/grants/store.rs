use async_trait::async_trait;

use crate::domain::access::DocumentAccessLog;
use crate::domain::document_request::{
    DocumentLimit, DocumentRequest, DocumentRequestId, RequestStatus,
};
use crate::domain::property::{PropertyId, PropertySummary};
use crate::domain::UserId;
use crate::errors::StoreError;

/// Result of the store's conditional download increment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The counter was incremented; carries the limit after the increment.
    Recorded(DocumentLimit),
    /// No unit was left; nothing was written.
    Exhausted(DocumentLimit),
    UnknownDocument,
}

/// Persistence for document requests, their limits and the download log.
///
/// `commit_decision` and `record_download` are the two mutations that must be
/// atomic against concurrent callers.
#[async_trait]
pub trait GrantStore: Send + Sync {
    async fn insert(&self, request: &DocumentRequest) -> Result<(), StoreError>;

    async fn find_by_id(
        &self,
        id: &DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, StoreError>;

    /// Every request for the pair, newest first.
    async fn list_for_pair(
        &self,
        property_id: &PropertyId,
        buyer_id: &UserId,
    ) -> Result<Vec<DocumentRequest>, StoreError>;

    async fn list_for_buyer(
        &self,
        buyer_id: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, StoreError>;

    async fn list_for_seller(
        &self,
        seller_id: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, StoreError>;

    /// Persists a decided request only if the stored copy is still pending.
    /// Returns `false` when another decision won.
    async fn commit_decision(&self, decided: &DocumentRequest) -> Result<bool, StoreError>;

    /// Increments `download_count` only while it is below `max_downloads`, and
    /// appends `log` in the same unit of work.
    async fn record_download(
        &self,
        request_id: &DocumentRequestId,
        document_index: u32,
        log: &DocumentAccessLog,
    ) -> Result<DownloadOutcome, StoreError>;
}

/// Read-only view of the property catalog owned by the listing service.
#[async_trait]
pub trait PropertyDirectory: Send + Sync {
    async fn find_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Option<PropertySummary>, StoreError>;
}
