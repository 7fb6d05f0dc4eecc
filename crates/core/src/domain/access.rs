use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::document_request::{
    DocumentLimit, DocumentRequest, DocumentRequestId, GrantState, RequestStatus,
};
use crate::domain::property::PropertyId;
use crate::domain::UserId;
use crate::tickets::DownloadTicket;

/// How a caller identifies the grant it wants to inspect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessLookup {
    Request(DocumentRequestId),
    PropertyBuyer { property_id: PropertyId, buyer_id: UserId },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    Granted,
    Exhausted,
    Expired,
    Pending,
    Rejected,
    NotRequested,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLimitView {
    pub document_index: u32,
    pub max_downloads: u32,
    pub download_count: u32,
    pub remaining_downloads: u32,
}

impl From<&DocumentLimit> for DocumentLimitView {
    fn from(limit: &DocumentLimit) -> Self {
        Self {
            document_index: limit.document_index,
            max_downloads: limit.max_downloads,
            download_count: limit.download_count,
            remaining_downloads: limit.remaining_downloads(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSnapshot {
    pub request_id: Option<DocumentRequestId>,
    pub property_id: Option<PropertyId>,
    pub buyer_id: Option<UserId>,
    pub seller_id: Option<UserId>,
    pub status: Option<RequestStatus>,
    pub state: AccessState,
    pub has_access: bool,
    pub access_expires_on: Option<DateTime<Utc>>,
    pub document_limits: Vec<DocumentLimitView>,
}

impl AccessSnapshot {
    /// True when `user_id` is the buyer or the seller on the underlying request.
    pub fn involves(&self, user_id: &UserId) -> bool {
        self.buyer_id.as_ref() == Some(user_id) || self.seller_id.as_ref() == Some(user_id)
    }

    pub fn not_requested(property_id: Option<PropertyId>, buyer_id: Option<UserId>) -> Self {
        Self {
            request_id: None,
            property_id,
            buyer_id,
            seller_id: None,
            status: None,
            state: AccessState::NotRequested,
            has_access: false,
            access_expires_on: None,
            document_limits: Vec::new(),
        }
    }

    pub fn of(request: &DocumentRequest, now: DateTime<Utc>) -> Self {
        let state = match request.grant_state(now) {
            GrantState::Pending => AccessState::Pending,
            GrantState::Rejected => AccessState::Rejected,
            GrantState::Expired => AccessState::Expired,
            GrantState::Active if request.is_exhausted() => AccessState::Exhausted,
            GrantState::Active => AccessState::Granted,
        };

        Self {
            request_id: Some(request.id.clone()),
            property_id: Some(request.property_id.clone()),
            buyer_id: Some(request.buyer_id.clone()),
            seller_id: Some(request.seller_id.clone()),
            status: Some(request.status),
            state,
            has_access: request.has_access(now),
            access_expires_on: request.access_expires_on,
            document_limits: request.document_limits.iter().map(DocumentLimitView::from).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResult {
    pub request_id: DocumentRequestId,
    pub document_index: u32,
    pub download_count: u32,
    pub max_downloads: u32,
    pub remaining_downloads: u32,
    pub ticket: DownloadTicket,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAccessLog {
    pub id: String,
    pub request_id: DocumentRequestId,
    pub buyer_id: UserId,
    pub property_id: PropertyId,
    pub document_index: u32,
    pub downloaded_at: DateTime<Utc>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl DocumentAccessLog {
    pub fn new(
        request: &DocumentRequest,
        document_index: u32,
        downloaded_at: DateTime<Utc>,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            id: format!("DLOG-{}", Uuid::new_v4().simple()),
            request_id: request.id.clone(),
            buyer_id: request.buyer_id.clone(),
            property_id: request.property_id.clone(),
            document_index,
            downloaded_at,
            client_ip,
            user_agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{AccessSnapshot, AccessState};
    use crate::domain::document_request::DocumentRequest;
    use crate::domain::property::PropertyId;
    use crate::domain::UserId;

    fn approved() -> DocumentRequest {
        let approved_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut request = DocumentRequest::new_pending(
            PropertyId("P123".to_string()),
            UserId("buyer-1".to_string()),
            UserId("seller-1".to_string()),
            Some("please".to_string()),
            approved_at,
        );
        request.approve(7, [0, 1], 3, approved_at).expect("approve");
        request
    }

    #[test]
    fn expired_snapshot_keeps_limits_for_rendering() {
        let request = approved();
        let later = Utc.with_ymd_and_hms(2025, 1, 9, 0, 0, 0).unwrap();

        let snapshot = AccessSnapshot::of(&request, later);

        assert!(!snapshot.has_access);
        assert_eq!(snapshot.state, AccessState::Expired);
        assert_eq!(snapshot.document_limits.len(), 2);
        assert_eq!(snapshot.document_limits[0].remaining_downloads, 3);
    }

    #[test]
    fn exhausted_is_distinct_from_expired() {
        let mut request = approved();
        for limit in &mut request.document_limits {
            limit.download_count = limit.max_downloads;
        }
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(1);

        let snapshot = AccessSnapshot::of(&request, now);

        assert!(snapshot.has_access);
        assert_eq!(snapshot.state, AccessState::Exhausted);
        assert!(snapshot.document_limits.iter().all(|limit| limit.remaining_downloads == 0));
    }
}
