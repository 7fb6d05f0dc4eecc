use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::access::DocumentAccessLog;
use crate::domain::document_request::{DocumentRequest, DocumentRequestId, RequestStatus};
use crate::domain::property::{PropertyId, PropertySummary};
use crate::domain::UserId;
use crate::errors::StoreError;
use crate::grants::store::{DownloadOutcome, GrantStore, PropertyDirectory};

#[derive(Default)]
struct GrantState {
    requests: HashMap<String, DocumentRequest>,
    access_log: Vec<DocumentAccessLog>,
}

/// Process-local grant store. A single lock covers requests and the access
/// log, so check-and-increment is atomic.
#[derive(Default)]
pub struct InMemoryGrantStore {
    state: Mutex<GrantState>,
}

impl InMemoryGrantStore {
    fn lock(&self) -> MutexGuard<'_, GrantState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn access_log(&self) -> Vec<DocumentAccessLog> {
        self.lock().access_log.clone()
    }

    fn collect<F>(&self, keep: F) -> Vec<DocumentRequest>
    where
        F: Fn(&DocumentRequest) -> bool,
    {
        let state = self.lock();
        let mut matches: Vec<DocumentRequest> =
            state.requests.values().filter(|request| keep(request)).cloned().collect();
        newest_first(&mut matches);
        matches
    }
}

pub(crate) fn newest_first(requests: &mut [DocumentRequest]) {
    requests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.0.cmp(&a.id.0)));
}

#[async_trait]
impl GrantStore for InMemoryGrantStore {
    async fn insert(&self, request: &DocumentRequest) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.requests.contains_key(&request.id.0) {
            return Err(StoreError::Backend(format!("duplicate request id `{}`", request.id)));
        }
        state.requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, StoreError> {
        Ok(self.lock().requests.get(&id.0).cloned())
    }

    async fn list_for_pair(
        &self,
        property_id: &PropertyId,
        buyer_id: &UserId,
    ) -> Result<Vec<DocumentRequest>, StoreError> {
        Ok(self.collect(|request| {
            &request.property_id == property_id && &request.buyer_id == buyer_id
        }))
    }

    async fn list_for_buyer(
        &self,
        buyer_id: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, StoreError> {
        Ok(self.collect(|request| {
            &request.buyer_id == buyer_id && status.map_or(true, |s| request.status == s)
        }))
    }

    async fn list_for_seller(
        &self,
        seller_id: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, StoreError> {
        Ok(self.collect(|request| {
            &request.seller_id == seller_id && status.map_or(true, |s| request.status == s)
        }))
    }

    async fn commit_decision(&self, decided: &DocumentRequest) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.requests.get_mut(&decided.id.0) {
            Some(stored) if stored.status == RequestStatus::Pending => {
                *stored = decided.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Backend(format!("request `{}` vanished", decided.id))),
        }
    }

    async fn record_download(
        &self,
        request_id: &DocumentRequestId,
        document_index: u32,
        log: &DocumentAccessLog,
    ) -> Result<DownloadOutcome, StoreError> {
        let mut state = self.lock();
        let Some(request) = state.requests.get_mut(&request_id.0) else {
            return Ok(DownloadOutcome::UnknownDocument);
        };
        let Some(limit) =
            request.document_limits.iter_mut().find(|limit| limit.document_index == document_index)
        else {
            return Ok(DownloadOutcome::UnknownDocument);
        };

        if limit.download_count >= limit.max_downloads {
            return Ok(DownloadOutcome::Exhausted(limit.clone()));
        }

        limit.download_count += 1;
        limit.first_access_at.get_or_insert(log.downloaded_at);
        limit.last_access_at = Some(log.downloaded_at);
        let updated = limit.clone();
        state.access_log.push(log.clone());
        Ok(DownloadOutcome::Recorded(updated))
    }
}

#[derive(Default)]
pub struct InMemoryPropertyDirectory {
    properties: Mutex<HashMap<String, PropertySummary>>,
}

impl InMemoryPropertyDirectory {
    pub fn with_properties(properties: impl IntoIterator<Item = PropertySummary>) -> Self {
        let directory = Self::default();
        for property in properties {
            directory.upsert(property);
        }
        directory
    }

    pub fn upsert(&self, property: PropertySummary) {
        let mut properties = match self.properties.lock() {
            Ok(properties) => properties,
            Err(poisoned) => poisoned.into_inner(),
        };
        properties.insert(property.id.0.clone(), property);
    }
}

#[async_trait]
impl PropertyDirectory for InMemoryPropertyDirectory {
    async fn find_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Option<PropertySummary>, StoreError> {
        let properties = match self.properties.lock() {
            Ok(properties) => properties,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(properties.get(&property_id.0).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::InMemoryGrantStore;
    use crate::domain::access::DocumentAccessLog;
    use crate::domain::document_request::{DocumentRequest, RequestStatus};
    use crate::domain::property::PropertyId;
    use crate::domain::UserId;
    use crate::grants::store::{DownloadOutcome, GrantStore};

    fn request(buyer: &str) -> DocumentRequest {
        DocumentRequest::new_pending(
            PropertyId("P123".to_string()),
            UserId(buyer.to_string()),
            UserId("seller-1".to_string()),
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn commit_decision_only_applies_to_pending_requests() {
        let store = InMemoryGrantStore::default();
        let pending = request("buyer-1");
        store.insert(&pending).await.expect("insert");

        let mut approved = pending.clone();
        approved.approve(7, [0], 3, Utc::now()).expect("approve");
        let mut rejected = pending.clone();
        rejected.reject("late".to_string(), Utc::now()).expect("reject");

        assert!(store.commit_decision(&approved).await.expect("first commit"));
        assert!(!store.commit_decision(&rejected).await.expect("second commit"));

        let stored = store.find_by_id(&pending.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, RequestStatus::Approved);
    }

    #[tokio::test]
    async fn record_download_stops_at_max_downloads() {
        let store = InMemoryGrantStore::default();
        let mut approved = request("buyer-1");
        approved.approve(7, [0], 2, Utc::now()).expect("approve");
        store.insert(&approved).await.expect("insert");
        let log = DocumentAccessLog::new(&approved, 0, Utc::now(), None, None);

        let first = store.record_download(&approved.id, 0, &log).await.expect("first");
        let second = store.record_download(&approved.id, 0, &log).await.expect("second");
        let third = store.record_download(&approved.id, 0, &log).await.expect("third");
        let unknown = store.record_download(&approved.id, 9, &log).await.expect("unknown");

        assert!(matches!(first, DownloadOutcome::Recorded(ref limit) if limit.download_count == 1));
        assert!(matches!(
            second,
            DownloadOutcome::Recorded(ref limit) if limit.remaining_downloads() == 0
        ));
        assert!(matches!(
            third,
            DownloadOutcome::Exhausted(ref limit) if limit.download_count == 2
        ));
        assert_eq!(unknown, DownloadOutcome::UnknownDocument);
        assert_eq!(store.access_log().len(), 2);
    }

    #[tokio::test]
    async fn listings_are_newest_first_and_filter_by_status() {
        let store = InMemoryGrantStore::default();
        let mut older = request("buyer-1");
        older.created_at = Utc::now() - Duration::days(2);
        older.reject("incomplete".to_string(), Utc::now()).expect("reject");
        let newer = request("buyer-1");
        store.insert(&older).await.expect("insert older");
        store.insert(&newer).await.expect("insert newer");
        store.insert(&request("buyer-2")).await.expect("insert other");

        let all = store.list_for_buyer(&UserId("buyer-1".to_string()), None).await.expect("list");
        let pending = store
            .list_for_buyer(&UserId("buyer-1".to_string()), Some(RequestStatus::Pending))
            .await
            .expect("list pending");
        let seller =
            store.list_for_seller(&UserId("seller-1".to_string()), None).await.expect("seller");

        assert_eq!(
            all.iter().map(|r| r.id.clone()).collect::<Vec<_>>(),
            vec![newer.id.clone(), older.id]
        );
        assert_eq!(pending.len(), 1);
        assert_eq!(seller.len(), 3);
    }
}
