use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::property::PropertyId;
use crate::domain::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRequestId(pub String);

impl DocumentRequestId {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("DREQ-{}", &raw[..12]))
    }
}

impl std::fmt::Display for DocumentRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(format!("unknown request status `{other}`")),
        }
    }
}

/// Why a request could not be moved to approved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalError {
    NotPending(RequestStatus),
    ExpiryOutOfRange(u32),
}

/// Query-time view of a request. Expiry is computed, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantState {
    Pending,
    Active,
    Expired,
    Rejected,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLimit {
    pub document_index: u32,
    pub max_downloads: u32,
    pub download_count: u32,
    pub first_access_at: Option<DateTime<Utc>>,
    pub last_access_at: Option<DateTime<Utc>>,
}

impl DocumentLimit {
    pub fn new(document_index: u32, max_downloads: u32) -> Self {
        Self {
            document_index,
            max_downloads,
            download_count: 0,
            first_access_at: None,
            last_access_at: None,
        }
    }

    pub fn remaining_downloads(&self) -> u32 {
        self.max_downloads.saturating_sub(self.download_count)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_downloads() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub id: DocumentRequestId,
    pub property_id: PropertyId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    pub message: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub expiry_days: Option<u32>,
    pub access_expires_on: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub document_limits: Vec<DocumentLimit>,
}

impl DocumentRequest {
    pub fn new_pending(
        property_id: PropertyId,
        buyer_id: UserId,
        seller_id: UserId,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DocumentRequestId::generate(),
            property_id,
            buyer_id,
            seller_id,
            message,
            status: RequestStatus::Pending,
            created_at: now,
            approved_at: None,
            rejected_at: None,
            expiry_days: None,
            access_expires_on: None,
            rejection_reason: None,
            document_limits: Vec::new(),
        }
    }

    /// Moves a pending request to approved. Callers validate `expiry_days` first;
    /// an expiry past the representable calendar leaves the request untouched.
    pub fn approve(
        &mut self,
        expiry_days: u32,
        document_indices: impl IntoIterator<Item = u32>,
        max_downloads: u32,
        now: DateTime<Utc>,
    ) -> Result<(), ApprovalError> {
        if self.status.is_terminal() {
            return Err(ApprovalError::NotPending(self.status));
        }
        let expires_on = now
            .checked_add_signed(Duration::days(i64::from(expiry_days)))
            .ok_or(ApprovalError::ExpiryOutOfRange(expiry_days))?;

        self.status = RequestStatus::Approved;
        self.approved_at = Some(now);
        self.expiry_days = Some(expiry_days);
        self.access_expires_on = Some(expires_on);
        self.document_limits = document_indices
            .into_iter()
            .map(|index| DocumentLimit::new(index, max_downloads))
            .collect();
        Ok(())
    }

    pub fn reject(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), RequestStatus> {
        if self.status.is_terminal() {
            return Err(self.status);
        }

        self.status = RequestStatus::Rejected;
        self.rejected_at = Some(now);
        self.rejection_reason = Some(reason);
        Ok(())
    }

    pub fn grant_state(&self, now: DateTime<Utc>) -> GrantState {
        match self.status {
            RequestStatus::Pending => GrantState::Pending,
            RequestStatus::Rejected => GrantState::Rejected,
            RequestStatus::Approved => match self.access_expires_on {
                Some(expires_on) if now < expires_on => GrantState::Active,
                _ => GrantState::Expired,
            },
        }
    }

    pub fn has_access(&self, now: DateTime<Utc>) -> bool {
        self.grant_state(now) == GrantState::Active
    }

    pub fn limit_for(&self, document_index: u32) -> Option<&DocumentLimit> {
        self.document_limits.iter().find(|limit| limit.document_index == document_index)
    }

    /// True once every document under the grant has no downloads left.
    pub fn is_exhausted(&self) -> bool {
        !self.document_limits.is_empty()
            && self.document_limits.iter().all(DocumentLimit::is_exhausted)
    }
}
