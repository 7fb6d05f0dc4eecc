//! Signed, short-lived download tickets.
//!
//! A ticket is issued with every recorded download so the document-serving
//! collaborator can hand out the bytes without consulting the grant store
//! again. Format: `<request_id>.<document_index>.<expires_unix>.<hmac_hex>`,
//! where the MAC also covers the buyer id.

use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::document_request::DocumentRequestId;
use crate::domain::UserId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTicket {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TicketError {
    #[error("ticket signing key was rejected")]
    InvalidKey,
    #[error("ticket is malformed")]
    Malformed,
    #[error("ticket signature does not match")]
    BadSignature,
    #[error("ticket expired at {0}")]
    Expired(DateTime<Utc>),
    #[error("ticket was issued for a different document")]
    Mismatch,
}

#[derive(Clone)]
pub struct TicketSigner {
    keyed: HmacSha256,
    ttl: Duration,
}

impl std::fmt::Debug for TicketSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketSigner").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TicketSigner {
    pub fn new(secret: &SecretString, ttl_hours: u32) -> Result<Self, TicketError> {
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|_| TicketError::InvalidKey)?;
        Ok(Self { keyed, ttl: Duration::hours(i64::from(ttl_hours)) })
    }

    pub fn issue(
        &self,
        request_id: &DocumentRequestId,
        document_index: u32,
        buyer_id: &UserId,
        now: DateTime<Utc>,
    ) -> DownloadTicket {
        let expires_at = truncate_to_second(now + self.ttl);
        let expires_unix = expires_at.timestamp();
        let signature = self.sign(request_id, document_index, buyer_id, expires_unix);

        DownloadTicket {
            token: format!("{}.{}.{}.{}", request_id.0, document_index, expires_unix, signature),
            expires_at,
        }
    }

    pub fn verify(
        &self,
        token: &str,
        request_id: &DocumentRequestId,
        document_index: u32,
        buyer_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, TicketError> {
        let mut parts = token.rsplitn(4, '.');
        let signature = parts.next().ok_or(TicketError::Malformed)?;
        let expires_raw = parts.next().ok_or(TicketError::Malformed)?;
        let index_raw = parts.next().ok_or(TicketError::Malformed)?;
        let request_raw = parts.next().ok_or(TicketError::Malformed)?;

        let token_index: u32 = index_raw.parse().map_err(|_| TicketError::Malformed)?;
        let expires_unix: i64 = expires_raw.parse().map_err(|_| TicketError::Malformed)?;
        let signature = decode_hex(signature).ok_or(TicketError::Malformed)?;

        if request_raw != request_id.0 || token_index != document_index {
            return Err(TicketError::Mismatch);
        }

        let mut mac = self.keyed.clone();
        mac.update(payload(request_id, document_index, buyer_id, expires_unix).as_bytes());
        mac.verify_slice(&signature).map_err(|_| TicketError::BadSignature)?;

        let expires_at =
            Utc.timestamp_opt(expires_unix, 0).single().ok_or(TicketError::Malformed)?;
        if now >= expires_at {
            return Err(TicketError::Expired(expires_at));
        }
        Ok(expires_at)
    }

    fn sign(
        &self,
        request_id: &DocumentRequestId,
        document_index: u32,
        buyer_id: &UserId,
        expires_unix: i64,
    ) -> String {
        let mut mac = self.keyed.clone();
        mac.update(payload(request_id, document_index, buyer_id, expires_unix).as_bytes());
        encode_hex(mac.finalize().into_bytes().as_slice())
    }
}

fn payload(
    request_id: &DocumentRequestId,
    document_index: u32,
    buyer_id: &UserId,
    expires_unix: i64,
) -> String {
    format!("{}|{}|{}|{}", request_id.0, document_index, buyer_id.0, expires_unix)
}

fn truncate_to_second(value: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(value.timestamp(), 0).single().unwrap_or(value)
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(value: &str) -> Option<Vec<u8>> {
    if value.len() % 2 != 0 {
        return None;
    }
    (0..value.len())
        .step_by(2)
        .map(|start| u8::from_str_radix(value.get(start..start + 2)?, 16).ok())
        .collect()
}
