//! Maps inbound HTTP headers onto a workflow `Session`.
//!
//! Identity is resolved from `Authorization: Bearer <token>`. The shipped
//! resolver reads a static token table from configuration; deployments that
//! sit behind a real identity provider swap in their own `IdentityResolver`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use deedline_core::config::TokenConfig;
use deedline_core::domain::UserId;
use deedline_core::{ClientInfo, Principal, Session};
use secrecy::ExposeSecret;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, bearer_token: &str) -> Option<Principal>;
}

/// Token table loaded from `[[auth.tokens]]`.
#[derive(Default)]
pub struct ConfiguredTokens {
    principals: HashMap<String, Principal>,
}

impl ConfiguredTokens {
    pub fn from_config(tokens: &[TokenConfig]) -> Self {
        let principals = tokens
            .iter()
            .map(|entry| {
                (
                    entry.token.expose_secret().to_string(),
                    Principal { user_id: UserId(entry.user_id.clone()), role: entry.role },
                )
            })
            .collect();
        Self { principals }
    }

    pub fn len(&self) -> usize {
        self.principals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.principals.is_empty()
    }
}

impl std::fmt::Debug for ConfiguredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredTokens").field("count", &self.principals.len()).finish()
    }
}

#[async_trait]
impl IdentityResolver for ConfiguredTokens {
    async fn resolve(&self, bearer_token: &str) -> Option<Principal> {
        self.principals.get(bearer_token).cloned()
    }
}

/// Builds the caller session. Unknown or missing tokens yield an anonymous
/// session; the workflow decides whether that is acceptable.
pub async fn session_from_headers(
    headers: &HeaderMap,
    identities: &Arc<dyn IdentityResolver>,
) -> Session {
    let principal = match bearer_token(headers) {
        Some(token) => identities.resolve(token).await,
        None => None,
    };

    let session = match principal {
        Some(principal) => Session::authenticated(principal),
        None => Session::anonymous(),
    };

    session.with_correlation_id(correlation_id(headers)).with_client(client_info(headers))
}

pub fn correlation_id(headers: &HeaderMap) -> String {
    header_value(headers, REQUEST_ID_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn client_info(headers: &HeaderMap) -> ClientInfo {
    // First hop of x-forwarded-for is the original client.
    let ip = header_value(headers, FORWARDED_FOR_HEADER)
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    ClientInfo {
        ip,
        user_agent: header_value(headers, header::USER_AGENT.as_str()).map(str::to_string),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).filter(|value| !value.is_empty())
}
