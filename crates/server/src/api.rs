//! HTTP surface of the grant workflow under `/api/v1`.
//!
//! Handlers only translate: headers become a `Session`, bodies become
//! workflow arguments, and `AccessError` becomes a status code plus a JSON
//! `{error, code, correlation_id}` body.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use deedline_core::{
    AccessError, AccessGrantWorkflow, AccessLookup, AccessSnapshot, Decision, DocumentRequest,
    DocumentRequestId, DownloadResult, InterfaceError, PropertyId, RequestStatus, Session,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::auth::{session_from_headers, IdentityResolver, REQUEST_ID_HEADER};

#[derive(Clone)]
pub struct ApiState {
    workflow: AccessGrantWorkflow,
    identities: Arc<dyn IdentityResolver>,
}

pub fn router(workflow: AccessGrantWorkflow, identities: Arc<dyn IdentityResolver>) -> Router {
    Router::new()
        .route("/api/v1/properties/{property_id}/document-requests", post(create_request))
        .route("/api/v1/properties/{property_id}/document-access", get(property_access))
        .route("/api/v1/buyer/document-requests", get(list_buyer_requests))
        .route("/api/v1/seller/document-requests", get(list_seller_requests))
        .route("/api/v1/seller/document-requests/{request_id}/decision", post(decide_request))
        .route("/api/v1/document-requests/{request_id}/access", get(request_access))
        .route(
            "/api/v1/document-requests/{request_id}/documents/{document_index}/downloads",
            post(record_download),
        )
        .route(
            "/api/v1/document-requests/{request_id}/documents/{document_index}/ticket",
            get(verify_ticket),
        )
        .with_state(ApiState { workflow, identities })
}

/// Assigns or propagates `x-request-id` and wraps every request in a trace span.
pub fn with_request_tracing(router: Router) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    router
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CreateRequestBody {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Approve,
    Reject,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: DecisionKind,
    #[serde(default)]
    pub expiry_days: Option<u32>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl From<DecisionBody> for Decision {
    fn from(body: DecisionBody) -> Self {
        match body.decision {
            DecisionKind::Approve => Decision::Approve { expiry_days: body.expiry_days },
            DecisionKind::Reject => Decision::Reject { reason: body.rejection_reason },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RequestList {
    pub requests: Vec<DocumentRequest>,
    pub count: usize,
}

impl From<Vec<DocumentRequest>> for RequestList {
    fn from(requests: Vec<DocumentRequest>) -> Self {
        Self { count: requests.len(), requests }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TicketStatus {
    pub valid: bool,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub correlation_id: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn access(error: AccessError, session: &Session) -> Self {
        let code = error.code();
        let interface = error.into_interface(session.correlation_id.clone());
        let (status, message) = match &interface {
            InterfaceError::BadRequest { message, .. } => {
                (StatusCode::BAD_REQUEST, message.clone())
            }
            InterfaceError::Unauthorized { message, .. } => {
                (StatusCode::UNAUTHORIZED, message.clone())
            }
            InterfaceError::Forbidden { message, .. } => (StatusCode::FORBIDDEN, message.clone()),
            InterfaceError::NotFound { message, .. } => (StatusCode::NOT_FOUND, message.clone()),
            InterfaceError::Conflict { message, .. } => (StatusCode::CONFLICT, message.clone()),
            InterfaceError::TooManyRequests { message, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, message.clone())
            }
            // Backend detail stays in the logs.
            InterfaceError::ServiceUnavailable { message, .. } => {
                warn!(
                    event_name = "api.persistence_failure",
                    correlation_id = %interface.correlation_id(),
                    error = %message,
                    "request failed on the grant store"
                );
                (StatusCode::SERVICE_UNAVAILABLE, interface.user_message().to_string())
            }
        };

        Self {
            status,
            body: ErrorBody {
                error: message,
                code: code.to_string(),
                correlation_id: interface.correlation_id().to_string(),
            },
        }
    }

    fn bad_request(message: impl Into<String>, session: &Session) -> Self {
        Self::access(AccessError::Validation(message.into()), session)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

async fn create_request(
    State(state): State<ApiState>,
    Path(property_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<DocumentRequest>), ApiError> {
    let session = session_from_headers(&headers, &state.identities).await;
    let body: CreateRequestBody =
        if body.is_empty() { CreateRequestBody::default() } else { parse_json(&body, &session)? };

    let request = state
        .workflow
        .create(&session, &PropertyId(property_id), body.message)
        .await
        .map_err(|error| ApiError::access(error, &session))?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn list_buyer_requests(
    State(state): State<ApiState>,
    Query(filter): Query<StatusFilter>,
    headers: HeaderMap,
) -> Result<Json<RequestList>, ApiError> {
    let session = session_from_headers(&headers, &state.identities).await;
    let status = parse_status(filter.status.as_deref(), &session)?;

    let requests = state
        .workflow
        .list_for_buyer(&session, status)
        .await
        .map_err(|error| ApiError::access(error, &session))?;
    Ok(Json(requests.into()))
}

async fn list_seller_requests(
    State(state): State<ApiState>,
    Query(filter): Query<StatusFilter>,
    headers: HeaderMap,
) -> Result<Json<RequestList>, ApiError> {
    let session = session_from_headers(&headers, &state.identities).await;
    let status = parse_status(filter.status.as_deref(), &session)?;

    let requests = state
        .workflow
        .list_for_seller(&session, status)
        .await
        .map_err(|error| ApiError::access(error, &session))?;
    Ok(Json(requests.into()))
}

async fn decide_request(
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DocumentRequest>, ApiError> {
    let session = session_from_headers(&headers, &state.identities).await;
    let body: DecisionBody = parse_json(&body, &session)?;

    let request = state
        .workflow
        .decide(&session, &DocumentRequestId(request_id), body.into())
        .await
        .map_err(|error| ApiError::access(error, &session))?;
    Ok(Json(request))
}

async fn property_access(
    State(state): State<ApiState>,
    Path(property_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AccessSnapshot>, ApiError> {
    let session = session_from_headers(&headers, &state.identities).await;
    let buyer_id = session.require_buyer().map_err(|error| ApiError::access(error, &session))?;

    let lookup = AccessLookup::PropertyBuyer {
        property_id: PropertyId(property_id),
        buyer_id: buyer_id.clone(),
    };
    let snapshot = state
        .workflow
        .check_access(&lookup)
        .await
        .map_err(|error| ApiError::access(error, &session))?;
    Ok(Json(snapshot))
}

async fn request_access(
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<AccessSnapshot>, ApiError> {
    let session = session_from_headers(&headers, &state.identities).await;
    let Some(principal) = session.principal.as_ref() else {
        return Err(ApiError::access(
            AccessError::NotAuthenticated { expected: "buyer or seller" },
            &session,
        ));
    };

    let snapshot = state
        .workflow
        .check_access(&AccessLookup::Request(DocumentRequestId(request_id)))
        .await
        .map_err(|error| ApiError::access(error, &session))?;

    if snapshot.request_id.is_some() && !snapshot.involves(&principal.user_id) {
        return Err(ApiError::access(
            AccessError::Forbidden("request belongs to another buyer and seller".to_string()),
            &session,
        ));
    }
    Ok(Json(snapshot))
}

async fn record_download(
    State(state): State<ApiState>,
    Path((request_id, document_index)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<DownloadResult>, ApiError> {
    let session = session_from_headers(&headers, &state.identities).await;
    let document_index = parse_document_index(&document_index, &session)?;

    let result = state
        .workflow
        .record_download(&session, &DocumentRequestId(request_id), document_index)
        .await
        .map_err(|error| ApiError::access(error, &session))?;
    Ok(Json(result))
}

async fn verify_ticket(
    State(state): State<ApiState>,
    Path((request_id, document_index)): Path<(String, String)>,
    Query(query): Query<TicketQuery>,
    headers: HeaderMap,
) -> Result<Json<TicketStatus>, ApiError> {
    let session = session_from_headers(&headers, &state.identities).await;
    let document_index = parse_document_index(&document_index, &session)?;
    let buyer_id = session.require_buyer().map_err(|error| ApiError::access(error, &session))?;

    let expires_at = state
        .workflow
        .verify_ticket(&query.token, &DocumentRequestId(request_id), document_index, buyer_id)
        .map_err(|error| {
            ApiError::access(AccessError::AccessDenied(error.to_string()), &session)
        })?;
    Ok(Json(TicketStatus { valid: true, expires_at }))
}

fn parse_json<T: DeserializeOwned>(body: &Bytes, session: &Session) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|error| ApiError::bad_request(format!("invalid request body: {error}"), session))
}

fn parse_status(raw: Option<&str>, session: &Session) -> Result<Option<RequestStatus>, ApiError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value
            .parse::<RequestStatus>()
            .map(Some)
            .map_err(|message| ApiError::bad_request(message, session)),
        None => Ok(None),
    }
}

fn parse_document_index(raw: &str, session: &Session) -> Result<u32, ApiError> {
    raw.parse::<u32>().map_err(|_| {
        ApiError::bad_request(
            format!("document_index `{raw}` is not a non-negative integer"),
            session,
        )
    })
}
