use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::debug;

use deedline_core::domain::access::DocumentAccessLog;
use deedline_core::domain::document_request::{
    DocumentLimit, DocumentRequest, DocumentRequestId, RequestStatus,
};
use deedline_core::domain::property::PropertyId;
use deedline_core::domain::UserId;
use deedline_core::errors::StoreError;
use deedline_core::grants::store::{DownloadOutcome, GrantStore};

use super::{
    decode_optional_timestamp, decode_timestamp, decode_u32, encode_timestamp, RepositoryError,
};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, property_id, buyer_id, seller_id, message, status, created_at,
     approved_at, rejected_at, expiry_days, access_expires_on, rejection_reason";

const LIMIT_COLUMNS: &str =
    "document_index, max_downloads, download_count, first_access_at, last_access_at";

pub struct SqlGrantStore {
    pool: DbPool,
}

impl SqlGrantStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_limits(
        conn: &mut SqliteConnection,
        request_id: &str,
    ) -> Result<Vec<DocumentLimit>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {LIMIT_COLUMNS} FROM document_limit \
             WHERE request_id = ? ORDER BY document_index"
        ))
        .bind(request_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.iter().map(row_to_limit).collect()
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<DocumentRequest>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let mut requests = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut request = row_to_request(row)?;
            request.document_limits = Self::load_limits(&mut *conn, &request.id.0).await?;
            requests.push(request);
        }
        Ok(requests)
    }

    async fn fetch_by_id(
        &self,
        id: &DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM document_request WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn fetch_filtered(
        &self,
        column: &'static str,
        value: &str,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM document_request
                     WHERE {column} = ? AND status = ?
                     ORDER BY created_at DESC, id DESC"
                ))
                .bind(value)
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM document_request
                     WHERE {column} = ?
                     ORDER BY created_at DESC, id DESC"
                ))
                .bind(value)
                .fetch_all(&self.pool)
                .await?
            }
        };

        self.hydrate(rows).await
    }

    async fn insert_request(&self, request: &DocumentRequest) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO document_request (id, property_id, buyer_id, seller_id, message, status,
                                           created_at, approved_at, rejected_at, expiry_days,
                                           access_expires_on, rejection_reason)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.property_id.0)
        .bind(&request.buyer_id.0)
        .bind(&request.seller_id.0)
        .bind(&request.message)
        .bind(request.status.as_str())
        .bind(encode_timestamp(request.created_at))
        .bind(request.approved_at.map(encode_timestamp))
        .bind(request.rejected_at.map(encode_timestamp))
        .bind(request.expiry_days.map(i64::from))
        .bind(request.access_expires_on.map(encode_timestamp))
        .bind(&request.rejection_reason)
        .execute(&mut *tx)
        .await?;

        insert_limits(&mut *tx, &request.id, &request.document_limits).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn commit(&self, decided: &DocumentRequest) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE document_request
             SET status = ?, approved_at = ?, rejected_at = ?, expiry_days = ?,
                 access_expires_on = ?, rejection_reason = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(decided.status.as_str())
        .bind(decided.approved_at.map(encode_timestamp))
        .bind(decided.rejected_at.map(encode_timestamp))
        .bind(decided.expiry_days.map(i64::from))
        .bind(decided.access_expires_on.map(encode_timestamp))
        .bind(&decided.rejection_reason)
        .bind(&decided.id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            debug!(
                event_name = "db.grant.decision.lost",
                request_id = %decided.id,
                "request was no longer pending"
            );
            return Ok(false);
        }

        insert_limits(&mut *tx, &decided.id, &decided.document_limits).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn consume(
        &self,
        request_id: &DocumentRequestId,
        document_index: u32,
        log: &DocumentAccessLog,
    ) -> Result<DownloadOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let downloaded_at = encode_timestamp(log.downloaded_at);

        // The guard on download_count is what keeps concurrent callers within the limit.
        let incremented = sqlx::query(&format!(
            "UPDATE document_limit
             SET download_count = download_count + 1,
                 first_access_at = COALESCE(first_access_at, ?),
                 last_access_at = ?
             WHERE request_id = ? AND document_index = ? AND download_count < max_downloads
             RETURNING {LIMIT_COLUMNS}"
        ))
        .bind(&downloaded_at)
        .bind(&downloaded_at)
        .bind(&request_id.0)
        .bind(i64::from(document_index))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = incremented else {
            let current = sqlx::query(&format!(
                "SELECT {LIMIT_COLUMNS} FROM document_limit
                 WHERE request_id = ? AND document_index = ?"
            ))
            .bind(&request_id.0)
            .bind(i64::from(document_index))
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;

            return match current {
                Some(row) => Ok(DownloadOutcome::Exhausted(row_to_limit(&row)?)),
                None => Ok(DownloadOutcome::UnknownDocument),
            };
        };
        let limit = row_to_limit(&row)?;

        sqlx::query(
            "INSERT INTO document_access_log (id, request_id, buyer_id, property_id, document_index,
                                              downloaded_at, client_ip, user_agent)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&log.id)
        .bind(&log.request_id.0)
        .bind(&log.buyer_id.0)
        .bind(&log.property_id.0)
        .bind(i64::from(log.document_index))
        .bind(&downloaded_at)
        .bind(&log.client_ip)
        .bind(&log.user_agent)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(DownloadOutcome::Recorded(limit))
    }

    pub async fn access_log(
        &self,
        request_id: &DocumentRequestId,
    ) -> Result<Vec<DocumentAccessLog>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, request_id, buyer_id, property_id, document_index, downloaded_at,
                    client_ip, user_agent
             FROM document_access_log WHERE request_id = ?
             ORDER BY downloaded_at ASC, id ASC",
        )
        .bind(&request_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_access_log).collect()
    }
}

async fn insert_limits(
    conn: &mut SqliteConnection,
    request_id: &DocumentRequestId,
    limits: &[DocumentLimit],
) -> Result<(), RepositoryError> {
    for limit in limits {
        sqlx::query(
            "INSERT INTO document_limit (request_id, document_index, max_downloads, download_count,
                                         first_access_at, last_access_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&request_id.0)
        .bind(i64::from(limit.document_index))
        .bind(i64::from(limit.max_downloads))
        .bind(i64::from(limit.download_count))
        .bind(limit.first_access_at.map(encode_timestamp))
        .bind(limit.last_access_at.map(encode_timestamp))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

fn decode_err(error: sqlx::Error) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

fn row_to_request(row: &SqliteRow) -> Result<DocumentRequest, RepositoryError> {
    let status_raw: String = row.try_get("status").map_err(decode_err)?;
    let status = status_raw.parse::<RequestStatus>().map_err(RepositoryError::Decode)?;
    let created_at_raw: String = row.try_get("created_at").map_err(decode_err)?;
    let expiry_days: Option<i64> = row.try_get("expiry_days").map_err(decode_err)?;

    Ok(DocumentRequest {
        id: DocumentRequestId(row.try_get("id").map_err(decode_err)?),
        property_id: PropertyId(row.try_get("property_id").map_err(decode_err)?),
        buyer_id: UserId(row.try_get("buyer_id").map_err(decode_err)?),
        seller_id: UserId(row.try_get("seller_id").map_err(decode_err)?),
        message: row.try_get("message").map_err(decode_err)?,
        status,
        created_at: decode_timestamp("created_at", &created_at_raw)?,
        approved_at: decode_optional_timestamp(
            "approved_at",
            row.try_get("approved_at").map_err(decode_err)?,
        )?,
        rejected_at: decode_optional_timestamp(
            "rejected_at",
            row.try_get("rejected_at").map_err(decode_err)?,
        )?,
        expiry_days: expiry_days.map(|days| decode_u32("expiry_days", days)).transpose()?,
        access_expires_on: decode_optional_timestamp(
            "access_expires_on",
            row.try_get("access_expires_on").map_err(decode_err)?,
        )?,
        rejection_reason: row.try_get("rejection_reason").map_err(decode_err)?,
        document_limits: Vec::new(),
    })
}

fn row_to_limit(row: &SqliteRow) -> Result<DocumentLimit, RepositoryError> {
    Ok(DocumentLimit {
        document_index: decode_u32(
            "document_index",
            row.try_get("document_index").map_err(decode_err)?,
        )?,
        max_downloads: decode_u32(
            "max_downloads",
            row.try_get("max_downloads").map_err(decode_err)?,
        )?,
        download_count: decode_u32(
            "download_count",
            row.try_get("download_count").map_err(decode_err)?,
        )?,
        first_access_at: decode_optional_timestamp(
            "first_access_at",
            row.try_get("first_access_at").map_err(decode_err)?,
        )?,
        last_access_at: decode_optional_timestamp(
            "last_access_at",
            row.try_get("last_access_at").map_err(decode_err)?,
        )?,
    })
}

fn row_to_access_log(row: &SqliteRow) -> Result<DocumentAccessLog, RepositoryError> {
    let downloaded_at: String = row.try_get("downloaded_at").map_err(decode_err)?;
    Ok(DocumentAccessLog {
        id: row.try_get("id").map_err(decode_err)?,
        request_id: DocumentRequestId(row.try_get("request_id").map_err(decode_err)?),
        buyer_id: UserId(row.try_get("buyer_id").map_err(decode_err)?),
        property_id: PropertyId(row.try_get("property_id").map_err(decode_err)?),
        document_index: decode_u32(
            "document_index",
            row.try_get("document_index").map_err(decode_err)?,
        )?,
        downloaded_at: decode_timestamp("downloaded_at", &downloaded_at)?,
        client_ip: row.try_get("client_ip").map_err(decode_err)?,
        user_agent: row.try_get("user_agent").map_err(decode_err)?,
    })
}

#[async_trait]
impl GrantStore for SqlGrantStore {
    async fn insert(&self, request: &DocumentRequest) -> Result<(), StoreError> {
        Ok(self.insert_request(request).await?)
    }

    async fn find_by_id(
        &self,
        id: &DocumentRequestId,
    ) -> Result<Option<DocumentRequest>, StoreError> {
        Ok(self.fetch_by_id(id).await?)
    }

    async fn list_for_pair(
        &self,
        property_id: &PropertyId,
        buyer_id: &UserId,
    ) -> Result<Vec<DocumentRequest>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {REQUEST_COLUMNS} FROM document_request
             WHERE property_id = ? AND buyer_id = ?
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(&property_id.0)
        .bind(&buyer_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(self.hydrate(rows).await?)
    }

    async fn list_for_buyer(
        &self,
        buyer_id: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, StoreError> {
        Ok(self.fetch_filtered("buyer_id", &buyer_id.0, status).await?)
    }

    async fn list_for_seller(
        &self,
        seller_id: &UserId,
        status: Option<RequestStatus>,
    ) -> Result<Vec<DocumentRequest>, StoreError> {
        Ok(self.fetch_filtered("seller_id", &seller_id.0, status).await?)
    }

    async fn commit_decision(&self, decided: &DocumentRequest) -> Result<bool, StoreError> {
        Ok(self.commit(decided).await?)
    }

    async fn record_download(
        &self,
        request_id: &DocumentRequestId,
        document_index: u32,
        log: &DocumentAccessLog,
    ) -> Result<DownloadOutcome, StoreError> {
        Ok(self.consume(request_id, document_index, log).await?)
    }
}
