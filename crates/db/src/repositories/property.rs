use async_trait::async_trait;
use sqlx::Row;

use deedline_core::domain::property::{PropertyDocument, PropertyId, PropertySummary};
use deedline_core::domain::UserId;
use deedline_core::errors::StoreError;
use deedline_core::grants::store::PropertyDirectory;

use super::{decode_u32, RepositoryError};
use crate::DbPool;

/// Reads listings from the catalog tables. `save` exists for seeding and tests;
/// the marketplace owns these rows in production.
pub struct SqlPropertyDirectory {
    pool: DbPool,
}

impl SqlPropertyDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, property: &PropertySummary) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO property (id, seller_id, location, reference_number)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 seller_id = excluded.seller_id,
                 location = excluded.location,
                 reference_number = excluded.reference_number",
        )
        .bind(&property.id.0)
        .bind(&property.seller_id.0)
        .bind(&property.location)
        .bind(&property.reference_number)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM property_document WHERE property_id = ?")
            .bind(&property.id.0)
            .execute(&mut *tx)
            .await?;

        for document in &property.documents {
            sqlx::query(
                "INSERT INTO property_document (property_id, document_index, filename, content_type)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&property.id.0)
            .bind(i64::from(document.index))
            .bind(&document.filename)
            .bind(&document.content_type)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch(
        &self,
        property_id: &PropertyId,
    ) -> Result<Option<PropertySummary>, RepositoryError> {
        let Some(row) = sqlx::query(
            "SELECT id, seller_id, location, reference_number FROM property WHERE id = ?",
        )
        .bind(&property_id.0)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let documents = sqlx::query(
            "SELECT document_index, filename, content_type
             FROM property_document WHERE property_id = ?
             ORDER BY document_index",
        )
        .bind(&property_id.0)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|document| -> Result<PropertyDocument, RepositoryError> {
            Ok(PropertyDocument {
                index: decode_u32("document_index", document.try_get("document_index")?)?,
                filename: document.try_get("filename")?,
                content_type: document.try_get("content_type")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PropertySummary {
            id: PropertyId(row.try_get("id")?),
            seller_id: UserId(row.try_get("seller_id")?),
            location: row.try_get("location")?,
            reference_number: row.try_get("reference_number")?,
            documents,
        }))
    }
}

#[async_trait]
impl PropertyDirectory for SqlPropertyDirectory {
    async fn find_property(
        &self,
        property_id: &PropertyId,
    ) -> Result<Option<PropertySummary>, StoreError> {
        Ok(self.fetch(property_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use deedline_core::domain::property::{PropertyDocument, PropertyId, PropertySummary};
    use deedline_core::domain::UserId;
    use deedline_core::grants::store::PropertyDirectory;

    use super::SqlPropertyDirectory;
    use crate::{connect_with_settings, migrations};

    fn listing(documents: &[&str]) -> PropertySummary {
        PropertySummary {
            id: PropertyId("P123".to_string()),
            seller_id: UserId("seller-1".to_string()),
            location: Some("Porto".to_string()),
            reference_number: Some("REF-P123".to_string()),
            documents: documents
                .iter()
                .enumerate()
                .map(|(index, name)| PropertyDocument {
                    index: index as u32,
                    filename: (*name).to_string(),
                    content_type: "application/pdf".to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn save_replaces_documents_and_find_reads_them_back() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let directory = SqlPropertyDirectory::new(pool);

        directory.save(&listing(&["a.pdf", "b.pdf", "c.pdf"])).await.expect("first save");
        directory.save(&listing(&["deed.pdf", "plan.pdf"])).await.expect("second save");

        let found = directory
            .find_property(&PropertyId("P123".to_string()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(found, listing(&["deed.pdf", "plan.pdf"]));
        assert_eq!(found.document_indices(), vec![0, 1]);

        let missing =
            directory.find_property(&PropertyId("P999".to_string())).await.expect("find missing");
        assert!(missing.is_none());
    }
}
