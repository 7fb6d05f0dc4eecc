use serde::Serialize;

use deedline_core::domain::property::{PropertyDocument, PropertyId, PropertySummary};
use deedline_core::domain::UserId;

use crate::connection::DbPool;
use crate::repositories::{RepositoryError, SqlPropertyDirectory};

/// Listings every local environment starts with.
const SEED_PROPERTIES: &[SeedPropertyContract] = &[
    SeedPropertyContract {
        property_id: "P123",
        seller_id: "seller-demo",
        location: "Lisbon, PT",
        reference_number: "REF-P123",
        documents: &[("title-deed.pdf", "application/pdf"), ("floor-plan.pdf", "application/pdf")],
        description: "Two-document listing used by the approve and reject walkthroughs",
    },
    SeedPropertyContract {
        property_id: "P456",
        seller_id: "seller-demo",
        location: "Porto, PT",
        reference_number: "REF-P456",
        documents: &[("energy-certificate.pdf", "application/pdf")],
        description: "Single-document listing",
    },
];

pub struct DemoSeedDataset;

impl DemoSeedDataset {
    /// Upserts the demo listings. Safe to run repeatedly.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let directory = SqlPropertyDirectory::new(pool.clone());
        let mut properties_seeded = Vec::with_capacity(SEED_PROPERTIES.len());

        for contract in SEED_PROPERTIES {
            directory.save(&contract.summary()).await?;
            properties_seeded.push(PropertySeedInfo {
                property_id: contract.property_id,
                seller_id: contract.seller_id,
                document_count: contract.documents.len(),
                description: contract.description,
            });
        }

        Ok(SeedResult { properties_seeded })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for contract in SEED_PROPERTIES {
            let owned: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM property WHERE id = ?1 AND seller_id = ?2)",
            )
            .bind(contract.property_id)
            .bind(contract.seller_id)
            .fetch_one(pool)
            .await?;
            checks.push((contract.property_id, "listing", owned == 1));

            let documents: i64 =
                sqlx::query_scalar("SELECT COUNT(1) FROM property_document WHERE property_id = ?1")
                    .bind(contract.property_id)
                    .fetch_one(pool)
                    .await?;
            let expected = contract.documents.len() as i64;
            checks.push((contract.property_id, "documents", documents == expected));
        }

        let all_present = checks.iter().all(|(_, _, ok)| *ok);
        Ok(VerificationResult {
            all_present,
            checks: checks
                .into_iter()
                .map(|(property_id, check, ok)| SeedCheck { property_id, check, ok })
                .collect(),
        })
    }

    /// Removes the demo listings along with any requests raised against them.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        for contract in SEED_PROPERTIES {
            sqlx::query("DELETE FROM document_request WHERE property_id = ?")
                .bind(contract.property_id)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM property WHERE id = ?")
                .bind(contract.property_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedPropertyContract {
    property_id: &'static str,
    seller_id: &'static str,
    location: &'static str,
    reference_number: &'static str,
    documents: &'static [(&'static str, &'static str)],
    description: &'static str,
}

impl SeedPropertyContract {
    fn summary(&self) -> PropertySummary {
        PropertySummary {
            id: PropertyId(self.property_id.to_string()),
            seller_id: UserId(self.seller_id.to_string()),
            location: Some(self.location.to_string()),
            reference_number: Some(self.reference_number.to_string()),
            documents: self
                .documents
                .iter()
                .zip(0u32..)
                .map(|((filename, content_type), index)| PropertyDocument {
                    index,
                    filename: (*filename).to_string(),
                    content_type: (*content_type).to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SeedResult {
    pub properties_seeded: Vec<PropertySeedInfo>,
}

#[derive(Debug, Serialize)]
pub struct PropertySeedInfo {
    pub property_id: &'static str,
    pub seller_id: &'static str,
    pub document_count: usize,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SeedCheck {
    pub property_id: &'static str,
    pub check: &'static str,
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<SeedCheck>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn load_is_idempotent_and_verifies() {
        let pool = setup().await;

        let first = DemoSeedDataset::load(&pool).await.expect("first load");
        DemoSeedDataset::load(&pool).await.expect("second load");
        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");

        assert_eq!(first.properties_seeded.len(), 2);
        assert_eq!(first.properties_seeded[0].property_id, "P123");
        assert_eq!(first.properties_seeded[0].document_count, 2);
        assert!(verification.all_present, "{:?}", verification.checks);
    }

    #[tokio::test]
    async fn verify_reports_missing_seed_after_clean() {
        let pool = setup().await;
        DemoSeedDataset::load(&pool).await.expect("load");

        DemoSeedDataset::clean(&pool).await.expect("clean");
        let verification = DemoSeedDataset::verify(&pool).await.expect("verify");

        assert!(!verification.all_present);
        assert!(verification.checks.iter().all(|check| !check.ok));
    }
}
