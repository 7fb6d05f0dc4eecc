use serde::{Deserialize, Serialize};

use crate::domain::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(pub String);

impl std::fmt::Display for PropertyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDocument {
    pub index: u32,
    pub filename: String,
    pub content_type: String,
}

/// What the grant workflow needs to know about a listed property.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySummary {
    pub id: PropertyId,
    pub seller_id: UserId,
    pub location: Option<String>,
    pub reference_number: Option<String>,
    pub documents: Vec<PropertyDocument>,
}

impl PropertySummary {
    pub fn document_indices(&self) -> Vec<u32> {
        let mut indices: Vec<u32> = self.documents.iter().map(|document| document.index).collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
