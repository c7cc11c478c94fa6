//! The Paper entity (spec §3) — an input document for a run, immutable
//! once ingested.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Paper {
    pub paper_id: String,
    pub run_id: String,
    pub title: String,
    pub r#abstract: Option<String>,
    pub full_text: Option<String>,
    pub ingestion_order: u32,
    pub created_at: i64,
}

impl Paper {
    pub fn new(
        run_id: impl Into<String>,
        title: impl Into<String>,
        r#abstract: Option<String>,
        full_text: Option<String>,
        ingestion_order: u32,
    ) -> Self {
        Self {
            paper_id: generate_id(),
            run_id: run_id.into(),
            title: title.into(),
            r#abstract,
            full_text,
            ingestion_order,
            created_at: now_ms(),
        }
    }
}

impl Record for Paper {
    fn id(&self) -> &str {
        &self.paper_id
    }
    fn updated_at(&self) -> i64 {
        // Papers are immutable after creation (spec §3); created_at doubles
        // as the fencing timestamp since no later write ever occurs.
        self.created_at
    }
    fn collection_name() -> &'static str {
        "papers"
    }
    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("run_id".into(), IndexValue::String(self.run_id.clone()));
        fields
    }
}
