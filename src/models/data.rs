//! Data items and batches.
//!
//! Both records validate their invariants at construction and deserialize
//! through the same checks, so an invalid item or batch can never exist.

use crate::constants::{Priority, ProcessingMode};
use crate::error::{BatchflowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// One unit of data owned by a batch until an item processor consumes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataItem")]
pub struct DataItem {
    id: Uuid,
    created_at: DateTime<Utc>,
    content: String,
    content_type: String,
    size_bytes: u64,
    metadata: HashMap<String, serde_json::Value>,
    checksum: Option<String>,
}

#[derive(Deserialize)]
struct RawDataItem {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    content: String,
    content_type: String,
    size_bytes: u64,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    checksum: Option<String>,
}

impl TryFrom<RawDataItem> for DataItem {
    type Error = BatchflowError;

    fn try_from(raw: RawDataItem) -> Result<Self> {
        let mut item = DataItem::new(raw.content, raw.content_type, raw.size_bytes)?;
        item.id = raw.id;
        item.created_at = raw.created_at;
        item.metadata = raw.metadata;
        item.checksum = raw.checksum;
        Ok(item)
    }
}

impl DataItem {
    pub fn new(
        content: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: u64,
    ) -> Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(BatchflowError::validation(
                "Content cannot be empty",
                "content",
            ));
        }

        let content_type = content_type.into().to_lowercase();
        if !content_type.contains('/') {
            return Err(BatchflowError::validation_value(
                "Invalid content type format",
                "content_type",
                &content_type,
            ));
        }

        if size_bytes == 0 {
            return Err(BatchflowError::validation_value(
                "Size must be positive",
                "size_bytes",
                size_bytes,
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            content,
            content_type,
            size_bytes,
            metadata: HashMap::new(),
            checksum: None,
        })
    }

    /// Plain-text item sized from its UTF-8 length
    pub fn from_text(content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        let size = content.len() as u64;
        Self::new(content, "text/plain", size)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn metadata(&self) -> &HashMap<String, serde_json::Value> {
        &self.metadata
    }

    pub fn checksum(&self) -> Option<&str> {
        self.checksum.as_deref()
    }
}

/// Ordered group of items processed by exactly one batch executor invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDataBatch")]
pub struct DataBatch {
    id: Uuid,
    created_at: DateTime<Utc>,
    items: Vec<DataItem>,
    batch_size: usize,
    total_size_bytes: u64,
    processing_mode: ProcessingMode,
    priority: Priority,
}

#[derive(Deserialize)]
struct RawDataBatch {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    #[serde(default = "Utc::now")]
    created_at: DateTime<Utc>,
    items: Vec<DataItem>,
    batch_size: usize,
    total_size_bytes: u64,
    #[serde(default)]
    processing_mode: ProcessingMode,
    #[serde(default)]
    priority: Priority,
}

impl TryFrom<RawDataBatch> for DataBatch {
    type Error = BatchflowError;

    fn try_from(raw: RawDataBatch) -> Result<Self> {
        let mut batch = DataBatch::new(
            raw.items,
            raw.batch_size,
            raw.total_size_bytes,
            raw.processing_mode,
            raw.priority,
        )?;
        batch.id = raw.id;
        batch.created_at = raw.created_at;
        Ok(batch)
    }
}

impl DataBatch {
    /// Build a batch, rejecting declared sizes that disagree with the items
    pub fn new(
        items: Vec<DataItem>,
        batch_size: usize,
        total_size_bytes: u64,
        processing_mode: ProcessingMode,
        priority: Priority,
    ) -> Result<Self> {
        if items.is_empty() {
            return Err(BatchflowError::validation(
                "Batch must contain at least one item",
                "items",
            ));
        }

        if batch_size != items.len() {
            return Err(BatchflowError::validation_value(
                format!(
                    "Batch size {batch_size} doesn't match item count {}",
                    items.len()
                ),
                "batch_size",
                batch_size,
            ));
        }

        let actual_total = total_size(&items)?;
        if total_size_bytes != actual_total {
            return Err(BatchflowError::validation_value(
                format!(
                    "Total size {total_size_bytes} doesn't match calculated size {actual_total}"
                ),
                "total_size_bytes",
                total_size_bytes,
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            items,
            batch_size,
            total_size_bytes,
            processing_mode,
            priority,
        })
    }

    /// Build a batch with sizes derived from the items
    pub fn from_items(
        items: Vec<DataItem>,
        processing_mode: ProcessingMode,
        priority: Priority,
    ) -> Result<Self> {
        let batch_size = items.len();
        let total_size_bytes = total_size(&items)?;
        Self::new(items, batch_size, total_size_bytes, processing_mode, priority)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn items(&self) -> &[DataItem] {
        &self.items
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.total_size_bytes
    }

    pub fn processing_mode(&self) -> ProcessingMode {
        self.processing_mode
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }
}

fn total_size(items: &[DataItem]) -> Result<u64> {
    items
        .iter()
        .try_fold(0u64, |total, item| total.checked_add(item.size_bytes()))
        .ok_or_else(|| BatchflowError::validation("Total item size overflows u64", "items"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(sizes: &[u64]) -> Vec<DataItem> {
        sizes
            .iter()
            .map(|size| DataItem::new("payload", "text/plain", *size).unwrap())
            .collect()
    }

    #[test]
    fn test_item_validation() {
        assert!(DataItem::new("   ", "text/plain", 10).is_err());
        assert!(DataItem::new("x", "plaintext", 10).is_err());
        assert!(DataItem::new("x", "text/plain", 0).is_err());

        let item = DataItem::new("x", "Application/JSON", 1).unwrap();
        assert_eq!(item.content_type(), "application/json");
    }

    #[test]
    fn test_batch_rejects_mismatched_sizes() {
        let err = DataBatch::new(items(&[10, 20]), 3, 30, ProcessingMode::Parallel, Priority::Medium)
            .unwrap_err();
        assert!(err.to_string().contains("Batch size 3"));

        let err = DataBatch::new(items(&[10, 20]), 2, 31, ProcessingMode::Parallel, Priority::Medium)
            .unwrap_err();
        assert!(err.to_string().contains("calculated size 30"));

        assert!(DataBatch::from_items(vec![], ProcessingMode::Batch, Priority::Low).is_err());
    }

    #[test]
    fn test_deserialization_enforces_invariants() {
        let valid = serde_json::json!({
            "items": [{"content": "a", "content_type": "text/plain", "size_bytes": 4}],
            "batch_size": 1,
            "total_size_bytes": 4,
            "processing_mode": "sequential"
        });
        let batch: DataBatch = serde_json::from_value(valid).unwrap();
        assert_eq!(batch.processing_mode(), ProcessingMode::Sequential);
        assert_eq!(batch.priority(), Priority::Medium);

        let invalid = serde_json::json!({
            "items": [{"content": "a", "content_type": "text/plain", "size_bytes": 4}],
            "batch_size": 1,
            "total_size_bytes": 5
        });
        assert!(serde_json::from_value::<DataBatch>(invalid).is_err());
    }

    #[test]
    fn test_oversized_items_are_rejected_not_wrapped() {
        let huge = items(&[u64::MAX, 2]);
        let err = DataBatch::from_items(huge, ProcessingMode::Parallel, Priority::Medium).unwrap_err();
        assert!(err.to_string().contains("overflows"));

        let wrapped = serde_json::json!({
            "items": [
                {"content": "a", "content_type": "text/plain", "size_bytes": u64::MAX},
                {"content": "b", "content_type": "text/plain", "size_bytes": 2}
            ],
            "batch_size": 2,
            "total_size_bytes": 1
        });
        assert!(serde_json::from_value::<DataBatch>(wrapped).is_err());
    }
}
