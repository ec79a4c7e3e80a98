//! Proptest strategies for the data model.

use batchflow_core::constants::{Priority, ProcessingMode};
use batchflow_core::models::{DataBatch, DataItem};
use proptest::prelude::*;

pub fn processing_mode_strategy() -> impl Strategy<Value = ProcessingMode> {
    prop_oneof![
        Just(ProcessingMode::Sequential),
        Just(ProcessingMode::Parallel),
        Just(ProcessingMode::Batch),
    ]
}

pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Medium),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

/// Non-blank content with a positive declared size
pub fn data_item_strategy() -> impl Strategy<Value = DataItem> {
    ("[a-z][a-z0-9 ]{0,31}", 1u64..1_000_000).prop_map(|(content, size)| {
        DataItem::new(content, "text/plain", size).expect("strategy yields valid items")
    })
}

pub fn data_batch_strategy() -> impl Strategy<Value = DataBatch> {
    (
        prop::collection::vec(data_item_strategy(), 1..20),
        processing_mode_strategy(),
        priority_strategy(),
    )
        .prop_map(|(items, mode, priority)| {
            DataBatch::from_items(items, mode, priority).expect("strategy yields valid batches")
        })
}
