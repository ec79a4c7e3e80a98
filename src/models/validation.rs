use serde::{Deserialize, Serialize};

/// Aggregate statistics over a set of batch results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationStatistics {
    pub total_batches: usize,
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub success_rate_percentage: f64,
    pub total_processing_time_seconds: f64,
    pub average_batch_processing_time_seconds: f64,
    pub throughput_items_per_second: f64,
}

/// Consistency verdict plus statistics; violations are informational only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub validation_successful: bool,
    pub validation_errors: Vec<String>,
    pub validation_time_seconds: f64,
    pub statistics: ValidationStatistics,
}
