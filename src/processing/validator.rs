//! Result Validator: consistency checks and aggregate statistics over batch results.

use crate::constants::ActivityStatus;
use crate::models::{BatchProcessingResult, ValidationReport, ValidationStatistics};
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultValidator;

impl ResultValidator {
    pub fn new() -> Self {
        Self
    }

    /// Collect every violation instead of failing fast
    pub fn validate(&self, results: &[BatchProcessingResult]) -> ValidationReport {
        let started = Instant::now();
        let mut validation_errors = Vec::new();

        for result in results {
            if result.total_items() != result.item_results().len() {
                validation_errors.push(format!("Batch {}: item count mismatch", result.batch_id()));
            }

            let completed = result
                .item_results()
                .iter()
                .filter(|r| r.status == ActivityStatus::Completed)
                .count();
            if completed != result.successful_items() {
                validation_errors.push(format!(
                    "Batch {}: successful count mismatch",
                    result.batch_id()
                ));
            }
        }

        let statistics = Self::statistics(results);
        let validation_successful = validation_errors.is_empty();

        if validation_successful {
            info!(
                total_batches = statistics.total_batches,
                total_items = statistics.total_items,
                success_rate = statistics.success_rate_percentage,
                "Batch results validated"
            );
        } else {
            warn!(
                violations = validation_errors.len(),
                errors = ?validation_errors,
                "Batch result validation found inconsistencies"
            );
        }

        ValidationReport {
            validation_successful,
            validation_errors,
            validation_time_seconds: started.elapsed().as_secs_f64(),
            statistics,
        }
    }

    pub fn statistics(results: &[BatchProcessingResult]) -> ValidationStatistics {
        let total_batches = results.len();
        let total_items: usize = results.iter().map(|r| r.total_items()).sum();
        let successful_items: usize = results.iter().map(|r| r.successful_items()).sum();
        let failed_items: usize = results.iter().map(|r| r.failed_items()).sum();
        let total_time: f64 = results.iter().map(|r| r.processing_time_seconds()).sum();

        let ratio = |numerator: f64, denominator: f64| {
            if denominator > 0.0 {
                numerator / denominator
            } else {
                0.0
            }
        };

        ValidationStatistics {
            total_batches,
            total_items,
            successful_items,
            failed_items,
            success_rate_percentage: ratio(successful_items as f64, total_items as f64) * 100.0,
            total_processing_time_seconds: total_time,
            average_batch_processing_time_seconds: ratio(total_time, total_batches as f64),
            throughput_items_per_second: ratio(total_items as f64, total_time),
        }
    }
}
