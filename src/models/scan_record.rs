use crate::models::detection::{Category, Detection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub id: String,
    pub timestamp: i64,
    pub image_reference: String,
    pub detections: Vec<Detection>,
    pub health_score: u8,
    pub improvement: Option<i32>,
}

/// Outcome of one successful scan, as handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub record: ScanRecord,
    pub category_counts: BTreeMap<Category, usize>,
    pub dropped_detections: usize,
    pub reported_count: usize,
    pub annotated_image: Option<String>, // data:image/... URI from the service
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthBand {
    Good,
    Moderate,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Improving,
    Worsening,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestStats {
    pub health_score: Option<u8>,
    pub improvement: Option<i32>,
    pub band: Option<HealthBand>,
    pub direction: Option<TrendDirection>,
    pub scan_count: usize,
    pub first_scan_at: Option<i64>,
    pub last_scan_at: Option<i64>,
}

/// Progress of the scan flow. `Analyzing` covers the network round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Analyzing { image_reference: String },
    Completed { record_id: String, health_score: u8 },
    Failed { code: String, message: String },
}
