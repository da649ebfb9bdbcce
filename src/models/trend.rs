use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub label: String,
    pub value: u8,
    pub timestamp: i64, // start of the bucket, or the scan time for per-scan points
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub points: Vec<TrendPoint>,
}

impl TrendSeries {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.points.iter().map(|p| p.label.clone()).collect()
    }

    pub fn values(&self) -> Vec<u8> {
        self.points.iter().map(|p| p.value).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendGranularity {
    Scan,
    Day,
    Week,
}

impl TrendGranularity {
    pub fn from_setting(value: &str) -> Option<Self> {
        match value {
            "scan" => Some(TrendGranularity::Scan),
            "day" => Some(TrendGranularity::Day),
            "week" => Some(TrendGranularity::Week),
            _ => None,
        }
    }
}
