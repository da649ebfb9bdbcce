use crate::models::detection::{Category, Detection};
use crate::models::scan_record::HealthBand;
use std::collections::{BTreeMap, HashMap};

pub const MAX_HEALTH_SCORE: u8 = 100;

/// Default penalty points per detection at full confidence
pub fn default_penalties() -> HashMap<String, f64> {
    let mut p = HashMap::new();
    p.insert("pustule".to_string(), 10.0);
    p.insert("papule".to_string(), 7.0);
    p.insert("other".to_string(), 5.0);
    p.insert("dark_spot".to_string(), 4.0);
    p.insert("blackhead".to_string(), 3.0);
    p
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoringPolicy {
    penalties: HashMap<Category, f64>,
    pub confidence_scaling: bool,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self::from_penalty_map(&default_penalties(), true)
    }
}

impl ScoringPolicy {
    /// Build a policy from a settings-style map keyed by category name.
    /// Missing, negative or non-finite entries fall back to the default.
    pub fn from_penalty_map(map: &HashMap<String, f64>, confidence_scaling: bool) -> Self {
        let defaults = default_penalties();
        let penalties = Category::ALL
            .iter()
            .map(|category| {
                let fallback = defaults.get(category.as_str()).copied().unwrap_or(0.0);
                let value = map
                    .get(category.as_str())
                    .copied()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .unwrap_or(fallback);
                (*category, value)
            })
            .collect();

        Self {
            penalties,
            confidence_scaling,
        }
    }

    pub fn penalty_for(&self, category: Category) -> f64 {
        self.penalties.get(&category).copied().unwrap_or(0.0)
    }

    /// Score one scan's detections. Malformed detections are skipped.
    pub fn score(&self, detections: &[Detection]) -> u8 {
        let total_penalty: f64 = detections
            .iter()
            .filter(|d| d.is_well_formed())
            .map(|d| {
                let scale = if self.confidence_scaling { d.confidence } else { 1.0 };
                self.penalty_for(d.category) * scale
            })
            .sum();

        let raw = f64::from(MAX_HEALTH_SCORE) - total_penalty;
        raw.round().clamp(0.0, f64::from(MAX_HEALTH_SCORE)) as u8
    }
}

pub fn compute_health_score(detections: &[Detection]) -> u8 {
    ScoringPolicy::default().score(detections)
}

pub fn count_by_category(detections: &[Detection]) -> BTreeMap<Category, usize> {
    let mut counts = BTreeMap::new();
    for detection in detections.iter().filter(|d| d.is_well_formed()) {
        *counts.entry(detection.category).or_insert(0) += 1;
    }
    counts
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub good: u8,
    pub moderate: u8,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            good: 80,
            moderate: 60,
        }
    }
}

impl HealthBand {
    pub fn from_score(score: u8, thresholds: &HealthThresholds) -> HealthBand {
        if score >= thresholds.good {
            HealthBand::Good
        } else if score >= thresholds.moderate {
            HealthBand::Moderate
        } else {
            HealthBand::Poor
        }
    }
}
