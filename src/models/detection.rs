use serde::{Deserialize, Serialize};
use std::fmt;

/// Skin condition labels the detection model can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Pustule,
    Papule,
    Blackhead,
    DarkSpot,
    Other,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Pustule,
        Category::Papule,
        Category::Blackhead,
        Category::DarkSpot,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Pustule => "pustule",
            Category::Papule => "papule",
            Category::Blackhead => "blackhead",
            Category::DarkSpot => "dark_spot",
            Category::Other => "other",
        }
    }

    /// Lenient label parsing for model output. Unknown labels are `Other`.
    pub fn from_label(label: &str) -> Category {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);

        match singular {
            "pustule" => Category::Pustule,
            "papule" => Category::Papule,
            "blackhead" => Category::Blackhead,
            "dark_spot" | "darkspot" => Category::DarkSpot,
            _ => Category::Other,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub category: Category,
    pub bounding_box: BoundingBox,
    pub confidence: f64,
}

/// Why a single detection was rejected. Never fatal for a scan.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectionIssue {
    #[error("detection has no category label")]
    MissingCategory,
    #[error("detection has no bounding box")]
    MissingBoundingBox,
    #[error("detection has no confidence value")]
    MissingConfidence,
    #[error("detection entry has an unexpected shape: {0}")]
    BadShape(String),
    #[error("bounding box is inverted ({x_min},{y_min})-({x_max},{y_max})")]
    InvertedBox {
        x_min: f64,
        y_min: f64,
        x_max: f64,
        y_max: f64,
    },
    #[error("bounding box has a non-finite coordinate")]
    NonFiniteCoordinate,
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),
}

impl Detection {
    pub fn new(category: Category, bounding_box: BoundingBox, confidence: f64) -> Self {
        Self {
            category,
            bounding_box,
            confidence,
        }
    }

    pub fn validate(&self) -> Result<(), DetectionIssue> {
        let b = &self.bounding_box;
        if ![b.x_min, b.y_min, b.x_max, b.y_max].iter().all(|v| v.is_finite()) {
            return Err(DetectionIssue::NonFiniteCoordinate);
        }
        if b.x_min > b.x_max || b.y_min > b.y_max {
            return Err(DetectionIssue::InvertedBox {
                x_min: b.x_min,
                y_min: b.y_min,
                x_max: b.x_max,
                y_max: b.y_max,
            });
        }
        // NaN fails the range check too.
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(DetectionIssue::ConfidenceOutOfRange(self.confidence));
        }
        Ok(())
    }

    pub fn is_well_formed(&self) -> bool {
        self.validate().is_ok()
    }
}
