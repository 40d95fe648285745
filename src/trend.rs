use serde::{Deserialize, Serialize};

use crate::models::TrendPoint;

/// Slopes are in marks per test on a 0-100 scale.
pub const DEFAULT_IMPROVING_SLOPE: f64 = 1.0;
pub const DEFAULT_SUPPORT_SLOPE: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrendStatus {
    Improving,
    Consistent,
    #[serde(rename = "Needs Support")]
    NeedsSupport,
}

impl TrendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Improving => "Improving",
            Self::Consistent => "Consistent",
            Self::NeedsSupport => "Needs Support",
        }
    }
}

impl std::fmt::Display for TrendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendThresholds {
    /// Slopes strictly above this are `Improving`.
    pub improving_above: f64,
    /// Slopes strictly below this are `NeedsSupport`.
    pub support_below: f64,
}

impl Default for TrendThresholds {
    fn default() -> Self {
        Self {
            improving_above: DEFAULT_IMPROVING_SLOPE,
            support_below: DEFAULT_SUPPORT_SLOPE,
        }
    }
}

impl TrendThresholds {
    pub fn classify(&self, points: &[TrendPoint]) -> TrendStatus {
        if points.len() < 2 {
            return TrendStatus::Consistent;
        }

        let slope = regression_slope(points);
        if slope > self.improving_above {
            TrendStatus::Improving
        } else if slope < self.support_below {
            TrendStatus::NeedsSupport
        } else {
            TrendStatus::Consistent
        }
    }
}

/// Least-squares slope of marks against the test index 1..=n.
///
/// Dates only order the points; spacing between them is ignored.
pub fn regression_slope(points: &[TrendPoint]) -> f64 {
    let n = points.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;

    for (index, point) in points.iter().enumerate() {
        let x = (index + 1) as f64;
        sum_x += x;
        sum_y += point.marks;
        sum_xy += x * point.marks;
        sum_xx += x * x;
    }

    let numerator = n * sum_xy - sum_x * sum_y;
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
