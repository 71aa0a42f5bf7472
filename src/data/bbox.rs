use serde::{Deserialize, Serialize};

/// Axis-aligned box in normalized image coordinates, centre plus size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    cx: f64,
    cy: f64,
    height: f64,
    width: f64,
    label: Option<String>,
    probability: Option<f64>,
}

impl BoundingBox {
    pub fn new(cx: f64, cy: f64, height: f64, width: f64) -> Self {
        Self {
            cx,
            cy,
            height,
            width,
            label: None,
            probability: None,
        }
    }

    pub fn create(
        cx: f64,
        cy: f64,
        height: f64,
        width: f64,
        label: Option<String>,
        probability: Option<f64>,
    ) -> Self {
        Self {
            cx,
            cy,
            height,
            width,
            label,
            probability,
        }
    }

    /// Build from corner coordinates.
    pub fn from_corners(
        x1: f64,
        x2: f64,
        y1: f64,
        y2: f64,
        label: Option<String>,
        probability: Option<f64>,
    ) -> Self {
        Self::create(
            (x1 + x2) / 2.0,
            (y1 + y2) / 2.0,
            (y2 - y1).abs(),
            (x2 - x1).abs(),
            label,
            probability,
        )
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    pub fn cx(&self) -> f64 {
        self.cx
    }

    pub fn cy(&self) -> f64 {
        self.cy
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn probability(&self) -> Option<f64> {
        self.probability
    }

    pub fn x1(&self) -> f64 {
        self.cx - self.width / 2.0
    }

    pub fn x2(&self) -> f64 {
        self.cx + self.width / 2.0
    }

    pub fn y1(&self) -> f64 {
        self.cy - self.height / 2.0
    }

    pub fn y2(&self) -> f64 {
        self.cy + self.height / 2.0
    }
}
