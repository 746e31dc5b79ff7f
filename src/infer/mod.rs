pub mod classifier;
#[cfg(feature = "onnx")]
pub mod onnx;

use serde::{Deserialize, Serialize};

/// Axis-aligned box in original-image coordinates, scored by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub score: f32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Self {
        Self { x1, y1, x2, y2, score }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }
}

/// Which end of the score ordering NMS keeps first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionOrder {
    /// Conventional NMS: the best-scoring box survives each round.
    #[default]
    HighestFirst,
    /// Keeps the weakest remaining box each round. Matches the legacy
    /// sort-descending-then-pop driver.
    LowestFirst,
}

pub fn intersection_over_union(a: &Detection, b: &Detection) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);
    let w = (x2 - x1).max(0.0);
    let h = (y2 - y1).max(0.0);
    let inter = w * h;
    if inter <= 0.0 { return 0.0; }
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { (inter / union).min(1.0) }
}

/// Greedy NMS. Output is in selection order and no two kept boxes overlap
/// with IoU >= `iou_threshold`. Equal scores are taken in input order.
pub fn non_max_suppression(
    mut boxes: Vec<Detection>,
    iou_threshold: f32,
    order: SelectionOrder,
) -> Vec<Detection> {
    if boxes.is_empty() { return boxes; }
    // The next pick sits at the end of the vector so `pop` is O(1). Reversing
    // first makes the stable sort put the earliest of equal scores last.
    boxes.reverse();
    match order {
        SelectionOrder::HighestFirst => boxes.sort_by(|a, b| a.score.total_cmp(&b.score)),
        SelectionOrder::LowestFirst => boxes.sort_by(|a, b| b.score.total_cmp(&a.score)),
    }
    let mut selected: Vec<Detection> = Vec::new();
    while let Some(chosen) = boxes.pop() {
        boxes.retain(|b| intersection_over_union(&chosen, b) < iou_threshold);
        selected.push(chosen);
    }
    selected
}
