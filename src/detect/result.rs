use serde::{Deserialize, Serialize};

/// A single face detection in frame pixel space.
///
/// Coordinates satisfy `0 <= x1 < x2 <= width` and `0 <= y1 < y2 <= height`
/// for the frame the detection was produced from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    pub class: DetectionClass,
    /// Wall-clock seconds since epoch at detection time.
    pub ts: f64,
}

impl Detection {
    /// Width and height of the bounding box.
    pub fn size(&self) -> (i32, i32) {
        (self.x2 - self.x1, self.y2 - self.y1)
    }

    /// Validates the coordinate invariant against frame bounds.
    pub fn in_bounds(&self, width: u32, height: u32) -> bool {
        self.x1 >= 0
            && self.y1 >= 0
            && self.x1 < self.x2
            && self.y1 < self.y2
            && self.x2 <= width as i32
            && self.y2 <= height as i32
    }
}

/// Object class of a detection.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionClass {
    Face,
}

impl DetectionClass {
    /// Wire identifier used by the evidence payload encoding.
    pub fn wire_id(self) -> u8 {
        match self {
            DetectionClass::Face => 0,
        }
    }

    pub fn from_wire(id: u8) -> Option<Self> {
        match id {
            0 => Some(DetectionClass::Face),
            _ => None,
        }
    }
}
