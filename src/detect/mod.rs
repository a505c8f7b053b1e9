mod backend;
mod backends;
mod result;

pub use backend::{Device, FaceDetector, SharedDetector};
pub use backends::StubBackend;
pub use result::{Detection, DetectionClass};
