mod annotated_frame;
mod observation;

pub use annotated_frame::AnnotatedFrame;
pub use observation::{NormalizedPoint, NormalizedRect, QuadrilateralObservation};
