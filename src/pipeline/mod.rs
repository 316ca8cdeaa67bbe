pub mod annotation;
pub mod detection;
pub mod metrics;
pub mod publish;
pub mod services;
pub mod types;

pub use annotation::Annotator;
pub use detection::QuadDetector;
pub use publish::{LatestFrame, PresentationNotifier};
pub use types::{AnnotatedFrame, QuadrilateralObservation};
