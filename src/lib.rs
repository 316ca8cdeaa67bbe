pub mod capture;
pub mod common;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod session;

pub use error::{AppError, CaptureError, DetectionError, SessionError};

pub use capture::{CaptureDevice, CaptureStatus};
pub use config::Settings;
pub use session::{Session, SessionBuilder, SessionState};
