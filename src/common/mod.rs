pub mod frame;
pub mod mailbox;

pub use frame::{Frame, PixelFormat, RawFrame, Rotation};
pub use mailbox::Mailbox;
