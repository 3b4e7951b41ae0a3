//! attend-hw — Camera capture and photo files.
//!
//! Provides V4L2-based camera access that yields grayscale frames, and the
//! JPEG helpers used to hand captured photos to recognition.

pub mod camera;
pub mod frame;
pub mod photo;

pub use camera::{Camera, CameraError, DeviceInfo, FrameStream, PixelFormat};
pub use frame::{Frame, FrameError};
pub use photo::PhotoError;
