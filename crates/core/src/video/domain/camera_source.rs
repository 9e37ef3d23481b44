use crate::shared::frame::Frame;

/// A live source of RGB frames.
///
/// `open` failing means no frames will ever arrive. `read_frame` failing is
/// a transient miss and the caller simply asks again.
pub trait CameraSource: Send {
    fn open(&mut self) -> Result<(), Box<dyn std::error::Error>>;

    fn read_frame(&mut self) -> Result<Frame, Box<dyn std::error::Error>>;

    /// Releases the device. Safe to call more than once.
    fn close(&mut self);
}
