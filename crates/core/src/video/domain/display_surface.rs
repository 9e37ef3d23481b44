use crate::shared::frame::Frame;

/// Where composited frames are shown.
pub trait DisplaySurface: Send {
    fn render(&mut self, frame: &Frame) -> Result<(), Box<dyn std::error::Error>>;

    /// False once the surface has been closed by the user or has finished.
    fn is_open(&self) -> bool;

    /// Polls for a user quit request.
    fn quit_requested(&mut self) -> bool;

    fn close(&mut self) {}
}
