use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::shared::frame::Frame;
use crate::video::domain::camera_source::CameraSource;

/// Captures frames through ffmpeg-next (libavdevice + libavcodec).
///
/// The source is either a capture device opened through a named input
/// format (`v4l2` with `/dev/video0`, `avfoundation` with `0`, `dshow` with
/// `video=...`) or a plain media file. Files are paced to their frame rate
/// and can loop.
pub struct FfmpegCamera {
    source: PathBuf,
    format: Option<String>,
    looping: bool,
    state: Option<OpenCamera>,
    frame_index: usize,
}

struct OpenCamera {
    ictx: ffmpeg_next::format::context::Input,
    decoder: ffmpeg_next::decoder::Video,
    scaler: ffmpeg_next::software::scaling::Context,
    stream_index: usize,
    width: u32,
    height: u32,
    /// Set for files, `None` for live devices which pace themselves.
    frame_interval: Option<Duration>,
    next_due: Instant,
    exhausted: bool,
}

// Safety: FfmpegCamera is owned by the capture thread and never shared.
// The raw pointers inside ffmpeg types are not accessed from other threads.
unsafe impl Send for FfmpegCamera {}

impl FfmpegCamera {
    /// A capture device opened with the given input format.
    pub fn device(format: impl Into<String>, device: impl Into<PathBuf>) -> Self {
        Self {
            source: device.into(),
            format: Some(format.into()),
            looping: false,
            state: None,
            frame_index: 0,
        }
    }

    /// A media file, optionally restarted from the beginning when it ends.
    pub fn file(path: impl Into<PathBuf>, looping: bool) -> Self {
        Self {
            source: path.into(),
            format: None,
            looping,
            state: None,
            frame_index: 0,
        }
    }

    /// The platform's default capture format and first camera.
    pub fn default_device() -> Self {
        #[cfg(target_os = "macos")]
        {
            Self::device("avfoundation", "0")
        }
        #[cfg(target_os = "windows")]
        {
            Self::device("dshow", "video=Integrated Camera")
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            Self::device("v4l2", "/dev/video0")
        }
    }

    fn open_input(&self) -> Result<ffmpeg_next::format::context::Input, Box<dyn std::error::Error>> {
        let Some(name) = &self.format else {
            return Ok(ffmpeg_next::format::input(&self.source)?);
        };
        let format = ffmpeg_next::device::input::video()
            .find(|f| f.name() == name)
            .ok_or_else(|| format!("capture format {name:?} is not available"))?;
        let context = ffmpeg_next::format::open_with(
            &self.source,
            &ffmpeg_next::format::Format::Input(format),
            ffmpeg_next::Dictionary::new(),
        )?;
        match context {
            ffmpeg_next::format::context::Context::Input(input) => Ok(input),
            ffmpeg_next::format::context::Context::Output(_) => {
                Err(format!("{} did not open as an input", self.source.display()).into())
            }
        }
    }
}

impl CameraSource for FfmpegCamera {
    fn open(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        ffmpeg_next::init()?;
        ffmpeg_next::device::register_all();

        let ictx = self.open_input()?;
        let stream = ictx
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or("no video stream found")?;
        let stream_index = stream.index();
        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = codec_ctx.decoder().video()?;

        let rate = stream.rate();
        let frame_interval = if self.format.is_none() && rate.numerator() > 0 && rate.denominator() > 0 {
            Some(Duration::from_secs_f64(
                rate.denominator() as f64 / rate.numerator() as f64,
            ))
        } else {
            None
        };

        let width = decoder.width();
        let height = decoder.height();
        let scaler = ffmpeg_next::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg_next::format::Pixel::RGB24,
            width,
            height,
            ffmpeg_next::software::scaling::Flags::BILINEAR,
        )?;

        log::info!(
            "Opened camera {} ({width}x{height})",
            self.source.display()
        );
        self.state = Some(OpenCamera {
            ictx,
            decoder,
            scaler,
            stream_index,
            width,
            height,
            frame_interval,
            next_due: Instant::now(),
            exhausted: false,
        });
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame, Box<dyn std::error::Error>> {
        let looping = self.looping;
        let state = self.state.as_mut().ok_or("camera is not open")?;
        state.wait_until_due();

        let pixels = state.next_pixels(looping)?;
        let frame = Frame::new(pixels, state.width, state.height, 3, self.frame_index);
        self.frame_index += 1;
        Ok(frame)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("Closed camera {}", self.source.display());
        }
    }
}

impl OpenCamera {
    fn wait_until_due(&mut self) {
        let Some(interval) = self.frame_interval else {
            return;
        };
        let now = Instant::now();
        if self.next_due > now {
            std::thread::sleep(self.next_due - now);
        }
        self.next_due = self.next_due.max(now) + interval;
    }

    fn next_pixels(&mut self, looping: bool) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
        loop {
            if let Some(pixels) = self.try_receive()? {
                return Ok(pixels);
            }
            if self.exhausted {
                if !looping {
                    return Err("end of stream".into());
                }
                self.ictx.seek(0, ..)?;
                self.decoder.flush();
                self.exhausted = false;
                continue;
            }

            match self.ictx.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_index {
                        // A corrupt packet only costs this frame.
                        if let Err(e) = self.decoder.send_packet(&packet) {
                            log::debug!("Dropping undecodable packet: {e}");
                        }
                    }
                }
                None => {
                    let _ = self.decoder.send_eof();
                    self.exhausted = true;
                }
            }
        }
    }

    fn try_receive(&mut self) -> Result<Option<Vec<u8>>, Box<dyn std::error::Error>> {
        let mut decoded = ffmpeg_next::util::frame::video::Video::empty();
        if self.decoder.receive_frame(&mut decoded).is_err() {
            return Ok(None);
        }
        let mut rgb = ffmpeg_next::util::frame::video::Video::empty();
        self.scaler.run(&decoded, &mut rgb)?;
        Ok(Some(packed_rgb(&rgb, self.width, self.height)))
    }
}

/// Strips per-row padding (stride > width * 3) from an RGB24 frame.
fn packed_rgb(rgb: &ffmpeg_next::util::frame::video::Video, width: u32, height: u32) -> Vec<u8> {
    let stride = rgb.stride(0);
    let data = rgb.data(0);
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_len]);
    }
    pixels
}
