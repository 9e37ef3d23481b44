pub mod ffmpeg_camera;
pub mod image_file_reader;
pub mod snapshot_display;
