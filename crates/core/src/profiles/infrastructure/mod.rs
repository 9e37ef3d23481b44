pub mod analyzer_profile_encoder;
pub mod image_quality_inspector;
pub mod notify_watcher;
pub mod profile_cleaner;
