//! Live face recognition: a capture/display pipeline with a recognition
//! stage, known faces synced from a watched profile directory, and
//! clustering of unlabeled faces persisted through a two-tier cache.

pub mod shared {
    pub mod bounded_queue;
    pub mod constants;
    pub mod frame;
    pub(crate) mod glyphs;
    pub mod model_resolver;
    pub mod overlay;
    pub mod region;
    pub mod stop_signal;
}

pub mod cache {
    pub mod domain {
        pub mod cache_entry;
    }
    pub mod infrastructure;
}

pub mod recognition {
    pub mod domain {
        pub mod face_analyzer;
        pub mod face_encoding;
        pub mod face_matcher;
    }
    pub mod infrastructure;
}

pub mod clustering {
    pub mod domain {
        pub mod cluster_group;
    }
    pub mod infrastructure;
}

pub mod video {
    pub mod domain {
        pub mod camera_source;
        pub mod display_surface;
        pub mod image_reader;
    }
    pub mod infrastructure;
}

pub mod profiles {
    pub mod domain {
        pub mod directory_watcher;
        pub mod image_inspector;
        pub mod profile_cleanup;
        pub mod profile_encoder;
        pub mod profile_images;
    }
    pub mod infrastructure;
}

pub mod pipeline {
    pub mod capture_display;
    pub mod clustering_stage;
    pub mod live_session;
    pub mod pipeline_error;
    pub mod pipeline_logger;
    pub mod profile_watcher;
    pub mod recognition_stage;
}

#[cfg(test)]
mod testing;
