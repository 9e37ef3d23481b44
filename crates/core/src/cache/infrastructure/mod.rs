pub mod persistent_cache;
