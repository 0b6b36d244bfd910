// src/watch/mod.rs

//! Datasets-directory watching.
//!
//! Turns a rewritten `<dataset_type>.csv` extract into a
//! `RuntimeEvent::DatasetUpdated`. It does **not** know about modules or
//! their dependencies; the runtime does the cascade.

pub mod watcher;

pub use watcher::{WatcherHandle, dataset_for_path, spawn_watcher};
