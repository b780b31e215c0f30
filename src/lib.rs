//! scrobsync library - reconciles scrobble history with a local music library.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod duplicates;
pub mod engine;
pub mod fuzzy;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod prompt;
pub mod report;
pub mod resolver;
pub mod store;
