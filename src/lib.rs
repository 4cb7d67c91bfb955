//! Back-end for the dental scan uploader: sends a photo to a hosted detection
//! workflow, pulls the annotated image out of whatever the workflow returns,
//! and optionally asks a vision model to summarize it.

pub mod config;
pub mod detection;
pub mod extract;
pub mod models;
pub mod response;
pub mod summary;
pub mod terms;
pub mod uploads;
