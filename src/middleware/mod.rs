//! Server middleware
//!
//! Collaborators that sit around the access gate: logging, client filtering
//! and thumbnail notification.

pub mod client_filter;
pub mod logging;
pub mod thumbnails;

pub use client_filter::ClientFilter;
pub use thumbnails::{ChannelThumbnailSink, ThumbnailRequest, ThumbnailSink};
