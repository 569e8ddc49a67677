//! Thumbnail notifications
//!
//! After an image is written the gate hands a request to a [`ThumbnailSink`].
//! Delivery is fire-and-forget: a full queue drops the request and never
//! fails or delays the write.

use log::{debug, info, warn};
use tokio::sync::mpsc;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// A stored image that may need a thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub owner: String,
    pub path: String,
    pub version: String,
}

/// Receiver of thumbnail requests
pub trait ThumbnailSink: Send + Sync {
    fn notify(&self, request: ThumbnailRequest);
}

/// Sink that queues requests on a bounded channel
#[derive(Debug, Clone)]
pub struct ChannelThumbnailSink {
    tx: mpsc::Sender<ThumbnailRequest>,
}

impl ChannelThumbnailSink {
    /// Creates a sink and the receiving end of its queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ThumbnailRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ThumbnailSink for ChannelThumbnailSink {
    fn notify(&self, request: ThumbnailRequest) {
        if let Err(e) = self.tx.try_send(request) {
            warn!("Thumbnail request dropped: {}", e);
        }
    }
}

/// True for paths with a common raster image extension
pub fn is_image_path(path: &str) -> bool {
    path.rsplit_once('.')
        .map(|(_, ext)| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Drains the queue. Rendering happens outside this server; the worker only
/// records what was requested.
pub async fn run_thumbnail_worker(mut rx: mpsc::Receiver<ThumbnailRequest>) {
    while let Some(request) = rx.recv().await {
        info!(
            "Thumbnail requested for {}:{} ({})",
            request.owner, request.path, request.version
        );
    }
    debug!("Thumbnail queue closed");
}
