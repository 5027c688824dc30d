//! Channel type definitions for inter-task communication

use tokio::sync::mpsc;

use super::types::FeedEvent;

/// Default per-subscriber buffer size
pub const DEFAULT_CHANNEL_SIZE: usize = 1000;

/// Create a new feed event channel with a custom buffer size
pub fn create_event_channel_with_size(
    size: usize,
) -> (mpsc::Sender<FeedEvent>, mpsc::Receiver<FeedEvent>) {
    mpsc::channel(size.max(1))
}
