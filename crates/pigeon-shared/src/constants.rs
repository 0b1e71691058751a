use std::time::Duration;

/// Interval between presence heartbeat writes.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1500);

/// Maximum heartbeat age before an observer distrusts an "online" claim.
/// Must be larger than [`HEARTBEAT_INTERVAL`] so a healthy publisher is
/// never flagged stale between two writes.
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(4);

/// Send attempts (initial send plus retries) before a message is moved to
/// [`crate::DeliveryStatus::Failed`].
pub const MAX_SEND_ATTEMPTS: u32 = 5;

/// Default page size for conversation message queries.
pub const DEFAULT_MESSAGE_PAGE: u32 = 50;

/// Maximum length of the denormalized last-message preview text.
pub const LAST_MESSAGE_PREVIEW_LEN: usize = 120;

/// Separator used when deriving a direct-conversation identity from the
/// sorted participant pair.
pub const DIRECT_ID_SEPARATOR: char = '_';
