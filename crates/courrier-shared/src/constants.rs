use std::time::Duration;

/// Application name
pub const APP_NAME: &str = "Courrier";

/// Default live-window size for a conversation stream (messages)
pub const DEFAULT_WINDOW_SIZE: usize = 30;

/// Upper bound on a single pagination page
pub const MAX_PAGE_SIZE: usize = 100;

/// Capacity of stream command / update channels
pub const CHANNEL_CAPACITY: usize = 256;

/// Upload chunk size in bytes (256 KiB)
pub const UPLOAD_CHUNK_SIZE: usize = 262_144;

/// Maximum attachment size in bytes (50 MiB)
pub const MAX_ATTACHMENT_SIZE: usize = 50 * 1024 * 1024;

/// Number of dedup keys the notification router remembers
pub const DEDUP_CAPACITY: usize = 512;

/// Window during which a repeated dedup key is dropped
pub const DEDUP_WINDOW: Duration = Duration::from_secs(300);

/// Broadcast topic every registered device is subscribed to
pub const TOPIC_ALL_USERS: &str = "all-users";

/// Base delay for subscription reconnect backoff
pub const RECONNECT_BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Cap for subscription reconnect backoff
pub const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// Base delay for push delivery retries
pub const PUSH_BACKOFF_BASE: Duration = Duration::from_millis(250);

/// Cap for push delivery retries
pub const PUSH_BACKOFF_MAX: Duration = Duration::from_secs(10);

/// Push delivery attempts before an event is dropped
pub const PUSH_MAX_ATTEMPTS: u32 = 4;
