//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Media element detection constants
pub mod media {
    /// Tag name of video elements
    pub const VIDEO_TAG: &str = "video";

    /// Tag name of audio elements
    pub const AUDIO_TAG: &str = "audio";

    /// Tag name of nested alternate-source descriptors
    pub const SOURCE_TAG: &str = "source";

    /// Placeholder for an element with no resolvable source
    pub const NO_SOURCE: &str = "N/A";

    /// Duration shown when the element reports no finite length
    pub const UNKNOWN_DURATION: &str = "Unknown";

    /// MIME type shown for a `<source>` without a `type` attribute
    pub const UNKNOWN_MIME: &str = "Unknown";

    /// Name for any ready/network state code outside the lookup tables
    pub const UNKNOWN_STATE: &str = "UNKNOWN";

    /// HTMLMediaElement.readyState names, indexed by code
    pub const READY_STATES: [&str; 5] = [
        "HAVE_NOTHING",
        "HAVE_METADATA",
        "HAVE_CURRENT_DATA",
        "HAVE_FUTURE_DATA",
        "HAVE_ENOUGH_DATA",
    ];

    /// HTMLMediaElement.networkState names, indexed by code
    pub const NETWORK_STATES: [&str; 4] = [
        "NETWORK_EMPTY",
        "NETWORK_IDLE",
        "NETWORK_LOADING",
        "NETWORK_NO_SOURCE",
    ];
}

/// Persisted UI/session state constants
pub mod storage {
    /// Key of the single durable entry
    pub const STATE_KEY: &str = "mediaAuditSuite_state";

    /// Extension of file-backed entries
    pub const FILE_EXTENSION: &str = "json";
}

/// Announcement feed constants
pub mod feed {
    /// Feed queried when nothing is configured
    pub const DEFAULT_URL: &str = "https://your-server.com/api/announcements.json";

    /// Delay between polls (5 minutes)
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

    /// Per-request timeout
    pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

    /// Capacity of the outcome broadcast channel
    pub const OUTCOME_CHANNEL_CAPACITY: usize = 16;
}

/// Config file location constants
pub mod config {
    /// Directory under the platform config/data dir
    pub const APP_DIR: &str = "media-audit";

    /// Settings file name
    pub const FILENAME: &str = "config.toml";
}

/// Environment variable names
pub mod env {
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const FEED_URL: &str = "MEDIA_AUDIT_FEED_URL";
    pub const POLL_INTERVAL_SECS: &str = "MEDIA_AUDIT_POLL_INTERVAL_SECS";
    pub const TIMEOUT_SECS: &str = "MEDIA_AUDIT_TIMEOUT_SECS";
    pub const STATE_DIR: &str = "MEDIA_AUDIT_STATE_DIR";
}
