use std::time::Duration;

/// Settle window for bursts of file system notifications on one path.
pub const CHANGE_DEBOUNCE: Duration = Duration::from_millis(100);

/// Trailing window used to coalesce refresh notifications for consumers.
pub const NOTIFY_DEBOUNCE: Duration = Duration::from_millis(150);

/// Number of notes parsed concurrently during a full scan.
pub const SCAN_CONCURRENCY: usize = 16;

/// How far past the anchor `first_valid_occurrence` searches.
pub const FIRST_VALID_SEARCH_DAYS: i64 = 366;

/// Upper bound on calculator steps taken by a single ensure pass.
pub const MAX_ENSURE_STEPS: usize = 1000;

pub const DEFAULT_FUTURE_INSTANCES: u32 = 2;

pub const NOTE_EXTENSION: &str = "md";
