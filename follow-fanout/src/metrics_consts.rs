pub const EVENTS_RECEIVED: &str = "follow_fanout_events_received";
pub const EVENTS_PROCESSED: &str = "follow_fanout_events_processed";
pub const EVENTS_RETRIED: &str = "follow_fanout_events_retried";
pub const EVENTS_DROPPED: &str = "follow_fanout_events_dropped";
pub const EMPTY_EVENTS: &str = "follow_fanout_empty_events";
pub const EVENT_PARSE_ERROR: &str = "follow_fanout_event_parse_error";
pub const RECV_ERRORS: &str = "follow_fanout_recv_errors";
pub const OFFSET_ERRORS: &str = "follow_fanout_offset_errors";
pub const EVENT_PROCESS_TIME: &str = "follow_fanout_event_process_seconds";

pub const CACHE_WRITES: &str = "follow_fanout_cache_writes";
pub const FOLLOW_DEDUPE_SKIPPED: &str = "follow_fanout_dedupe_skipped";
pub const CONSISTENCY_REPAIR_NEEDED: &str = "follow_fanout_consistency_repair_needed_total";

pub const FANOUT_PUBLISHED: &str = "follow_fanout_fanout_published";
pub const FANOUT_RECIPIENTS: &str = "follow_fanout_fanout_recipients";

pub const SEED_REQUESTS: &str = "follow_fanout_seed_requests";
pub const SEED_ROWS_APPLIED: &str = "follow_fanout_seed_rows_applied";
pub const SEED_ROWS_FAILED: &str = "follow_fanout_seed_rows_failed";
pub const SEED_TIME: &str = "follow_fanout_seed_seconds";
