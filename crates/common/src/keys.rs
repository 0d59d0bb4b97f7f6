//! Store key contract shared by the daemon and every producer.

/// Pending requests, oldest popped first.
pub const INBOX_KEY: &str = "inbox";
/// Recent daemon log lines, newest first, capped.
pub const LOGS_KEY: &str = "logs";
/// Periodic aggregate counters, overwritten each period.
pub const STATS_KEY: &str = "stats";
/// Sorted set of scheduled job ids scored by due time (epoch ms).
pub const SCHEDULE_KEY: &str = "schedule";
/// Single-instance lease marker.
pub const INSTANCE_KEY: &str = "daemon:instance";

pub fn answer_key(request_id: &str) -> String {
    format!("answer:{request_id}")
}

pub fn result_key(job_id: &str) -> String {
    format!("result:{job_id}")
}

pub fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}
