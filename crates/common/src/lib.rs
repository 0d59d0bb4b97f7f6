// # -----------------------------
// # crates/common/src/lib.rs
// # -----------------------------
//! Shared vocabulary for the nexus daemon and its producers: request and
//! result types, the store key contract, the queue store abstraction and
//! the durable scheduler built on top of it.

pub mod keys;
pub mod limits;
pub mod redis_store;
pub mod scheduler;
pub mod store;
pub mod types;

pub use redis_store::RedisStore;
pub use scheduler::{ScheduledJob, Scheduler, MAX_SCHEDULE_SECS};
pub use store::{MemoryStore, QueueStore};
pub use types::{
    kinds, InboxEntry, Intent, IntentHint, Origin, Parameters, TaskResult,
};

/// Current wall-clock time as epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
