//! Durable persistence for muxd: the Session Store (sessions, messages,
//! compactions, transcript audit log) and the scheduled-job table.

pub mod schedule;
pub mod store;

pub use schedule::ScheduleStore;
pub use store::SessionStore;
