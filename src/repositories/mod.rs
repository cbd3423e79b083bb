//! Repository pattern implementation for persistence
//!
//! The supervisor and the session registry only see the narrow traits in
//! [`traits`]. SQLite repositories back them in normal operation; the
//! in-memory store stands in when the database cannot be opened.

pub mod channel;
pub mod log_record;
pub mod memory;
pub mod session;
pub mod traits;

pub use channel::ChannelRepository;
pub use log_record::LogRecordRepository;
pub use memory::InMemoryStore;
pub use session::SessionRepository;
pub use traits::*;
