//! Data models shared by the supervisor, the runner and the persistence layer

pub mod batch;
pub mod log_record;
pub mod plan;
pub mod session;
pub mod stream;

pub use batch::*;
pub use log_record::*;
pub use plan::*;
pub use session::*;
pub use stream::*;
