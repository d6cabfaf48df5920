pub mod connection;
pub mod log;
pub mod quota;
pub mod registry;

pub use connection::{Session, SessionInfo};
pub use log::{Direction, EntryKind, LogEntry, SessionLog, StreamKey};
pub use quota::IpQuota;
pub use registry::{RegisterError, SessionRegistry, SharedSessionRegistry};
