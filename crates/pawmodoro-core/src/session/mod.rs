mod synchronizer;
mod types;

pub use synchronizer::{SessionCall, SessionSynchronizer, SessionTicket};
pub use types::{CreateSessionRequest, Session, SessionId};
