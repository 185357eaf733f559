//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{Action, HandleResult, TransferOutcome, handle_notification, on_frame};
pub use machine::{ResultPolicy, SessionContext, TransferState};
