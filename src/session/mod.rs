pub mod controller;
pub mod marks;

pub use controller::{device_info, validate_name, Reconciled, SessionController, SessionError};
pub use marks::{MarkError, MarkOutcome, MarkRecorder};
