pub mod mark;
pub mod observation;
pub mod session;

pub use mark::{Mark, MarkCategory};
pub use observation::{CellRecord, ObservationSet, ReadingRecord};
pub use session::{Session, SessionStatus};
