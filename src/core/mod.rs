pub mod error;
pub mod utils;
pub mod verdict;

pub use error::GradeError;
pub use verdict::{Feedback, FeedbackKey, ValidationVerdict};
