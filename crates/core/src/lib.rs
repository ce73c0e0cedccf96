#![forbid(unsafe_code)]

pub mod error;
pub mod model;
pub mod sequencer;
pub mod time;

pub use error::Error;
pub use sequencer::{QuestionOrder, sequence};
pub use time::Clock;
