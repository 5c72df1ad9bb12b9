//! Domain models for the carebook store.

mod change;
mod note;
mod patient;

pub use change::*;
pub use note::*;
pub use patient::*;
