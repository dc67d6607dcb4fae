//! Academic progression: decides whether a newly evaluated class completes a
//! student's current step and moves the student on (or graduates them).

mod catalog;
mod classify;
mod engine;
mod error;
mod evaluate;
mod model;
mod step;
mod store;

pub use engine::{evaluate_and_advance, ORIENTATION_LEVEL};
pub use error::ProgressionError;
pub use evaluate::evaluate_step_for;
pub use model::{ClassKind, Position, Track};
pub use step::next_step_label;
pub use store::{ProgressStore, SqliteProgressStore};

pub(crate) use store::{insert_event, write_track};
