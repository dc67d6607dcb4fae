pub mod catalog;
pub mod class_records;
pub mod core;
pub mod credentials;
pub mod overrides;
pub mod progression;
pub mod students;
