pub mod activities;
pub mod agenda;
pub mod attendance;
pub mod backup;
pub mod core;
pub mod grades;
pub mod grading_types;
pub mod groups;
pub mod reports;
pub mod setup;
pub mod students;
