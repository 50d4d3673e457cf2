//! Persisted agent state and settings

pub mod layout;
pub mod records;
pub mod settings;
