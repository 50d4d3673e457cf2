pub mod deployment;
pub mod event;
