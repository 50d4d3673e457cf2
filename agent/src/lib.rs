//! Deployment agent library
//!
//! Reconciles the containers on one host against deployment events read from
//! a durable message feed, with secrets sourced from a secret backend.

pub mod app;
pub mod bus;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod runtime;
pub mod secrets;
pub mod storage;
pub mod utils;
pub mod workers;
