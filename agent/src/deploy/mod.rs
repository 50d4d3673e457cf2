pub mod env;
pub mod janitor;
pub mod reconciler;
