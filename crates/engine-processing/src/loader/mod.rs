pub mod context;
pub mod coordinator;
pub mod fleet;
pub mod session;
