pub mod copy;
pub mod truncate;
