pub mod base;
pub mod capture;
pub mod postgres;
