pub mod app;
pub mod cli;
pub mod error;
pub mod keys;
