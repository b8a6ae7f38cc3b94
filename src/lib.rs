pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod output;
pub mod remote;
