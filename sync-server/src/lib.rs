pub mod config;
pub mod webhook;
