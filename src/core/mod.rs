//! Core module - Configuration, host access and shared build steps

pub mod builder;
pub mod config;
pub mod error;
pub mod mount;
pub mod runner;
pub mod size;
pub mod utils;
