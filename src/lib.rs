// src/lib.rs
pub mod config;
pub mod drivers;
pub mod engine;
pub mod protocol;
pub mod recorder;
pub mod types;
