pub mod algos;
pub mod config;
pub mod errors;
pub mod job;
pub mod launcher;
pub mod library;
pub mod render;
pub mod sweep;
