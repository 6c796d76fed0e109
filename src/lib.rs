pub mod app;
pub mod autosave;
pub mod cli;
pub mod config;
pub mod host;
pub mod ipc;
pub mod state;
pub mod storage;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
