pub mod app;
pub mod audio;
pub mod config;
pub mod core;
pub mod error;
pub mod library;
pub mod logging;
pub mod model;
pub mod session;
pub mod status;
pub mod store;
pub mod ui;
