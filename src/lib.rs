pub mod app;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod resolver;
pub mod ui;
pub mod util;
