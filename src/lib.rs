#![deny(clippy::nursery, clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

pub mod ansi;
pub mod config;
pub mod database;
pub mod detector;
pub mod messages;
pub mod models;
pub mod parser;
pub mod proxy;
pub mod script;
pub mod session;
pub mod telnet;
pub mod tui;
