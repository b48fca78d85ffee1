#![forbid(unsafe_code)]
#![allow(clippy::missing_errors_doc)]

pub mod cli;
pub mod config;
pub mod error;
pub mod hooks;
pub mod job;
pub mod logs;
pub mod output;
pub mod tui;
