pub mod cmd;
pub mod config;
pub mod discovery;
pub mod download;
pub mod escalate;
pub mod manage;
pub mod os;
pub mod prompt;
pub mod service;
pub mod tunnel;
