//! Learning Diaries library
//!
//! Local diary store with versioned schema upgrades, JSON backup and
//! restore, and Google Drive sync behind injectable platform capabilities.

pub mod app;
pub mod config;
pub mod database;
pub mod error;
pub mod media;
pub mod platform;
pub mod services;

#[cfg(test)]
mod test_support;
