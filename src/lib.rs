//! School administration sidecar: the active academic period, its cache, and
//! the yearly promotion of students between classes.

pub mod academics;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ipc;
pub mod promotions;
pub mod roster;

pub use error::{Result, SchoolError};
