//! Domain types - configuration and vault mapping
//!
//! These types are independent of persistence and of the worker runtime.

pub mod config;
pub mod vault;
