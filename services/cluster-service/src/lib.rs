//! rda cluster service library.
//!
//! The crate ships the `cluster-service` binary; the library surface exists
//! for integration testing and for embedding the controller elsewhere.

pub mod allocator;
pub mod api;
pub mod clients;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod inventory;
pub mod model;
pub mod state;
