//! Shopfront admin library.
//!
//! JSON API behind the admin console: catalog and marketing management,
//! order fulfilment, user roles and a live change feed.
//!
//! # Security
//!
//! This crate holds the backend's service-role key, which bypasses row-level
//! security. Every data route requires a signed-in admin; keep the server on
//! a private network.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
