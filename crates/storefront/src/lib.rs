//! Shopfront storefront library.
//!
//! The public shop: catalog pages, cart, wishlist, compare, checkout and the
//! customer account, rendered server-side with askama. Catalog reads go
//! through the backend's cached CRUD services; account data is read with the
//! visitor's own token so row-level security applies.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
