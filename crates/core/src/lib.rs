//! Shopfront Core - Shared types library.
//!
//! This crate provides common types used across all Shopfront components:
//! - `backend` - Hosted backend client (REST, auth, storage, realtime, cache)
//! - `storefront` - Public-facing e-commerce site
//! - `admin` - Administration API
//! - `cli` - Command-line tools for migrations and seeding
//!
//! # Architecture
//!
//! The core crate contains only types, entity records and validation rules -
//! no I/O, no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for IDs, prices, emails, slugs and statuses
//! - [`entities`] - Row types mirroring the hosted tables
//! - [`validation`] - Field-level rule checks run before any write

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod entities;
pub mod types;
pub mod validation;

pub use entities::*;
pub use types::*;
pub use validation::{FieldError, Validate, ValidationErrors, Validator};
