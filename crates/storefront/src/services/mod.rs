//! Business logic services for the storefront.
//!
//! # Services
//!
//! - `catalog` - Cached catalog reads, offers and merchandising
//! - `checkout` - Cart pricing and order placement

pub mod catalog;
pub mod checkout;

pub use catalog::{Catalog, PricedProduct, ProductFilter, ProductSort};
pub use checkout::{CartSummary, CheckoutError, PricedLine};
