//! Session-backed storefront models.
//!
//! Everything a visitor accumulates before it is written to the backend
//! (cart, compare list, flash messages) lives in the signed session.

pub mod cart;
pub mod flash;
pub mod session;

pub use cart::{Cart, CartLine, CompareList};
pub use flash::{Flash, FlashLevel};
pub use session::{CurrentUser, keys as session_keys};
