//! Admin session models.

pub mod session;

pub use session::{AdminView, CurrentAdmin, keys as session_keys};
