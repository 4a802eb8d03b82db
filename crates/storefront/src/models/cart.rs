//! Session cart and compare list.
//!
//! Only product IDs and quantities are stored; names, prices and stock are
//! looked up from the catalog whenever the cart is shown or checked out.

use serde::{Deserialize, Serialize};
use shopfront_core::ProductId;

/// Highest quantity accepted for one line.
pub const MAX_LINE_QUANTITY: u32 = 99;

/// One product in the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// The visitor's cart, kept in the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub lines: Vec<CartLine>,
}

impl Cart {
    /// Quantity already in the cart for `product_id`.
    #[must_use]
    pub fn quantity_of(&self, product_id: ProductId) -> u32 {
        self.lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map_or(0, |l| l.quantity)
    }

    /// Add `quantity` of a product, merging with an existing line.
    /// Returns the line's new quantity.
    pub fn add(&mut self, product_id: ProductId, quantity: u32) -> u32 {
        let quantity = quantity.max(1);
        if let Some(line) = self.lines.iter_mut().find(|l| l.product_id == product_id) {
            line.quantity = line.quantity.saturating_add(quantity).min(MAX_LINE_QUANTITY);
            return line.quantity;
        }
        let quantity = quantity.min(MAX_LINE_QUANTITY);
        self.lines.push(CartLine {
            product_id,
            quantity,
        });
        quantity
    }

    /// Set a line's quantity; zero removes it. Returns false if the product
    /// is not in the cart.
    pub fn set(&mut self, product_id: ProductId, quantity: u32) -> bool {
        if quantity == 0 {
            return self.remove(product_id);
        }
        match self.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => {
                line.quantity = quantity.min(MAX_LINE_QUANTITY);
                true
            }
            None => false,
        }
    }

    /// Remove a product. Returns whether it was present.
    pub fn remove(&mut self, product_id: ProductId) -> bool {
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);
        self.lines.len() != before
    }

    /// Total number of units.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn product_ids(&self) -> Vec<ProductId> {
        self.lines.iter().map(|l| l.product_id).collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Products picked for side-by-side comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareList {
    #[serde(default)]
    pub product_ids: Vec<ProductId>,
}

/// The compare list already holds [`CompareList::MAX`] products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("You can compare up to {} products at a time.", CompareList::MAX)]
pub struct CompareFull;

impl CompareList {
    pub const MAX: usize = 4;

    /// Add the product, or remove it if already present.
    /// Returns `Ok(true)` when added and `Ok(false)` when removed.
    ///
    /// # Errors
    ///
    /// Returns `CompareFull` when adding to a full list.
    pub fn toggle(&mut self, product_id: ProductId) -> Result<bool, CompareFull> {
        if let Some(pos) = self.product_ids.iter().position(|&id| id == product_id) {
            self.product_ids.remove(pos);
            return Ok(false);
        }
        if self.product_ids.len() >= Self::MAX {
            return Err(CompareFull);
        }
        self.product_ids.push(product_id);
        Ok(true)
    }

    #[must_use]
    pub fn contains(&self, product_id: ProductId) -> bool {
        self.product_ids.contains(&product_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.product_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.product_ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.product_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_merges_lines() {
        let mut cart = Cart::default();
        let id = ProductId::generate();
        assert_eq!(cart.add(id, 2), 2);
        assert_eq!(cart.add(id, 3), 5);
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.item_count(), 5);
    }

    #[test]
    fn test_add_clamps_quantity() {
        let mut cart = Cart::default();
        let id = ProductId::generate();
        assert_eq!(cart.add(id, 0), 1);
        assert_eq!(cart.add(id, 500), MAX_LINE_QUANTITY);
    }

    #[test]
    fn test_set_and_remove() {
        let mut cart = Cart::default();
        let a = ProductId::generate();
        let b = ProductId::generate();
        cart.add(a, 1);
        cart.add(b, 1);

        assert!(cart.set(a, 4));
        assert_eq!(cart.quantity_of(a), 4);
        assert!(cart.set(b, 0));
        assert_eq!(cart.product_ids(), vec![a]);
        assert!(!cart.set(b, 2));
        assert!(!cart.remove(b));

        cart.clear();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_compare_toggle_and_limit() {
        let mut list = CompareList::default();
        let ids: Vec<ProductId> = (0..5).map(|_| ProductId::generate()).collect();

        for id in &ids[..4] {
            assert_eq!(list.toggle(*id), Ok(true));
        }
        assert_eq!(list.toggle(ids[4]), Err(CompareFull));
        assert_eq!(list.toggle(ids[0]), Ok(false));
        assert!(!list.contains(ids[0]));
        assert_eq!(list.toggle(ids[4]), Ok(true));
        assert_eq!(list.len(), CompareList::MAX);
    }
}
