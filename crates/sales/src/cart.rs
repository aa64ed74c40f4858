use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use storefront_core::{UserId, VariantId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub variant_id: VariantId,
    pub quantity: u32,
}

/// A user's active cart (one per user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    user_id: UserId,
    items: Vec<CartItem>,
    version: u64,
}

impl Cart {
    pub fn new(user_id: UserId, items: Vec<CartItem>) -> Self {
        Self {
            user_id,
            items,
            version: 1,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, variant_id: VariantId) -> bool {
        self.items.iter().any(|item| item.variant_id == variant_id)
    }

    /// Drop every item for the given variants. Returns how many were removed;
    /// the version only moves when something changed.
    pub fn remove_variants(&mut self, variant_ids: &BTreeSet<VariantId>) -> usize {
        let before = self.items.len();
        self.items
            .retain(|item| !variant_ids.contains(&item.variant_id));
        let removed = before - self.items.len();
        if removed > 0 {
            self.version += 1;
        }
        removed
    }
}
