//! Pool of coils still awaiting assignment to a container.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::model::{Item, ItemId};
use crate::types::total_weight;

/// Errors raised by pool membership operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("item {0} is not in the pool")]
    NotFound(ItemId),
    #[error("item {0} was requested more than once")]
    DuplicateRequest(ItemId),
    #[error("item id {0} occurs more than once in the pool")]
    DuplicateItem(ItemId),
}

/// Multiset of items awaiting assignment.
///
/// Insertion order is preserved across removals; the selector relies on it
/// for deterministic enumeration.
#[derive(Clone, Debug, Default)]
pub struct ItemPool {
    items: Vec<Item>,
}

impl ItemPool {
    /// Creates a pool, rejecting repeated item ids.
    pub fn new(items: Vec<Item>) -> Result<Self, PoolError> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in &items {
            if !seen.insert(item.id()) {
                return Err(PoolError::DuplicateItem(item.id()));
            }
        }
        Ok(Self { items })
    }

    /// All items in pool order.
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Items that may occupy the bottom tier (every item), with their pool
    /// positions.
    pub fn eligible_bottom(&self) -> impl Iterator<Item = (usize, &Item)> {
        self.items.iter().enumerate()
    }

    /// Items short enough for the top tier, with their pool positions.
    pub fn eligible_top(&self) -> impl Iterator<Item = (usize, &Item)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_top_eligible())
    }

    /// Looks up the requested item instances without removing them.
    ///
    /// Returns them in request order, with the same errors as [`Self::remove`].
    pub fn lookup(&self, ids: &[ItemId]) -> Result<Vec<&Item>, PoolError> {
        let mut seen = HashSet::with_capacity(ids.len());
        let by_id: HashMap<ItemId, &Item> = self
            .items
            .iter()
            .map(|item| (item.id(), item))
            .collect();
        ids.iter()
            .map(|&id| {
                if !seen.insert(id) {
                    return Err(PoolError::DuplicateRequest(id));
                }
                by_id.get(&id).copied().ok_or(PoolError::NotFound(id))
            })
            .collect()
    }

    /// Removes exactly the requested item instances.
    ///
    /// Returns the removed items in request order. Fails without touching the
    /// pool if an id is missing or requested twice.
    pub fn remove(&mut self, ids: &[ItemId]) -> Result<Vec<Item>, PoolError> {
        let mut wanted: HashMap<ItemId, Option<Item>> = HashMap::with_capacity(ids.len());
        for &id in ids {
            if wanted.insert(id, None).is_some() {
                return Err(PoolError::DuplicateRequest(id));
            }
        }

        let present: HashSet<ItemId> = self
            .items
            .iter()
            .map(Item::id)
            .filter(|id| wanted.contains_key(id))
            .collect();
        if let Some(&missing) = ids.iter().find(|id| !present.contains(*id)) {
            return Err(PoolError::NotFound(missing));
        }

        let (taken, kept): (Vec<Item>, Vec<Item>) = std::mem::take(&mut self.items)
            .into_iter()
            .partition(|item| wanted.contains_key(&item.id()));
        self.items = kept;

        for item in taken {
            wanted.insert(item.id(), Some(item));
        }
        Ok(ids
            .iter()
            .filter_map(|id| wanted.remove(id).flatten())
            .collect())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Sum of all item weights still in the pool.
    pub fn total_weight(&self) -> f64 {
        total_weight(&self.items)
    }

    /// Consumes the pool, yielding the remaining items in pool order.
    pub fn into_items(self) -> Vec<Item> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_of(lengths: &[f64]) -> ItemPool {
        let items = lengths
            .iter()
            .enumerate()
            .map(|(i, &len)| Item::new(ItemId(i), "P", len, len * 1.15).unwrap())
            .collect();
        ItemPool::new(items).unwrap()
    }

    #[test]
    fn filters_tier_eligibility() {
        let pool = pool_of(&[1000.0, 1400.0, 1250.0]);
        assert_eq!(pool.eligible_bottom().count(), 3);
        let top: Vec<(usize, ItemId)> = pool
            .eligible_top()
            .map(|(pos, item)| (pos, item.id()))
            .collect();
        assert_eq!(top, vec![(0, ItemId(0)), (2, ItemId(2))]);
    }

    #[test]
    fn looks_up_without_removing() {
        let pool = pool_of(&[1000.0, 1200.0, 1400.0]);
        let found: Vec<ItemId> = pool
            .lookup(&[ItemId(2), ItemId(0)])
            .unwrap()
            .into_iter()
            .map(Item::id)
            .collect();
        assert_eq!(found, vec![ItemId(2), ItemId(0)]);
        assert_eq!(pool.len(), 3);
        assert_eq!(
            pool.lookup(&[ItemId(1), ItemId(1)]),
            Err(PoolError::DuplicateRequest(ItemId(1)))
        );
        assert_eq!(pool.lookup(&[ItemId(7)]), Err(PoolError::NotFound(ItemId(7))));
    }

    #[test]
    fn removes_by_identity_and_keeps_order() {
        let mut pool = pool_of(&[1000.0, 1000.0, 1000.0, 1200.0]);
        let removed = pool.remove(&[ItemId(2), ItemId(0)]).unwrap();

        let removed_ids: Vec<ItemId> = removed.iter().map(Item::id).collect();
        assert_eq!(removed_ids, vec![ItemId(2), ItemId(0)]);
        let left: Vec<ItemId> = pool.items().iter().map(Item::id).collect();
        assert_eq!(left, vec![ItemId(1), ItemId(3)]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn missing_item_leaves_pool_untouched() {
        let mut pool = pool_of(&[1000.0, 1100.0]);
        let err = pool.remove(&[ItemId(0), ItemId(7)]).unwrap_err();
        assert_eq!(err, PoolError::NotFound(ItemId(7)));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn duplicate_request_is_rejected() {
        let mut pool = pool_of(&[1000.0]);
        assert_eq!(
            pool.remove(&[ItemId(0), ItemId(0)]),
            Err(PoolError::DuplicateRequest(ItemId(0)))
        );
        assert!(!pool.is_empty());
    }

    #[test]
    fn duplicate_ids_are_rejected_on_construction() {
        let a = Item::new(ItemId(4), "P", 1000.0, 1150.0).unwrap();
        let b = a.clone();
        assert_eq!(
            ItemPool::new(vec![a, b]).unwrap_err(),
            PoolError::DuplicateItem(ItemId(4))
        );
    }

    #[test]
    fn tracks_total_weight() {
        let mut pool = pool_of(&[1000.0, 2000.0]);
        assert!((pool.total_weight() - 3450.0).abs() < 1e-9);
        pool.remove(&[ItemId(1)]).unwrap();
        assert!((pool.total_weight() - 1150.0).abs() < 1e-9);
        assert_eq!(pool.into_items().len(), 1);
    }
}
