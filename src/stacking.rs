//! Stacking helpers for pairing bottom and top coils.
//!
//! A container has two tiers. The coil in bottom slot `i` carries the coil in
//! top slot `i`; both tiers are paired in length-ascending order, which keeps
//! the tallest combined stack as low as possible.

use std::borrow::Borrow;
use std::cmp::Ordering;

use crate::model::Item;

/// Canonical pairing order: length ascending, then weight, then id.
///
/// # Parameters
/// * `a` - First item
/// * `b` - Second item
pub fn pairing_cmp(a: &Item, b: &Item) -> Ordering {
    a.length()
        .total_cmp(&b.length())
        .then_with(|| a.weight().total_cmp(&b.weight()))
        .then_with(|| a.id().cmp(&b.id()))
}

/// Sorts a tier into pairing order.
///
/// Works on owned items as well as on references.
pub fn sort_for_pairing<I: Borrow<Item>>(items: &mut [I]) {
    items.sort_by(|a, b| pairing_cmp(a.borrow(), b.borrow()));
}

/// Combined height of each bottom/top pair.
///
/// Both slices must already be in pairing order. Unpaired slots of the longer
/// tier are not reported.
pub fn paired_heights<'a>(bottom: &'a [f64], top: &'a [f64]) -> impl Iterator<Item = f64> + 'a {
    bottom.iter().zip(top).map(|(b, t)| b + t)
}

/// Counts the pairs whose combined height stays within `max_paired_length`.
pub fn compatible_pairs(bottom: &[f64], top: &[f64], max_paired_length: f64) -> usize {
    paired_heights(bottom, top)
        .filter(|height| *height <= max_paired_length)
        .count()
}

/// Returns the first pair that exceeds `max_paired_length`, with its height.
pub fn first_overhang(bottom: &[f64], top: &[f64], max_paired_length: f64) -> Option<(usize, f64)> {
    paired_heights(bottom, top)
        .enumerate()
        .find(|(_, height)| *height > max_paired_length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemId;

    #[test]
    fn pairing_order_breaks_ties_by_weight_then_id() {
        let mut items = vec![
            Item::new(ItemId(3), "A", 1000.0, 1200.0).unwrap(),
            Item::new(ItemId(1), "A", 1000.0, 1150.0).unwrap(),
            Item::new(ItemId(2), "A", 900.0, 1300.0).unwrap(),
            Item::new(ItemId(0), "A", 1000.0, 1150.0).unwrap(),
        ];
        sort_for_pairing(&mut items);
        let ids: Vec<usize> = items.iter().map(|i| i.id().0).collect();
        assert_eq!(ids, vec![2, 0, 1, 3]);
    }

    #[test]
    fn sorts_references_too() {
        let a = Item::new(ItemId(0), "A", 1400.0, 1.0).unwrap();
        let b = Item::new(ItemId(1), "A", 1100.0, 1.0).unwrap();
        let mut refs = vec![&a, &b];
        sort_for_pairing(&mut refs);
        assert_eq!(refs[0].id(), ItemId(1));
    }

    #[test]
    fn paired_heights_stop_at_shorter_tier() {
        let heights: Vec<f64> = paired_heights(&[1000.0, 1400.0, 1600.0], &[1200.0]).collect();
        assert_eq!(heights, vec![2200.0]);
    }

    #[test]
    fn counts_compatible_pairs() {
        let bottom = [1200.0, 1400.0, 1500.0];
        let top = [1200.0, 1250.0, 1100.0];
        assert_eq!(compatible_pairs(&bottom, &top, 2650.0), 2);
    }

    #[test]
    fn finds_first_overhang() {
        let bottom = [1000.0, 1500.0];
        let top = [1200.0, 1200.0];
        assert_eq!(first_overhang(&bottom, &top, 2650.0), Some((1, 2700.0)));
        assert_eq!(first_overhang(&bottom, &top, 2700.0), None);
        assert_eq!(first_overhang(&bottom, &[], 10.0), None);
    }
}
