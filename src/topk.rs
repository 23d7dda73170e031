//! Top-K selection algorithms
//!
//! **Problem**: ranking a whole table to read its first K rows is O(N log N).
//!
//! **Solution**: Heap-based Top-K selection, O(N log K) time and O(K) space.
//! Used by the in-memory ranking store to answer `top_k` without sorting every
//! record.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::Error;

/// Sort order for Top-K selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order (smallest K values)
    Ascending,
    /// Descending order (largest K values)
    Descending,
}

/// `f64` with a total order (`NaN` sorts above every number).
#[derive(Debug, Clone, Copy)]
pub struct TotalF64(pub f64);

impl PartialEq for TotalF64 {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TotalF64 {}

impl PartialOrd for TotalF64 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TotalF64 {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

// Heap item for descending order (min-heap: keep smallest at top, so we can find largest K)
#[derive(Debug)]
struct MinHeapItem<V, T> {
    value: V,
    item: T,
}

impl<V: Ord, T> PartialEq for MinHeapItem<V, T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<V: Ord, T> Eq for MinHeapItem<V, T> {}

impl<V: Ord, T> Ord for MinHeapItem<V, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse comparison for min-heap (smallest at top)
        other.value.cmp(&self.value)
    }
}

impl<V: Ord, T> PartialOrd for MinHeapItem<V, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Heap item for ascending order (max-heap: keep largest at top, so we can find smallest K)
#[derive(Debug)]
struct MaxHeapItem<V, T> {
    value: V,
    item: T,
}

impl<V: Ord, T> PartialEq for MaxHeapItem<V, T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<V: Ord, T> Eq for MaxHeapItem<V, T> {}

impl<V: Ord, T> Ord for MaxHeapItem<V, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Normal comparison for max-heap (largest at top)
        self.value.cmp(&other.value)
    }
}

impl<V: Ord, T> PartialOrd for MaxHeapItem<V, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Select the K items with the largest (or smallest) key.
///
/// The result is ordered best-first: descending keys for
/// [`SortOrder::Descending`], ascending for [`SortOrder::Ascending`]. Items
/// with equal keys keep no particular order, so callers that need a stable
/// tie-break fold it into the key.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `k` is zero.
///
/// # Example
///
/// ```rust
/// use subset_ensemble::topk::{select_top_k, SortOrder, TotalF64};
///
/// let scores = vec![("a", 0.4), ("b", 0.9), ("c", 0.7)];
/// let top = select_top_k(scores, 2, SortOrder::Descending, |(_, s)| TotalF64(*s))?;
/// assert_eq!(top, vec![("b", 0.9), ("c", 0.7)]);
/// # Ok::<(), subset_ensemble::Error>(())
/// ```
pub fn select_top_k<I, T, V, F>(
    items: I,
    k: usize,
    order: SortOrder,
    key: F,
) -> crate::Result<Vec<T>>
where
    I: IntoIterator<Item = T>,
    V: Ord,
    F: Fn(&T) -> V,
{
    if k == 0 {
        return Err(Error::InvalidInput("k must be greater than 0".to_string()));
    }

    match order {
        SortOrder::Descending => {
            // Use min-heap to find largest K
            let mut heap: BinaryHeap<MinHeapItem<V, T>> = BinaryHeap::with_capacity(k);
            for item in items {
                let value = key(&item);
                if heap.len() < k {
                    heap.push(MinHeapItem { value, item });
                } else if let Some(top) = heap.peek() {
                    if value > top.value {
                        heap.pop();
                        heap.push(MinHeapItem { value, item });
                    }
                }
            }
            let mut result: Vec<_> = heap.into_vec();
            result.sort_by(|a, b| b.value.cmp(&a.value));
            Ok(result.into_iter().map(|entry| entry.item).collect())
        }
        SortOrder::Ascending => {
            // Use max-heap to find smallest K
            let mut heap: BinaryHeap<MaxHeapItem<V, T>> = BinaryHeap::with_capacity(k);
            for item in items {
                let value = key(&item);
                if heap.len() < k {
                    heap.push(MaxHeapItem { value, item });
                } else if let Some(top) = heap.peek() {
                    if value < top.value {
                        heap.pop();
                        heap.push(MaxHeapItem { value, item });
                    }
                }
            }
            let mut result: Vec<_> = heap.into_vec();
            result.sort_by(|a, b| a.value.cmp(&b.value));
            Ok(result.into_iter().map(|entry| entry.item).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Reverse;

    #[test]
    fn test_top_k_descending_basic() {
        let values = vec![1.0, 5.0, 3.0, 9.0, 2.0];
        let top = select_top_k(values, 3, SortOrder::Descending, |v| TotalF64(*v)).unwrap();
        assert_eq!(top, vec![9.0, 5.0, 3.0]);
    }

    #[test]
    fn test_top_k_ascending_basic() {
        let values = vec![1.0, 5.0, 3.0, 9.0, 2.0];
        let top = select_top_k(values, 3, SortOrder::Ascending, |v| TotalF64(*v)).unwrap();
        assert_eq!(top, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_top_k_k_greater_than_length() {
        let values = vec![2, 1, 3];
        let top = select_top_k(values, 10, SortOrder::Descending, |v| *v).unwrap();
        assert_eq!(top, vec![3, 2, 1]);
    }

    #[test]
    fn test_top_k_k_zero_fails() {
        let result = select_top_k(vec![1, 2], 0, SortOrder::Descending, |v| *v);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("k must be greater than 0"));
    }

    #[test]
    fn test_top_k_empty_input() {
        let values: Vec<i32> = vec![];
        let top = select_top_k(values, 3, SortOrder::Descending, |v| *v).unwrap();
        assert!(top.is_empty());
    }

    #[test]
    fn test_composite_key_breaks_ties() {
        let rows = vec![("b", 0.5), ("a", 0.5), ("c", 0.9), ("d", 0.1)];
        let top = select_top_k(rows, 3, SortOrder::Descending, |(name, s)| {
            (TotalF64(*s), Reverse(*name))
        })
        .unwrap();
        assert_eq!(top, vec![("c", 0.9), ("a", 0.5), ("b", 0.5)]);
    }

    #[test]
    fn test_total_f64_orders_nan_last() {
        let mut values = vec![TotalF64(f64::NAN), TotalF64(1.0), TotalF64(-1.0)];
        values.sort();
        assert!((values[0].0 + 1.0).abs() < f64::EPSILON);
        assert!(values[2].0.is_nan());
    }

    #[test]
    fn test_min_heap_item_ord() {
        let a = MinHeapItem { value: 1, item: () };
        let b = MinHeapItem { value: 2, item: () };
        // Reversed: smaller value is "greater" in the heap
        assert!(a > b);
        assert_eq!(a.partial_cmp(&b), Some(Ordering::Greater));
    }

    #[test]
    fn test_max_heap_item_ord() {
        let a = MaxHeapItem { value: 1, item: () };
        let b = MaxHeapItem { value: 2, item: () };
        assert!(a < b);
        assert_eq!(a, MaxHeapItem { value: 1, item: () });
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(100))]

            /// Property: result equals the first K of a full descending sort
            #[test]
            fn prop_matches_full_sort(
                values in prop::collection::vec(-1000i64..1000, 0..200),
                k in 1usize..50
            ) {
                let top = select_top_k(values.clone(), k, SortOrder::Descending, |v| *v).unwrap();
                let mut sorted = values;
                sorted.sort_by(|a, b| b.cmp(a));
                sorted.truncate(k);
                prop_assert_eq!(top, sorted);
            }

            /// Property: ascending result is sorted and at most K long
            #[test]
            fn prop_ascending_sorted(
                values in prop::collection::vec(0.0f64..1.0, 0..200),
                k in 1usize..50
            ) {
                let top = select_top_k(values.clone(), k, SortOrder::Ascending, |v| TotalF64(*v)).unwrap();
                prop_assert!(top.len() <= k);
                prop_assert_eq!(top.len(), values.len().min(k));
                for pair in top.windows(2) {
                    prop_assert!(pair[0] <= pair[1]);
                }
            }
        }
    }
}
