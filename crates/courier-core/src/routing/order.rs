//! Match-order sorting.
//!
//! [`Rule::match_compare`] is not a consistent total order, so the final
//! order depends on the sorting algorithm. Rules are sorted with a binary
//! insertion sort seeded by the leading natural run, comparing only through
//! "is less than". For fewer than 64 rules this reproduces the classic
//! timsort small-array path exactly. Larger maps use the same procedure,
//! which is stable but may order inconsistent pairs differently from a full
//! run-merging timsort.

use std::cmp::Ordering;
use std::sync::Arc;

use super::rule::Rule;

/// Sorts rules so the first match-order candidate comes first.
pub(crate) fn sort_rules(rules: &mut [Arc<Rule>]) {
    sort_by_less(rules, |a, b| a.match_compare(b) == Ordering::Less);
}

pub(crate) fn sort_by_less<T, F>(v: &mut [T], mut less: F)
where
    F: FnMut(&T, &T) -> bool,
{
    if v.len() < 2 {
        return;
    }
    let run = leading_run(v, &mut less);
    binary_insertion(v, run, &mut less);
}

/// Length of the natural run at the start of `v`. A strictly descending run
/// is reversed in place.
fn leading_run<T, F>(v: &mut [T], less: &mut F) -> usize
where
    F: FnMut(&T, &T) -> bool,
{
    let n = v.len();
    let mut run = 2;
    if less(&v[1], &v[0]) {
        while run < n && less(&v[run], &v[run - 1]) {
            run += 1;
        }
        v[..run].reverse();
    } else {
        while run < n && !less(&v[run], &v[run - 1]) {
            run += 1;
        }
    }
    run
}

/// Inserts `v[start..]` one by one into the sorted prefix `v[..start]`.
fn binary_insertion<T, F>(v: &mut [T], start: usize, less: &mut F)
where
    F: FnMut(&T, &T) -> bool,
{
    for i in start..v.len() {
        let (mut lo, mut hi) = (0, i);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if less(&v[i], &v[mid]) {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        v[lo..=i].rotate_right(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::ConverterRegistry;
    use proptest::prelude::*;

    fn bound(pattern: &str) -> Arc<Rule> {
        let mut rule = Rule::new(pattern).endpoint(pattern);
        rule.bind(1, &ConverterRegistry::new(), false).unwrap();
        Arc::new(rule)
    }

    #[test]
    fn test_longer_literal_first() {
        let mut rules = vec![bound("ping"), bound("ping me"), bound("ping <user>")];
        sort_rules(&mut rules);
        let order: Vec<&str> = rules.iter().map(|r| r.endpoint_name()).collect();
        assert_eq!(order, vec!["ping me", "ping <user>", "ping"]);
    }

    #[test]
    fn test_descending_run_is_reversed() {
        let mut v = vec![5, 4, 3, 9, 1];
        sort_by_less(&mut v, |a, b| a < b);
        assert_eq!(v, vec![1, 3, 4, 5, 9]);
    }

    #[test]
    fn test_inconsistent_comparator_is_deterministic() {
        // Equal rules compare "greater" both ways, so the run detector sees an
        // ascending run and leaves insertion order untouched.
        let mut rules = vec![bound("ping"), bound("ping"), bound("ping")];
        let before: Vec<*const Rule> = rules.iter().map(Arc::as_ptr).collect();
        sort_rules(&mut rules);
        let after: Vec<*const Rule> = rules.iter().map(Arc::as_ptr).collect();
        assert_eq!(before, after);
    }

    proptest! {
        #[test]
        fn prop_sorts_like_std_for_total_orders(mut v in proptest::collection::vec(0u32..50, 0..40)) {
            let mut expected = v.clone();
            expected.sort();
            sort_by_less(&mut v, |a, b| a < b);
            prop_assert_eq!(v, expected);
        }

        #[test]
        fn prop_stable_for_equal_keys(keys in proptest::collection::vec(0u8..4, 0..40)) {
            let mut v: Vec<(u8, usize)> = keys.into_iter().enumerate().map(|(i, k)| (k, i)).collect();
            let mut expected = v.clone();
            expected.sort_by_key(|(k, _)| *k);
            sort_by_less(&mut v, |a, b| a.0 < b.0);
            prop_assert_eq!(v, expected);
        }

        #[test]
        fn prop_literal_rules_sort_by_length(words in proptest::collection::btree_set("[a-z]{1,12}", 1..20)) {
            let mut rules: Vec<Arc<Rule>> = words.iter().map(|w| bound(w)).collect();
            sort_rules(&mut rules);
            let lengths: Vec<usize> = rules.iter().map(|r| r.pattern().len()).collect();
            let mut expected = lengths.clone();
            expected.sort_by(|a, b| b.cmp(a));
            prop_assert_eq!(lengths, expected);
        }
    }
}
