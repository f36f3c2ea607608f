//! Sorting and paging of ordered row sets.

use std::cmp::Ordering;

use roster_core::Value;

use crate::args::SortOrder;

/// Compare two sort keys.
///
/// NULLs are placed by `nulls_first` independently of `direction`; values
/// that do not order against each other compare equal so that a stable sort
/// keeps their store order.
#[must_use]
pub fn compare_sort_values(a: &Value, b: &Value, direction: SortOrder, nulls_first: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            if nulls_first {
                Ordering::Less
            } else {
                Ordering::Greater
            }
        }
        (false, true) => {
            if nulls_first {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        }
        (false, false) => {
            let ord = a.compare(b).unwrap_or(Ordering::Equal);
            match direction {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
    }
}

/// Cut a page out of an ordered sequence.
///
/// Forward pages start at `anchor` (or the beginning), skip `skip` rows and
/// keep `take` rows. A negative `take` pages backwards: the page ends at
/// `anchor` inclusive (or the end), `skip` rows earlier, and keeps the
/// original order.
#[must_use]
pub fn page<T>(mut items: Vec<T>, anchor: Option<usize>, skip: Option<u64>, take: Option<i64>) -> Vec<T> {
    let len = items.len();
    let skip = usize::try_from(skip.unwrap_or(0)).unwrap_or(usize::MAX);
    let (start, end) = match take {
        Some(n) if n < 0 => {
            let n = usize::try_from(n.unsigned_abs()).unwrap_or(usize::MAX);
            let end = anchor.map_or(len, |i| i + 1).saturating_sub(skip);
            (end.saturating_sub(n), end)
        }
        Some(n) => {
            let n = usize::try_from(n).unwrap_or(usize::MAX);
            let start = anchor.unwrap_or(0).saturating_add(skip).min(len);
            (start, start.saturating_add(n).min(len))
        }
        None => (anchor.unwrap_or(0).saturating_add(skip).min(len), len),
    };
    items.truncate(end);
    items.drain(..start);
    items
}
