//! Array-backed binary min-heap keyed by `(key: f64, slot: u32)`.
//!
//! The heap never owns its backing storage: callers pass the arena slices
//! in directly, the way [`crate::runset`] shares its three arenas across a
//! level, rather than caching pointers into a private `Vec`.

/// One entry of the heap: a ranking key and the arena slot it refers to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeapPair {
    pub key: f64,
    pub slot: u32,
}

/// Insert `(slot, key)` at the end of `arr[0..len]` and sift it up.
///
/// `arr` must have room for at least `len + 1` entries; the caller (a
/// [`crate::runset::RunSet`] priming a heap) tracks `len` itself since a
/// single arena backs many heaps at once.
pub fn insert(arr: &mut [HeapPair], len: usize, slot: u32, key: f64) {
    let mut i = len;
    arr[i] = HeapPair { key, slot };
    while i > 0 {
        let parent = (i - 1) / 2;
        if arr[parent].key <= arr[i].key {
            break;
        }
        arr.swap(parent, i);
        i = parent;
    }
}

/// Pop the `pop` smallest-key entries from `arr[0..len]`, writing their
/// slots into `out[0..pop]` in ascending-key order. Ties broken by
/// whichever entry the sift-down mechanics surface first; callers must not
/// rely on a specific tie order.
///
/// `pop` must not exceed `len`. A `pop` of zero is a valid no-op; callers
/// that want every entry drained pass `len` as `pop` explicitly rather than
/// relying on some other sentinel value.
pub fn depopulate(arr: &mut [HeapPair], len: usize, out: &mut [u32], pop: usize) {
    debug_assert!(pop <= len, "cannot pop more entries than the heap holds");
    let mut heap_len = len;
    for slot_out in out.iter_mut().take(pop) {
        *slot_out = arr[0].slot;
        heap_len -= 1;
        if heap_len > 0 {
            arr[0] = arr[heap_len];
            sift_down(arr, heap_len, 0);
        }
    }
}

fn sift_down(arr: &mut [HeapPair], len: usize, mut i: usize) {
    loop {
        let l = 2 * i + 1;
        let r = 2 * i + 2;
        let mut smallest = i;
        if l < len && arr[l].key < arr[smallest].key {
            smallest = l;
        }
        if r < len && arr[r].key < arr[smallest].key {
            smallest = r;
        }
        if smallest == i {
            break;
        }
        arr.swap(i, smallest);
        i = smallest;
    }
}
