//! Virtual full-image arrays.
//!
//! Multi-pass algorithms (progressive scan assembly, Huffman-optimized
//! emission, two-pass color quantization) need a logical full-image 2-D
//! array of sample rows or coefficient block rows, while single-pass paths
//! must avoid that memory cost. A [`VirtualArray`] serves windowed access
//! to such an array; callers request `[start, start+count)` and receive a
//! window valid only until the next request.
//!
//! Access discipline: within a pass, requested window starts are
//! monotonically non-decreasing. An array created with a ring depth keeps
//! only that many rows resident, reusing (and zeroing) storage as the
//! window advances; everything older than the declared depth is gone.
//!
//! This is the only component that allocates large buffers; allocation is
//! fallible and surfaces [`Error::AllocationFailed`](crate::Error).

use crate::error::{Error, Result};

/// Allocate a zero-initialized Vec with fallible allocation.
pub(crate) fn try_alloc_vec<T: Clone>(value: T, len: usize) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)?;
    v.resize(len, value);
    Ok(v)
}

/// Element zero value used when (re)initializing rows.
///
/// Stands in for `Default`, which the standard library does not implement
/// for arrays longer than 32 elements such as [`DctBlock`](crate::types::DctBlock).
pub trait Zeroed: Copy {
    /// The all-zero value of this element type.
    fn zeroed() -> Self;
}

impl Zeroed for u8 {
    fn zeroed() -> Self {
        0
    }
}

impl Zeroed for crate::types::DctBlock {
    fn zeroed() -> Self {
        [0; crate::consts::DCTSIZE2]
    }
}

/// A page-addressable 2-D array of rows that may exceed the working set.
///
/// `T` is one element of a row: a sample (`u8`) or a coefficient block
/// (`DctBlock`).
#[derive(Debug)]
pub struct VirtualArray<T: Zeroed> {
    /// Elements per row
    row_len: usize,
    /// Logical rows in the full image
    rows_total: u32,
    /// Resident rows for ring-buffered arrays; `None` = fully resident
    ring_depth: Option<u32>,
    /// Row storage; for ring arrays, indexed modulo the depth
    rows: Vec<Vec<T>>,
    /// Start of the most recent window (monotonicity check)
    window_start: u32,
    /// One past the highest row ever materialized this pass
    loaded_end: u32,
}

impl<T: Zeroed> VirtualArray<T> {
    /// Create a fully resident array of `rows_total` x `row_len`, zeroed.
    pub fn new(row_len: usize, rows_total: u32) -> Result<Self> {
        let mut rows = Vec::new();
        rows.try_reserve_exact(rows_total as usize)?;
        for _ in 0..rows_total {
            rows.push(try_alloc_vec(T::zeroed(), row_len)?);
        }
        Ok(Self {
            row_len,
            rows_total,
            ring_depth: None,
            rows,
            window_start: 0,
            loaded_end: rows_total,
        })
    }

    /// Create a ring-buffered array: logically `rows_total` rows, but only
    /// `depth` resident at a time.
    pub fn new_ring(row_len: usize, rows_total: u32, depth: u32) -> Result<Self> {
        if depth == 0 || depth > rows_total {
            return Err(Error::InternalError("bad ring depth"));
        }
        let mut rows = Vec::new();
        rows.try_reserve_exact(depth as usize)?;
        for _ in 0..depth {
            rows.push(try_alloc_vec(T::zeroed(), row_len)?);
        }
        Ok(Self {
            row_len,
            rows_total,
            ring_depth: Some(depth),
            rows,
            window_start: 0,
            loaded_end: 0,
        })
    }

    /// Elements per row.
    pub fn row_len(&self) -> usize {
        self.row_len
    }

    /// Logical number of rows.
    pub fn rows_total(&self) -> u32 {
        self.rows_total
    }

    /// Reset the access cursor for a new pass. Contents are preserved (a
    /// crank-dest pass replays data saved by an earlier pass).
    pub fn start_pass(&mut self) {
        self.window_start = 0;
        if self.ring_depth.is_some() {
            self.loaded_end = 0;
        }
    }

    /// Request the window `[start, start+count)`.
    ///
    /// The returned window is valid only until the next `access` call.
    /// Window starts must be monotonically non-decreasing within a pass;
    /// for ring arrays the window must also fit within the declared depth.
    pub fn access(&mut self, start: u32, count: u32) -> Result<RowWindow<'_, T>> {
        let end = start.checked_add(count).filter(|&e| e <= self.rows_total);
        let end = match end {
            Some(e) if count > 0 => e,
            _ => return Err(Error::BadArrayAccess { start, count }),
        };
        if start < self.window_start {
            return Err(Error::BadArrayAccess { start, count });
        }
        if let Some(depth) = self.ring_depth {
            if count > depth {
                return Err(Error::BadArrayAccess { start, count });
            }
            // Rows older than the ring depth (relative to the furthest row
            // this window reaches) are no longer resident.
            if start + depth < end.max(self.loaded_end) {
                return Err(Error::BadArrayAccess { start, count });
            }
            // Zero rows entering the window for the first time; their
            // storage slots were last used by evicted rows.
            for row in self.loaded_end..end {
                let slot = (row % depth) as usize;
                self.rows[slot].fill(T::zeroed());
            }
            self.loaded_end = self.loaded_end.max(end);
        }
        self.window_start = start;
        Ok(RowWindow {
            rows: &mut self.rows,
            start,
            count,
            ring_depth: self.ring_depth,
        })
    }
}

/// A borrowed window of rows served by [`VirtualArray::access`].
#[derive(Debug)]
pub struct RowWindow<'a, T> {
    rows: &'a mut Vec<Vec<T>>,
    start: u32,
    count: u32,
    ring_depth: Option<u32>,
}

impl<'a, T> RowWindow<'a, T> {
    /// Number of rows in the window.
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// True if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn slot(&self, index: usize) -> usize {
        assert!(index < self.count as usize, "row index out of window");
        let row = self.start + index as u32;
        match self.ring_depth {
            Some(depth) => (row % depth) as usize,
            None => row as usize,
        }
    }

    /// Immutable view of window row `index`.
    pub fn row(&self, index: usize) -> &[T] {
        &self.rows[self.slot(index)]
    }

    /// Mutable view of window row `index`.
    pub fn row_mut(&mut self, index: usize) -> &mut [T] {
        let slot = self.slot(index);
        &mut self.rows[slot]
    }

    /// Mutable views of two distinct window rows.
    pub fn two_rows_mut(&mut self, a: usize, b: usize) -> (&mut [T], &mut [T]) {
        let sa = self.slot(a);
        let sb = self.slot(b);
        assert_ne!(sa, sb, "rows must be distinct");
        if sa < sb {
            let (lo, hi) = self.rows.split_at_mut(sb);
            (&mut lo[sa], &mut hi[0])
        } else {
            let (lo, hi) = self.rows.split_at_mut(sa);
            (&mut hi[0], &mut lo[sb])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_array_round_trip() {
        let mut arr: VirtualArray<u8> = VirtualArray::new(4, 8).unwrap();
        {
            let mut w = arr.access(0, 8).unwrap();
            for i in 0..8 {
                w.row_mut(i).fill(i as u8);
            }
        }
        arr.start_pass();
        let w = arr.access(2, 3).unwrap();
        assert_eq!(w.row(0), &[2, 2, 2, 2]);
        assert_eq!(w.row(2), &[4, 4, 4, 4]);
    }

    #[test]
    fn test_monotonic_window_enforced() {
        let mut arr: VirtualArray<u8> = VirtualArray::new(4, 8).unwrap();
        arr.access(3, 2).unwrap();
        let err = arr.access(1, 2).unwrap_err();
        assert!(matches!(err, Error::BadArrayAccess { start: 1, count: 2 }));
        // Re-requesting the same start is fine.
        arr.access(3, 2).unwrap();
        // And a new pass resets the cursor.
        arr.start_pass();
        arr.access(0, 1).unwrap();
    }

    #[test]
    fn test_out_of_bounds_window_rejected() {
        let mut arr: VirtualArray<u8> = VirtualArray::new(4, 8).unwrap();
        assert!(arr.access(6, 3).is_err());
        assert!(arr.access(0, 0).is_err());
    }

    #[test]
    fn test_ring_advances_and_zeroes() {
        let mut arr: VirtualArray<u8> = VirtualArray::new_ring(2, 10, 3).unwrap();
        {
            let mut w = arr.access(0, 3).unwrap();
            for i in 0..3 {
                w.row_mut(i).fill(10 + i as u8);
            }
        }
        // Advance by one: rows 1..4; row 3 reuses the slot of evicted row 0
        // and must come back zeroed, not stale.
        {
            let w = arr.access(1, 3).unwrap();
            assert_eq!(w.row(0), &[11, 11]);
            assert_eq!(w.row(1), &[12, 12]);
            assert_eq!(w.row(2), &[0, 0]);
        }
        // Row 0 is now beyond the ring depth.
        assert!(arr.access(0, 3).is_err());
    }

    #[test]
    fn test_ring_window_wider_than_depth_rejected() {
        let mut arr: VirtualArray<u8> = VirtualArray::new_ring(2, 10, 3).unwrap();
        assert!(arr.access(0, 4).is_err());
    }

    #[test]
    fn test_two_rows_mut() {
        let mut arr: VirtualArray<u8> = VirtualArray::new(2, 4).unwrap();
        let mut w = arr.access(0, 4).unwrap();
        let (a, b) = w.two_rows_mut(0, 3);
        a.fill(1);
        b.fill(2);
        assert_eq!(w.row(0), &[1, 1]);
        assert_eq!(w.row(3), &[2, 2]);
    }
}
