//! Chunk allocator: tracks which chunks of the data region are free,
//! hands out runs on request, and reclaims them on release (§4.5).
//! `FirstFitAllocator` is the sole implementor (§9 open question); the
//! trait exists so a future allocator kind slots in without touching
//! callers.

use crate::error::ActionError;
use anyhow::Result;

/// A strategy for finding and releasing chunk runs within
/// `[region_start, region_start + region_len)`.
pub trait ChunkAllocatorStrategy {
    /// Marks `[chunk, chunk + len)` as allocated. Used both to seed the
    /// allocator from an on-disk scan at mount and to commit a fresh
    /// reservation. Fails with `ActionError::Overlap` if any chunk in
    /// the range is already reserved.
    fn register(&mut self, chunk: u64, len: u64) -> Result<()>;

    /// Marks `[chunk, chunk + len)` as free again, coalescing with
    /// adjacent free runs. Fails with `ActionError::NotReserved` if any
    /// chunk in the range isn't currently reserved.
    fn unregister(&mut self, chunk: u64, len: u64) -> Result<()>;

    /// Finds and reserves the first free run of at least `len` chunks,
    /// returning its start chunk.
    fn find_free(&mut self, len: u64) -> Result<u64>;
}

/// First-fit allocator over an ordered list of free `[start, end)`
/// chunk intervals.
pub struct FirstFitAllocator {
    region_start: u64,
    region_len: u64,
    /// sorted, non-overlapping, non-adjacent free intervals
    free: Vec<(u64, u64)>,
}

impl FirstFitAllocator {
    /// Creates an allocator over `[region_start, region_start +
    /// region_len)`, entirely free.
    pub fn new(region_start: u64, region_len: u64) -> FirstFitAllocator {
        FirstFitAllocator {
            region_start,
            region_len,
            free: vec![(region_start, region_start + region_len)],
        }
    }

    fn region_end(&self) -> u64 {
        self.region_start + self.region_len
    }
}

impl FirstFitAllocator {
    /// Total chunks of `[start, end)` currently covered by the free
    /// list. Equal to `end - start` iff the whole range is free.
    fn free_coverage(&self, start: u64, end: u64) -> u64 {
        self.free
            .iter()
            .map(|&(fs, fe)| fs.max(start)..fe.min(end))
            .filter(|r| r.start < r.end)
            .map(|r| r.end - r.start)
            .sum()
    }
}

impl ChunkAllocatorStrategy for FirstFitAllocator {
    fn register(&mut self, chunk: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let start = chunk;
        let end = chunk + len;
        if self.free_coverage(start, end) != len {
            return Err(ActionError::Overlap.into());
        }

        let mut next = Vec::with_capacity(self.free.len());
        for (fs, fe) in self.free.drain(..) {
            if fe <= start || end <= fs {
                next.push((fs, fe));
                continue;
            }
            if fs < start {
                next.push((fs, start));
            }
            if end < fe {
                next.push((end, fe));
            }
        }
        next.sort_unstable();
        self.free = next;
        Ok(())
    }

    fn unregister(&mut self, chunk: u64, len: u64) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let start = chunk;
        let end = chunk + len;
        if self.free_coverage(start, end) != 0 {
            return Err(ActionError::NotReserved.into());
        }

        self.free.push((start, end));
        self.free.sort_unstable();

        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.free.len());
        for (fs, fe) in self.free.drain(..) {
            match merged.last_mut() {
                Some((_, last_end)) if fs <= *last_end => {
                    *last_end = (*last_end).max(fe);
                }
                _ => merged.push((fs, fe)),
            }
        }
        self.free = merged;
        Ok(())
    }

    fn find_free(&mut self, len: u64) -> Result<u64> {
        if len == 0 || self.region_start + len > self.region_end() {
            return Err(ActionError::NoSpace.into());
        }
        for i in 0..self.free.len() {
            let (fs, fe) = self.free[i];
            if fe - fs >= len {
                let start = fs;
                self.register(start, len)?;
                return Ok(start);
            }
        }
        Err(ActionError::NoSpace.into())
    }
}
