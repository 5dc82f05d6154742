//! Fixed open-addressing hash bucket table: `buckets * entries_per_bucket`
//! fixed-width slots, bucket selected from the first 4 bytes of the
//! content hash, linear probing within the bucket on collision (§4.4).

use crate::chunk_cache::HashEntryChunkCache;
use crate::error::ActionError;
use crate::types::HashEntryView;
use crate::volume::StripedVolume;
use anyhow::Result;

/// One occupied slot surfaced by `iterate`/`lookup`: its global entry
/// index plus the fields callers typically want without re-opening the
/// view.
#[derive(Debug, Clone)]
pub struct FoundEntry {
    pub index: usize,
    pub hash: Vec<u8>,
    pub chunk: u64,
    pub offset: u64,
    pub len: u64,
    pub ts_creation: u64,
    pub flags: u32,
    pub mime: String,
    pub name: String,
    pub encoding: String,
}

pub struct BucketTable;

impl BucketTable {
    /// Finds the occupied slot, if any, carrying `hash` exactly.
    pub fn lookup(
        cache: &mut HashEntryChunkCache,
        vol: &mut StripedVolume,
        hash: &[u8],
    ) -> Result<Option<FoundEntry>> {
        let geom = *cache.geometry();
        let bucket = geom.bucket_of(hash);
        let base = bucket * geom.entries_per_bucket;
        for i in 0..geom.entries_per_bucket {
            let index = base + i;
            let raw = cache.entry_at(vol, index)?;
            let view = HashEntryView::new(geom.hlen, raw);
            if view.is_vacant() {
                continue;
            }
            if view.hash() == hash {
                return Ok(Some(to_found(index, &view)));
            }
        }
        Ok(None)
    }

    /// Inserts a new entry for `hash` into its bucket's first vacant
    /// slot. Fails with `ActionError::Duplicate` if `hash` is already
    /// present, or `ActionError::BucketFull` if every slot in the
    /// bucket is occupied by a different hash.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        cache: &mut HashEntryChunkCache,
        vol: &mut StripedVolume,
        hash: &[u8],
        chunk: u64,
        offset: u64,
        len: u64,
        ts_creation: u64,
        flags: u32,
        mime: &str,
        name: &str,
        encoding: &str,
    ) -> Result<()> {
        let geom = *cache.geometry();
        let bucket = geom.bucket_of(hash);
        let base = bucket * geom.entries_per_bucket;
        let mut vacant_index = None;

        for i in 0..geom.entries_per_bucket {
            let index = base + i;
            let raw = cache.entry_at(vol, index)?;
            let view = HashEntryView::new(geom.hlen, raw);
            if view.is_vacant() {
                if vacant_index.is_none() {
                    vacant_index = Some(index);
                }
                continue;
            }
            if view.hash() == hash {
                return Err(ActionError::Duplicate.into());
            }
        }

        let index = vacant_index.ok_or(ActionError::BucketFull)?;
        let raw = cache.entry_at(vol, index)?;
        let mut view = HashEntryView::new(geom.hlen, raw);
        view.set_hash(hash);
        view.set_chunk(chunk);
        view.set_offset(offset);
        view.set_len(len);
        view.set_ts_creation(ts_creation);
        view.set_flags(flags);
        view.set_mime(mime);
        view.set_name(name);
        view.set_encoding(encoding);
        cache.mark_dirty(index);
        Ok(())
    }

    /// Clears the `hash` field of the slot carrying `hash`, leaving
    /// every other field untouched on disk (§9 open question: removed
    /// entries are never read back by their stale fields).
    pub fn remove(cache: &mut HashEntryChunkCache, vol: &mut StripedVolume, hash: &[u8]) -> Result<()> {
        let geom = *cache.geometry();
        let bucket = geom.bucket_of(hash);
        let base = bucket * geom.entries_per_bucket;
        for i in 0..geom.entries_per_bucket {
            let index = base + i;
            let raw = cache.entry_at(vol, index)?;
            let mut view = HashEntryView::new(geom.hlen, raw);
            if view.is_vacant() {
                continue;
            }
            if view.hash() == hash {
                view.clear_hash();
                cache.mark_dirty(index);
                return Ok(());
            }
        }
        Err(ActionError::NoSuchHash.into())
    }

    /// Returns every occupied slot across the whole table, in bucket
    /// then in-bucket order, for `ls`/`info`.
    pub fn iterate(cache: &mut HashEntryChunkCache, vol: &mut StripedVolume) -> Result<Vec<FoundEntry>> {
        let geom = *cache.geometry();
        let mut found = Vec::new();
        for index in 0..geom.nb_entries() {
            let raw = cache.entry_at(vol, index)?;
            let view = HashEntryView::new(geom.hlen, raw);
            if !view.is_vacant() {
                found.push(to_found(index, &view));
            }
        }
        Ok(found)
    }

    /// Global entry index of the occupied slot carrying `hash`, if any.
    /// Exposed so callers that need to mutate a field in place (e.g.
    /// `set-default`/`clear-default` flipping the flags byte) don't
    /// have to re-implement the bucket probe.
    pub fn find_index(cache: &mut HashEntryChunkCache, vol: &mut StripedVolume, hash: &[u8]) -> Result<Option<usize>> {
        let geom = *cache.geometry();
        let bucket = geom.bucket_of(hash);
        let base = bucket * geom.entries_per_bucket;
        for i in 0..geom.entries_per_bucket {
            let index = base + i;
            let raw = cache.entry_at(vol, index)?;
            let view = HashEntryView::new(geom.hlen, raw);
            if view.is_vacant() {
                continue;
            }
            if view.hash() == hash {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    /// Overwrites the flags field of entry `index` in place.
    pub fn set_flags_at(cache: &mut HashEntryChunkCache, vol: &mut StripedVolume, index: usize, flags: u32) -> Result<()> {
        let hlen = cache.geometry().hlen;
        let raw = cache.entry_at(vol, index)?;
        let mut view = HashEntryView::new(hlen, raw);
        view.set_flags(flags);
        cache.mark_dirty(index);
        Ok(())
    }
}

fn to_found(index: usize, view: &HashEntryView) -> FoundEntry {
    FoundEntry {
        index,
        hash: view.hash().to_vec(),
        chunk: view.chunk(),
        offset: view.offset(),
        len: view.len(),
        ts_creation: view.ts_creation(),
        flags: view.flags(),
        mime: crate::types::fixed_str_to_string(view.mime()),
        name: crate::types::fixed_str_to_string(view.name()),
        encoding: crate::types::fixed_str_to_string(view.encoding()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;
    use crate::types::{HtableGeometry, StripeMode};
    use std::io::Write as _;

    fn make_disk(size: u64) -> Disk {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0_u8; size as usize]).unwrap();
        let (file, path) = tmp.keep().unwrap();
        drop(file);
        Disk::open(&path).unwrap()
    }

    fn make_env() -> (StripedVolume, HashEntryChunkCache) {
        let disk = make_disk(256 * 4096);
        let vol = StripedVolume::new(vec![disk], 4096, StripeMode::Independent, 256);
        let entry_size = HashEntryView::entry_size(32);
        let geom = HtableGeometry {
            htable_ref: 2,
            htable_bak_ref: 0,
            htable_len: 16,
            entries_per_chunk: 4096 / entry_size,
            entry_size,
            buckets: 8,
            entries_per_bucket: 4,
            hlen: 32,
        };
        (vol, HashEntryChunkCache::new(geom))
    }

    #[test]
    fn add_lookup_remove_roundtrip() {
        let (mut vol, mut cache) = make_env();
        let hash = [3_u8; 32];
        BucketTable::add(&mut cache, &mut vol, &hash, 10, 0, 42, 1000, 0, "text/plain", "foo", "").unwrap();

        let found = BucketTable::lookup(&mut cache, &mut vol, &hash).unwrap().unwrap();
        assert_eq!(found.chunk, 10);
        assert_eq!(found.len, 42);
        assert_eq!(found.name, "foo");

        BucketTable::remove(&mut cache, &mut vol, &hash).unwrap();
        assert!(BucketTable::lookup(&mut cache, &mut vol, &hash).unwrap().is_none());
    }

    #[test]
    fn duplicate_add_rejected() {
        let (mut vol, mut cache) = make_env();
        let hash = [5_u8; 32];
        BucketTable::add(&mut cache, &mut vol, &hash, 1, 0, 1, 1, 0, "", "a", "").unwrap();
        let err = BucketTable::add(&mut cache, &mut vol, &hash, 2, 0, 1, 1, 0, "", "b", "").unwrap_err();
        assert!(err.downcast_ref::<ActionError>().is_some());
    }

    #[test]
    fn bucket_full_rejected() {
        let (mut vol, mut cache) = make_env();
        let geom = *cache.geometry();
        let bucket = 3_usize;
        for i in 0..geom.entries_per_bucket {
            let mut hash = [0_u8; 32];
            hash[0..4].copy_from_slice(&(bucket as u32).to_le_bytes());
            hash[4] = i as u8 + 1;
            BucketTable::add(&mut cache, &mut vol, &hash, i as u64, 0, 1, 1, 0, "", "x", "").unwrap();
        }
        let mut overflow_hash = [0_u8; 32];
        overflow_hash[0..4].copy_from_slice(&(bucket as u32).to_le_bytes());
        overflow_hash[4] = 99;
        let err = BucketTable::add(&mut cache, &mut vol, &overflow_hash, 9, 0, 1, 1, 0, "", "y", "").unwrap_err();
        assert!(matches!(err.downcast_ref::<ActionError>(), Some(ActionError::BucketFull)));
    }
}
