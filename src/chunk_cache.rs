//! Hash-Entry Chunk Cache: lazily loads hash-table chunks into memory
//! on first touch, tracks which ones have been written since load, and
//! flushes dirty chunks back to the primary (and, best-effort, backup)
//! hash-table region at unmount (§4.3).

use crate::types::HtableGeometry;
use crate::volume::StripedVolume;
use anyhow::{Context, Result};
use log::warn;
use std::collections::HashMap;

struct CachedChunk {
    buf: Vec<u8>,
    dirty: bool,
}

/// Caches hash-table chunks by logical chunk-table index (0-based,
/// relative to `geometry.htable_ref`), not by absolute volume chunk
/// number.
pub struct HashEntryChunkCache {
    geometry: HtableGeometry,
    chunks: HashMap<u64, CachedChunk>,
}

impl HashEntryChunkCache {
    pub fn new(geometry: HtableGeometry) -> HashEntryChunkCache {
        HashEntryChunkCache {
            geometry,
            chunks: HashMap::new(),
        }
    }

    pub fn geometry(&self) -> &HtableGeometry {
        &self.geometry
    }

    fn ensure_loaded(&mut self, vol: &mut StripedVolume, rel_chunk: u64) -> Result<()> {
        if self.chunks.contains_key(&rel_chunk) {
            return Ok(());
        }
        let mut buf = vec![0_u8; vol.chunksize as usize];
        vol.read_chunks(self.geometry.htable_ref + rel_chunk, 1, &mut buf)
            .with_context(|| format!("loading hash-table chunk {}", rel_chunk))?;
        self.chunks.insert(rel_chunk, CachedChunk { buf, dirty: false });
        Ok(())
    }

    /// Returns a mutable view of the `entry_size`-byte record at global
    /// entry index `index`, loading its backing chunk on first touch.
    pub fn entry_at(&mut self, vol: &mut StripedVolume, index: usize) -> Result<&mut [u8]> {
        let (chunk, offset) = self.geometry.locate(index);
        let rel_chunk = chunk - self.geometry.htable_ref;
        self.ensure_loaded(vol, rel_chunk)?;
        let entry_size = self.geometry.entry_size;
        let cached = self.chunks.get_mut(&rel_chunk).expect("just loaded");
        Ok(&mut cached.buf[offset..offset + entry_size])
    }

    /// Marks the chunk backing entry index `index` dirty. Call after
    /// mutating the slice returned by `entry_at`.
    pub fn mark_dirty(&mut self, index: usize) {
        let (chunk, _) = self.geometry.locate(index);
        let rel_chunk = chunk - self.geometry.htable_ref;
        if let Some(c) = self.chunks.get_mut(&rel_chunk) {
            c.dirty = true;
        }
    }

    /// Writes every dirty chunk back to the primary hash-table region,
    /// and, best-effort, to the backup region if one is configured.
    /// Primary-write failures are fatal; backup-write failures are
    /// logged and otherwise ignored, per §4.3.
    pub fn flush_all(&mut self, vol: &mut StripedVolume) -> Result<()> {
        let dirty_chunks: Vec<u64> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(k, _)| *k)
            .collect();

        for rel_chunk in dirty_chunks {
            let buf = self.chunks[&rel_chunk].buf.clone();
            vol.write_chunks(self.geometry.htable_ref + rel_chunk, 1, &buf)
                .with_context(|| format!("flushing hash-table chunk {}", rel_chunk))?;

            if self.geometry.htable_bak_ref != 0 {
                if let Err(e) = vol.write_chunks(self.geometry.htable_bak_ref + rel_chunk, 1, &buf) {
                    warn!("backup hash-table write failed for chunk {}: {}", rel_chunk, e);
                }
            }

            if let Some(c) = self.chunks.get_mut(&rel_chunk) {
                c.dirty = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::Disk;
    use crate::types::{HashEntryView, StripeMode};
    use std::io::Write as _;

    fn make_disk(size: u64) -> Disk {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0_u8; size as usize]).unwrap();
        let (file, path) = tmp.keep().unwrap();
        drop(file);
        Disk::open(&path).unwrap()
    }

    fn make_geometry(hlen: usize) -> HtableGeometry {
        let entry_size = HashEntryView::entry_size(hlen);
        HtableGeometry {
            htable_ref: 2,
            htable_bak_ref: 0,
            htable_len: 4,
            entries_per_chunk: 4096 / entry_size,
            entry_size,
            buckets: 16,
            entries_per_bucket: 4,
            hlen,
        }
    }

    #[test]
    fn lazy_load_and_dirty_flush_roundtrip() {
        let disk = make_disk(64 * 4096);
        let mut vol = StripedVolume::new(vec![disk], 4096, StripeMode::Independent, 64);
        let geom = make_geometry(32);
        let mut cache = HashEntryChunkCache::new(geom);

        {
            let entry = cache.entry_at(&mut vol, 0).unwrap();
            let mut view = HashEntryView::new(32, entry);
            view.set_hash(&[9_u8; 32]);
            view.set_chunk(5);
        }
        cache.mark_dirty(0);
        cache.flush_all(&mut vol).unwrap();

        let mut fresh_cache = HashEntryChunkCache::new(make_geometry(32));
        let entry = fresh_cache.entry_at(&mut vol, 0).unwrap();
        let view = HashEntryView::new(32, entry);
        assert_eq!(view.hash(), &[9_u8; 32]);
        assert_eq!(view.chunk(), 5);
    }

    #[test]
    fn clean_chunk_not_rewritten() {
        let disk = make_disk(64 * 4096);
        let mut vol = StripedVolume::new(vec![disk], 4096, StripeMode::Independent, 64);
        let geom = make_geometry(32);
        let mut cache = HashEntryChunkCache::new(geom);
        let _ = cache.entry_at(&mut vol, 0).unwrap();
        cache.flush_all(&mut vol).unwrap();
        assert!(!cache.chunks[&0].dirty);
    }
}
