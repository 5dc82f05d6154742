//! Mounted-volume aggregate: ties the striped volume, hash-entry chunk
//! cache, bucket table and chunk allocator together behind a single
//! `mount`/`unmount` pair, in the four-step order laid out in §4.7:
//! common config, hash-table config, hash-table geometry, then the
//! reconstructed allocation list.

use crate::allocator::{ChunkAllocatorStrategy, FirstFitAllocator};
use crate::bucket_table::BucketTable;
use crate::chunk_cache::HashEntryChunkCache;
use crate::loader::{load_volume, VolumeIdentity};
use crate::types::{
    AllocatorKind, HashEntryView, HtableGeometry, ShfsConfigHeader, HENTRY_FLAG_DEFAULT,
};
use crate::volume::StripedVolume;
use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;

pub struct Volume {
    pub vol: StripedVolume,
    pub identity: VolumeIdentity,
    pub geometry: HtableGeometry,
    pub cache: HashEntryChunkCache,
    pub allocator: Box<dyn ChunkAllocatorStrategy>,
    /// first data chunk after the primary and backup hash-table regions
    pub data_region_start: u64,
}

type ConfigHeaderBuf = [u8; std::mem::size_of::<ShfsConfigHeader>()];

impl Volume {
    /// Mounts the volume spanning `paths`: probes and validates members
    /// (`load_vol_cconf`), reads the hash-table config header off
    /// logical chunk 1 (`load_vol_hconf`), derives the bucket-grid
    /// geometry from it (`load_vol_htable`), and reconstructs the
    /// allocator's free list by scanning every occupied hash entry
    /// (`load_vol_alist`).
    pub fn mount(paths: &[PathBuf]) -> Result<Volume> {
        let (mut vol, identity) = load_volume(paths)?;

        let mut chunk1 = vec![0_u8; vol.chunksize as usize];
        vol.read_chunks(1, 1, &mut chunk1)?;
        let hdr = decode_config_header(&chunk1)?;

        let allocator_raw = hdr.allocator;
        let allocator_kind = AllocatorKind::from_u32(allocator_raw)
            .ok_or_else(|| anyhow!("unsupported allocator kind {}", allocator_raw))?;
        let AllocatorKind::FirstFit = allocator_kind;

        let hlen = hdr.hlen as usize;
        let entry_size = HashEntryView::entry_size(hlen);
        let entries_per_chunk = (vol.chunksize as usize) / entry_size;
        if entries_per_chunk == 0 {
            bail!("chunk size too small to hold a single hash entry");
        }
        let buckets = hdr.htable_bucket_count as usize;
        let entries_per_bucket = hdr.htable_entries_per_bucket as usize;
        let nb_entries = buckets * entries_per_bucket;
        let htable_len = (nb_entries + entries_per_chunk - 1) / entries_per_chunk;

        let geometry = HtableGeometry {
            htable_ref: hdr.htable_ref,
            htable_bak_ref: hdr.htable_bak_ref,
            htable_len: htable_len as u64,
            entries_per_chunk,
            entry_size,
            buckets,
            entries_per_bucket,
            hlen,
        };

        let data_region_start = geometry.htable_ref + geometry.htable_len;
        if data_region_start >= vol.total_chunks {
            bail!("hash table leaves no room for a data region");
        }

        let mut cache = HashEntryChunkCache::new(geometry);
        let mut allocator = FirstFitAllocator::new(data_region_start, vol.total_chunks - data_region_start);

        // The backup hash-table region isn't necessarily contiguous
        // with the primary one, and isn't folded into
        // `data_region_start`; exclude whatever part of it falls
        // inside the tracked free region so add-obj can never hand out
        // chunks that back the crash-consistency replica. The part (if
        // any) below `data_region_start` is already excluded by
        // construction, same as chunks 0/1 and the primary table.
        if geometry.htable_bak_ref != 0 {
            let bak_start = geometry.htable_bak_ref.max(data_region_start);
            let bak_end = (geometry.htable_bak_ref + geometry.htable_len).min(vol.total_chunks);
            if bak_start < bak_end {
                allocator
                    .register(bak_start, bak_end - bak_start)
                    .context("backup hash-table region overlaps an already-reserved range")?;
            }
        }

        for found in BucketTable::iterate(&mut cache, &mut vol)? {
            let nb_chunks = (found.offset + found.len + vol.chunksize - 1) / vol.chunksize;
            allocator
                .register(found.chunk, nb_chunks.max(1))
                .context("occupied hash entry overlaps an already-reserved chunk range")?;
        }

        Ok(Volume {
            vol,
            identity,
            geometry,
            cache,
            allocator: Box::new(allocator),
            data_region_start,
        })
    }

    /// The hash of the object currently flagged default, if any.
    pub fn default_hash(&mut self) -> Result<Option<Vec<u8>>> {
        let found = BucketTable::iterate(&mut self.cache, &mut self.vol)?;
        Ok(found
            .into_iter()
            .find(|f| f.flags & HENTRY_FLAG_DEFAULT != 0)
            .map(|f| f.hash))
    }

    /// Best-effort teardown: flushes every dirty hash-table chunk to
    /// the primary region, and to the backup region where configured
    /// (§4.3). Flush failures against the backup are logged, not
    /// fatal; a primary flush failure is returned to the caller.
    pub fn unmount(mut self) -> Result<()> {
        self.cache.flush_all(&mut self.vol)
    }
}

fn decode_config_header(chunk1: &[u8]) -> Result<ShfsConfigHeader> {
    let size = std::mem::size_of::<ShfsConfigHeader>();
    if chunk1.len() < size {
        bail!("chunk 1 too small to hold the config header");
    }
    let mut buf: ConfigHeaderBuf = [0_u8; std::mem::size_of::<ShfsConfigHeader>()];
    buf.copy_from_slice(&chunk1[..size]);
    Ok(unsafe { std::mem::transmute(buf) })
}
