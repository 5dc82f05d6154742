//! On-disk record layout for SHFS volumes: magic/size constants, the
//! little-endian field aliases and the packed header structs that are
//! read directly out of a chunk buffer.

pub const SHFS_MAGIC: u64 = 0x3130765f53464853; // "SHFS_v01" as bytes, LE
pub const SHFS_HEADER_VERSION: u32 = 1;

/// Opaque boot area preceding the common header in chunk 0.
pub const BOOT_AREA_LENGTH: usize = 1024;
/// Chunk 0 is always read/written as this many bytes, regardless of
/// `chunksize`, so the label can be found before chunksize is known.
pub const CHUNK0_SIZE: usize = 4096;

pub const MAX_TRY_MEMBERS: usize = 32;
pub const MAX_MEMBERS: usize = 32;

pub const VOLNAME_LEN: usize = 16;
pub const MIME_LEN: usize = 24;
pub const NAME_LEN: usize = 64;
pub const ENCODING_LEN: usize = 8;
pub const MAX_HASH_LEN: usize = 64;

pub const HASH_ENTRY_FIXED_LEN: usize = 8 + 8 + 8 + 8 + 4 + MIME_LEN + NAME_LEN + ENCODING_LEN;

pub const HENTRY_FLAG_DEFAULT: u32 = 0x1;
pub const HENTRY_FLAG_HIDDEN: u32 = 0x2;

pub type LE16 = u16;
pub type LE32 = u32;
pub type LE64 = u64;

pub type ShfsUuid = [u8; 16];

/// Stripe layout mode, see §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeMode {
    Combined,
    Independent,
}

impl StripeMode {
    pub fn from_u32(v: u32) -> Option<StripeMode> {
        match v {
            0 => Some(StripeMode::Combined),
            1 => Some(StripeMode::Independent),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            StripeMode::Combined => 0,
            StripeMode::Independent => 1,
        }
    }
}

/// The only allocator kind this tool understands; an unrecognized
/// on-disk value is mount-fatal (§9 open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    FirstFit,
}

impl AllocatorKind {
    pub fn from_u32(v: u32) -> Option<AllocatorKind> {
        match v {
            0 => Some(AllocatorKind::FirstFit),
            _ => None,
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            AllocatorKind::FirstFit => 0,
        }
    }
}

/// One declared member slot inside the common header's member array.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ShfsMemberSlot {
    pub member_uuid: ShfsUuid,
}

/// The common header, located at byte offset `BOOT_AREA_LENGTH` within
/// the 4096-byte chunk-0 buffer of every member. Declares the volume
/// identity, its striping parameters, and the ordered list of member
/// UUIDs.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ShfsCommonHeader {
    pub magic: LE64,
    pub version: LE32,
    pub vol_uuid: ShfsUuid,
    pub vol_name: [u8; VOLNAME_LEN],
    pub vol_size: LE64,
    pub stripesize: LE32,
    pub stripemode: LE32,
    pub member_count: LE32,
    /// uuid of the member disk this particular header was read from.
    pub this_member_uuid: ShfsUuid,
    pub members: [ShfsMemberSlot; MAX_MEMBERS],
}

static_assertions::const_assert!(
    BOOT_AREA_LENGTH + std::mem::size_of::<ShfsCommonHeader>() <= CHUNK0_SIZE
);

/// The config header occupying (logical) chunk 1: hash-table geometry
/// and the allocator kind.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ShfsConfigHeader {
    pub htable_ref: LE64,
    pub htable_bak_ref: LE64,
    pub htable_bucket_count: LE32,
    pub htable_entries_per_bucket: LE32,
    pub hlen: LE32,
    pub allocator: LE32,
}

/// Describes where within the logical hash-table region any given
/// entry's bytes live, and how the bucket grid maps onto that region.
/// Shared by the chunk cache and the bucket table so the two agree on
/// coordinates without duplicating the arithmetic.
#[derive(Debug, Clone, Copy)]
pub struct HtableGeometry {
    pub htable_ref: u64,
    pub htable_bak_ref: u64,
    pub htable_len: u64,
    pub entries_per_chunk: usize,
    pub entry_size: usize,
    pub buckets: usize,
    pub entries_per_bucket: usize,
    pub hlen: usize,
}

impl HtableGeometry {
    pub fn nb_entries(&self) -> usize {
        self.buckets * self.entries_per_bucket
    }

    /// `(htable chunk, byte offset within that chunk)` for global entry
    /// index `index`.
    pub fn locate(&self, index: usize) -> (u64, usize) {
        let chunk = self.htable_ref + (index / self.entries_per_chunk) as u64;
        let offset = (index % self.entries_per_chunk) * self.entry_size;
        (chunk, offset)
    }

    /// bucket index for a hash: first 4 bytes as a little-endian
    /// integer, reduced modulo the bucket count (§4.4).
    pub fn bucket_of(&self, hash: &[u8]) -> usize {
        let b = u32::from_le_bytes([hash[0], hash[1], hash[2], hash[3]]);
        (b as usize) % self.buckets
    }
}

/// A read/write view of one hash-entry record within a chunk buffer.
/// Field offsets are computed from `hlen` since the hash itself is
/// variable width (1..=64 bytes); this mirrors the teacher's habit of
/// doing explicit offset arithmetic into a raw byte slice rather than
/// overlaying a fixed `#[repr(C)]` struct when the layout isn't fixed
/// size.
pub struct HashEntryView<'a> {
    hlen: usize,
    buf: &'a mut [u8],
}

impl<'a> HashEntryView<'a> {
    pub fn new(hlen: usize, buf: &'a mut [u8]) -> HashEntryView<'a> {
        debug_assert!(buf.len() >= hlen + HASH_ENTRY_FIXED_LEN);
        HashEntryView { hlen, buf }
    }

    pub fn entry_size(hlen: usize) -> usize {
        hlen + HASH_ENTRY_FIXED_LEN
    }

    fn off_chunk(&self) -> usize {
        self.hlen
    }
    fn off_offset(&self) -> usize {
        self.hlen + 8
    }
    fn off_len(&self) -> usize {
        self.hlen + 16
    }
    fn off_ts(&self) -> usize {
        self.hlen + 24
    }
    fn off_flags(&self) -> usize {
        self.hlen + 32
    }
    fn off_mime(&self) -> usize {
        self.hlen + 36
    }
    fn off_name(&self) -> usize {
        self.hlen + 36 + MIME_LEN
    }
    fn off_encoding(&self) -> usize {
        self.hlen + 36 + MIME_LEN + NAME_LEN
    }

    pub fn hash(&self) -> &[u8] {
        &self.buf[0..self.hlen]
    }

    pub fn is_vacant(&self) -> bool {
        self.hash().iter().all(|b| *b == 0)
    }

    pub fn set_hash(&mut self, hash: &[u8]) {
        debug_assert_eq!(hash.len(), self.hlen);
        self.buf[0..self.hlen].copy_from_slice(hash);
    }

    pub fn clear_hash(&mut self) {
        self.buf[0..self.hlen].fill(0);
    }

    pub fn chunk(&self) -> u64 {
        u64::from_le_bytes(self.buf[self.off_chunk()..self.off_chunk() + 8].try_into().unwrap())
    }
    pub fn set_chunk(&mut self, v: u64) {
        let off = self.off_chunk();
        self.buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn offset(&self) -> u64 {
        let off = self.off_offset();
        u64::from_le_bytes(self.buf[off..off + 8].try_into().unwrap())
    }
    pub fn set_offset(&mut self, v: u64) {
        let off = self.off_offset();
        self.buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn len(&self) -> u64 {
        let off = self.off_len();
        u64::from_le_bytes(self.buf[off..off + 8].try_into().unwrap())
    }
    pub fn set_len(&mut self, v: u64) {
        let off = self.off_len();
        self.buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn ts_creation(&self) -> u64 {
        let off = self.off_ts();
        u64::from_le_bytes(self.buf[off..off + 8].try_into().unwrap())
    }
    pub fn set_ts_creation(&mut self, v: u64) {
        let off = self.off_ts();
        self.buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    }

    pub fn flags(&self) -> u32 {
        let off = self.off_flags();
        u32::from_le_bytes(self.buf[off..off + 4].try_into().unwrap())
    }
    pub fn set_flags(&mut self, v: u32) {
        let off = self.off_flags();
        self.buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn mime(&self) -> &[u8] {
        let off = self.off_mime();
        &self.buf[off..off + MIME_LEN]
    }
    pub fn set_mime(&mut self, s: &str) {
        let off = self.off_mime();
        write_fixed_str(&mut self.buf[off..off + MIME_LEN], s);
    }

    pub fn name(&self) -> &[u8] {
        let off = self.off_name();
        &self.buf[off..off + NAME_LEN]
    }
    pub fn set_name(&mut self, s: &str) {
        let off = self.off_name();
        write_fixed_str(&mut self.buf[off..off + NAME_LEN], s);
    }

    pub fn encoding(&self) -> &[u8] {
        let off = self.off_encoding();
        &self.buf[off..off + ENCODING_LEN]
    }
    pub fn set_encoding(&mut self, s: &str) {
        let off = self.off_encoding();
        write_fixed_str(&mut self.buf[off..off + ENCODING_LEN], s);
    }
}

fn write_fixed_str(dst: &mut [u8], s: &str) {
    dst.fill(0);
    let bytes = s.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

/// Decode a NUL-padded fixed byte field into a `String`, stopping at the
/// first NUL (or the field length, whichever comes first).
pub fn fixed_str_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
