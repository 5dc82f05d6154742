//! Volume discovery: probes a caller-supplied device list, validates
//! each member's SHFS label, cross-references declared member UUIDs,
//! and assembles a [`StripedVolume`] in the volume's declared order
//! (§4.2).

use crate::disk::Disk;
use crate::types::{
    ShfsCommonHeader, ShfsUuid, StripeMode, BOOT_AREA_LENGTH, CHUNK0_SIZE, MAX_TRY_MEMBERS,
    SHFS_HEADER_VERSION, SHFS_MAGIC, VOLNAME_LEN,
};
use crate::volume::StripedVolume;
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Volume-wide identity and sizing decoded from the common header,
/// independent of any one member.
pub struct VolumeIdentity {
    pub vol_uuid: ShfsUuid,
    pub volname: String,
    /// chunk count as declared on disk; the addressable space is
    /// `[0, volsize]` inclusive, i.e. `volsize + 1` chunks.
    pub volsize: u64,
    pub stripesize: u64,
    pub stripemode: StripeMode,
}

struct DetectedMember {
    disk: Disk,
    member_uuid: ShfsUuid,
}

type CommonHeaderBuf = [u8; std::mem::size_of::<ShfsCommonHeader>()];

/// Validates the magic/version of a raw chunk-0 buffer and decodes the
/// common header out of it.
fn detect_hdr0(buf: &[u8; CHUNK0_SIZE]) -> Result<ShfsCommonHeader> {
    let mut hdr_bytes: CommonHeaderBuf = [0_u8; std::mem::size_of::<ShfsCommonHeader>()];
    let hdr_len = hdr_bytes.len();
    hdr_bytes.copy_from_slice(&buf[BOOT_AREA_LENGTH..BOOT_AREA_LENGTH + hdr_len]);
    let hdr: ShfsCommonHeader = unsafe { std::mem::transmute(hdr_bytes) };

    let magic = hdr.magic;
    let version = hdr.version;
    if magic != SHFS_MAGIC {
        bail!("invalid label: bad magic");
    }
    if version != SHFS_HEADER_VERSION {
        bail!("invalid label: unsupported header version {}", version);
    }
    Ok(hdr)
}

fn is_power_of_two(v: u64) -> bool {
    v != 0 && (v & (v - 1)) == 0
}

/// Probes `paths`, validates each member's label, reconciles the
/// declared member list against what was actually supplied, and
/// assembles the resulting `StripedVolume` in declared order.
pub fn load_volume(paths: &[PathBuf]) -> Result<(StripedVolume, VolumeIdentity)> {
    if paths.is_empty() {
        bail!("no member devices supplied");
    }
    if paths.len() > MAX_TRY_MEMBERS {
        bail!(
            "too many member devices supplied ({} > {})",
            paths.len(),
            MAX_TRY_MEMBERS
        );
    }

    let mut pool: Vec<DetectedMember> = Vec::with_capacity(paths.len());
    let mut reference_header: Option<ShfsCommonHeader> = None;

    for path in paths {
        pool.push(probe_one(path, &mut reference_header)?);
    }

    let hdr = reference_header.expect("at least one member was probed");
    let member_count = hdr.member_count as usize;
    if member_count != paths.len() {
        bail!(
            "declared member count {} differs from {} supplied devices",
            member_count,
            paths.len()
        );
    }

    let ordered_disks = reconcile_members(&hdr, pool)?;

    let stripesize = hdr.stripesize as u64;
    if stripesize < 4096 || !is_power_of_two(stripesize) {
        bail!("invalid stripesize {} (must be a power of two >= 4096)", stripesize);
    }
    let stripemode_raw = hdr.stripemode;
    let stripemode = StripeMode::from_u32(stripemode_raw)
        .ok_or_else(|| anyhow!("unsupported stripe mode {}", stripemode_raw))?;

    let volsize = hdr.vol_size;
    let total_chunks = volsize + 1;
    let nb_members = ordered_disks.len() as u64;
    let min_member_size = match stripemode {
        StripeMode::Combined => total_chunks * stripesize,
        StripeMode::Independent => (total_chunks / nb_members) * stripesize,
    };
    for disk in &ordered_disks {
        if disk.size_bytes < min_member_size {
            bail!(
                "member {} is too small: {} bytes, need at least {}",
                disk.path.display(),
                disk.size_bytes,
                min_member_size
            );
        }
    }

    let vol_uuid = hdr.vol_uuid;
    let vol_name_bytes = hdr.vol_name;
    let volname = crate::types::fixed_str_to_string(&vol_name_bytes[..VOLNAME_LEN]);

    let identity = VolumeIdentity {
        vol_uuid,
        volname,
        volsize,
        stripesize,
        stripemode,
    };

    let striped = StripedVolume::new(ordered_disks, stripesize, stripemode, total_chunks);
    Ok((striped, identity))
}

fn probe_one(path: &Path, reference_header: &mut Option<ShfsCommonHeader>) -> Result<DetectedMember> {
    let mut disk = Disk::open(path)?;
    let mut buf = [0_u8; CHUNK0_SIZE];
    disk.read_at(0, &mut buf)?;
    let hdr = detect_hdr0(&buf).with_context(|| format!("invalid label on {}", path.display()))?;

    match reference_header {
        None => *reference_header = Some(hdr),
        Some(reference) => {
            let ref_uuid = reference.vol_uuid;
            let this_uuid = hdr.vol_uuid;
            if ref_uuid != this_uuid {
                bail!(
                    "{} belongs to a different volume than the first detected member",
                    path.display()
                );
            }
        }
    }

    let member_uuid = hdr.this_member_uuid;
    debug!("probed {}: member_uuid {}", path.display(), hex::encode(member_uuid));
    Ok(DetectedMember { disk, member_uuid })
}

/// Places the probed disks into declared-member order, rejecting
/// duplicate or missing declared UUIDs (§4.2 step 5).
fn reconcile_members(hdr: &ShfsCommonHeader, mut pool: Vec<DetectedMember>) -> Result<Vec<Disk>> {
    let member_count = hdr.member_count as usize;
    let mut seen_declared: HashSet<ShfsUuid> = HashSet::new();
    let mut ordered = Vec::with_capacity(member_count);

    for i in 0..member_count {
        let want_uuid = hdr.members[i].member_uuid;
        if !seen_declared.insert(want_uuid) {
            bail!("duplicate member uuid {} in declared member list", hex::encode(want_uuid));
        }
        let pos = pool
            .iter()
            .position(|m| m.member_uuid == want_uuid)
            .ok_or_else(|| anyhow!("declared member {} not among supplied devices", hex::encode(want_uuid)))?;
        ordered.push(pool.remove(pos).disk);
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ShfsMemberSlot, MAX_MEMBERS};
    use std::io::Write as _;

    fn build_label(vol_uuid: ShfsUuid, member_uuids: &[ShfsUuid], this_index: usize, stripesize: u32, stripemode: u32, volsize: u64) -> [u8; CHUNK0_SIZE] {
        let mut members = [ShfsMemberSlot { member_uuid: [0; 16] }; MAX_MEMBERS];
        for (i, u) in member_uuids.iter().enumerate() {
            members[i].member_uuid = *u;
        }
        let hdr = ShfsCommonHeader {
            magic: SHFS_MAGIC,
            version: SHFS_HEADER_VERSION,
            vol_uuid,
            vol_name: {
                let mut n = [0_u8; VOLNAME_LEN];
                n[..4].copy_from_slice(b"test");
                n
            },
            vol_size: volsize,
            stripesize,
            stripemode,
            member_count: member_uuids.len() as u32,
            this_member_uuid: member_uuids[this_index],
            members,
        };
        let hdr_bytes: CommonHeaderBuf = unsafe { std::mem::transmute(hdr) };
        let mut chunk0 = [0_u8; CHUNK0_SIZE];
        chunk0[BOOT_AREA_LENGTH..BOOT_AREA_LENGTH + hdr_bytes.len()].copy_from_slice(&hdr_bytes);
        chunk0
    }

    fn write_member(chunk0: &[u8; CHUNK0_SIZE], extra_bytes: usize) -> PathBuf {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(chunk0).unwrap();
        tmp.write_all(&vec![0_u8; extra_bytes]).unwrap();
        let (file, path) = tmp.keep().unwrap();
        drop(file);
        path
    }

    #[test]
    fn single_member_independent() {
        let vol_uuid = [1_u8; 16];
        let member_uuid = [2_u8; 16];
        let chunk0 = build_label(vol_uuid, &[member_uuid], 0, 4096, 1, 15);
        let path = write_member(&chunk0, 16 * 4096);
        let (striped, id) = load_volume(&[path]).unwrap();
        assert_eq!(id.vol_uuid, vol_uuid);
        assert_eq!(id.volsize, 15);
        assert_eq!(striped.nb_members(), 1);
        assert_eq!(striped.chunksize, 4096);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut chunk0 = [0_u8; CHUNK0_SIZE];
        chunk0[BOOT_AREA_LENGTH] = 0xFF;
        let path = write_member(&chunk0, 4096);
        assert!(load_volume(&[path]).is_err());
    }

    #[test]
    fn rejects_member_count_mismatch() {
        let vol_uuid = [1_u8; 16];
        let member_uuids = [[2_u8; 16], [3_u8; 16]];
        let chunk0 = build_label(vol_uuid, &member_uuids, 0, 4096, 1, 15);
        let path = write_member(&chunk0, 16 * 4096);
        assert!(load_volume(&[path]).is_err());
    }

    #[test]
    fn rejects_too_small_member() {
        let vol_uuid = [1_u8; 16];
        let member_uuid = [2_u8; 16];
        let chunk0 = build_label(vol_uuid, &[member_uuid], 0, 4096, 1, 1000);
        let path = write_member(&chunk0, 4096);
        assert!(load_volume(&[path]).is_err());
    }
}
