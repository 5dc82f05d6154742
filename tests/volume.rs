//! End-to-end tests driving a mounted single-member volume through the
//! public `shfs_kit` API: the scenarios a hand-built label and config
//! header need to exercise add/ls/cat/rm/set-default/info end to end.

use shfs_kit::engine::{Action, ActionEngine};
use shfs_kit::error::ActionOutcome;
use shfs_kit::types::{
    ShfsCommonHeader, ShfsConfigHeader, ShfsMemberSlot, ShfsUuid, AllocatorKind,
    BOOT_AREA_LENGTH, CHUNK0_SIZE, MAX_MEMBERS, SHFS_HEADER_VERSION, SHFS_MAGIC, VOLNAME_LEN,
};
use shfs_kit::volume_handle::Volume;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const STRIPESIZE: u64 = 4096;
const HLEN: usize = 32;
const BUCKETS: u32 = 16;
const ENTRIES_PER_BUCKET: u32 = 4;
const TOTAL_CHUNKS: u64 = 64;

fn build_single_member_volume() -> PathBuf {
    let vol_uuid: ShfsUuid = [0xAA; 16];
    let member_uuid: ShfsUuid = [0xBB; 16];

    let mut members = [ShfsMemberSlot { member_uuid: [0; 16] }; MAX_MEMBERS];
    members[0].member_uuid = member_uuid;

    let common = ShfsCommonHeader {
        magic: SHFS_MAGIC,
        version: SHFS_HEADER_VERSION,
        vol_uuid,
        vol_name: {
            let mut n = [0_u8; VOLNAME_LEN];
            n[..4].copy_from_slice(b"test");
            n
        },
        vol_size: TOTAL_CHUNKS - 1,
        stripesize: STRIPESIZE as u32,
        stripemode: 1, // Independent
        member_count: 1,
        this_member_uuid: member_uuid,
        members,
    };

    let config = ShfsConfigHeader {
        htable_ref: 2,
        htable_bak_ref: 0,
        htable_bucket_count: BUCKETS,
        htable_entries_per_bucket: ENTRIES_PER_BUCKET,
        hlen: HLEN as u32,
        allocator: AllocatorKind::FirstFit.to_u32(),
    };

    let mut image = vec![0_u8; (TOTAL_CHUNKS * STRIPESIZE) as usize];

    let common_bytes: [u8; std::mem::size_of::<ShfsCommonHeader>()] = unsafe { std::mem::transmute(common) };
    image[BOOT_AREA_LENGTH..BOOT_AREA_LENGTH + common_bytes.len()].copy_from_slice(&common_bytes);

    let config_bytes: [u8; std::mem::size_of::<ShfsConfigHeader>()] = unsafe { std::mem::transmute(config) };
    let chunk1_start = STRIPESIZE as usize;
    image[chunk1_start..chunk1_start + config_bytes.len()].copy_from_slice(&config_bytes);

    debug_assert!(CHUNK0_SIZE <= STRIPESIZE as usize);

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&image).unwrap();
    let (file, path) = tmp.keep().unwrap();
    drop(file);
    path
}

fn write_source_file(contents: &[u8]) -> PathBuf {
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(contents).unwrap();
    let (file, path) = tmp.keep().unwrap();
    drop(file);
    path
}

fn no_cancel() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[test]
fn add_ls_cat_roundtrip() {
    let vol_path = build_single_member_volume();
    let src_path = write_source_file(b"hello, shfs");

    let mut volume = Volume::mount(&[vol_path.clone()]).unwrap();
    let results = ActionEngine::new(&mut volume, no_cancel()).run(&[
        Action::AddObj {
            path: src_path.clone(),
            mime: Some("text/plain".to_string()),
            name: Some("greeting".to_string()),
            force: false,
        },
        Action::Ls,
    ]);
    assert_eq!(results[0].outcome, ActionOutcome::Ok);
    let hash_hex = results[0].detail.clone().unwrap();
    assert_eq!(results[1].outcome, ActionOutcome::Ok);
    assert!(results[1].detail.as_ref().unwrap().contains("greeting"));
    volume.unmount().unwrap();

    // cat-obj writes straight to stdout; exercising it here only
    // confirms it finds the object and reports Ok, not the bytes
    // themselves (capturing a child's real stdout belongs in a
    // process-level test, not this in-process one).
    let mut volume = Volume::mount(&[vol_path]).unwrap();
    let results = ActionEngine::new(&mut volume, no_cancel()).run(&[Action::CatObj { hash_hex }]);
    assert_eq!(results[0].outcome, ActionOutcome::Ok);
    volume.unmount().unwrap();
}

#[test]
fn duplicate_add_is_a_user_error() {
    let vol_path = build_single_member_volume();
    let src_path = write_source_file(b"same bytes twice");

    let mut volume = Volume::mount(&[vol_path]).unwrap();
    let results = ActionEngine::new(&mut volume, no_cancel()).run(&[
        Action::AddObj { path: src_path.clone(), mime: None, name: None, force: false },
        Action::AddObj { path: src_path, mime: None, name: None, force: false },
    ]);
    assert_eq!(results[0].outcome, ActionOutcome::Ok);
    assert_eq!(results[1].outcome, ActionOutcome::UserError);
}

#[test]
fn forced_add_overwrites_metadata_instead_of_failing() {
    let vol_path = build_single_member_volume();
    let src_path = write_source_file(b"same bytes, new name");

    let mut volume = Volume::mount(&[vol_path]).unwrap();
    let results = ActionEngine::new(&mut volume, no_cancel()).run(&[
        Action::AddObj {
            path: src_path.clone(),
            mime: Some("text/plain".to_string()),
            name: Some("first".to_string()),
            force: false,
        },
        Action::AddObj {
            path: src_path,
            mime: Some("text/markdown".to_string()),
            name: Some("second".to_string()),
            force: true,
        },
        Action::Ls,
    ]);
    assert_eq!(results[0].outcome, ActionOutcome::Ok);
    assert_eq!(results[1].outcome, ActionOutcome::Ok);
    let listing = results[2].detail.as_ref().unwrap();
    assert!(listing.contains("second"));
    assert!(!listing.contains("first"));
}

#[test]
fn rm_then_lookup_reports_no_such_hash() {
    let vol_path = build_single_member_volume();
    let src_path = write_source_file(b"ephemeral object");

    let mut volume = Volume::mount(&[vol_path]).unwrap();
    let add_results = ActionEngine::new(&mut volume, no_cancel()).run(&[Action::AddObj {
        path: src_path,
        mime: None,
        name: None,
        force: false,
    }]);
    let hash_hex = add_results[0].detail.clone().unwrap();

    let results = ActionEngine::new(&mut volume, no_cancel()).run(&[
        Action::RmObj { hash_hex: hash_hex.clone() },
        Action::CatObj { hash_hex },
    ]);
    assert_eq!(results[0].outcome, ActionOutcome::Ok);
    assert_eq!(results[1].outcome, ActionOutcome::UserError);
}

#[test]
fn set_default_moves_between_objects() {
    let vol_path = build_single_member_volume();
    let a_path = write_source_file(b"object a");
    let b_path = write_source_file(b"object b");

    let mut volume = Volume::mount(&[vol_path]).unwrap();
    let add_results = ActionEngine::new(&mut volume, no_cancel()).run(&[
        Action::AddObj { path: a_path, mime: None, name: None, force: false },
        Action::AddObj { path: b_path, mime: None, name: None, force: false },
    ]);
    let hash_a = add_results[0].detail.clone().unwrap();
    let hash_b = add_results[1].detail.clone().unwrap();

    ActionEngine::new(&mut volume, no_cancel()).run(&[Action::SetDefault { hash_hex: hash_a.clone() }]);
    assert_eq!(hex::decode(&hash_a).unwrap(), volume.default_hash().unwrap().unwrap());

    ActionEngine::new(&mut volume, no_cancel()).run(&[Action::SetDefault { hash_hex: hash_b.clone() }]);
    assert_eq!(hex::decode(&hash_b).unwrap(), volume.default_hash().unwrap().unwrap());

    ActionEngine::new(&mut volume, no_cancel()).run(&[Action::ClearDefault]);
    assert!(volume.default_hash().unwrap().is_none());
}

#[test]
fn cancellation_mid_list_skips_remaining_actions() {
    let vol_path = build_single_member_volume();
    let src_path = write_source_file(b"never gets added");

    let mut volume = Volume::mount(&[vol_path]).unwrap();
    let cancel = Arc::new(AtomicBool::new(true));
    let results = ActionEngine::new(&mut volume, cancel).run(&[
        Action::AddObj { path: src_path, mime: None, name: None, force: false },
        Action::Ls,
    ]);
    // cancellation aborts the sequence at the triggering token; `ls`
    // never runs and gets no result entry at all.
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].outcome, ActionOutcome::Cancelled);
}

#[test]
fn bad_hash_hex_is_a_user_error() {
    let vol_path = build_single_member_volume();
    let mut volume = Volume::mount(&[vol_path]).unwrap();
    let results = ActionEngine::new(&mut volume, no_cancel()).run(&[Action::RmObj {
        hash_hex: "not-hex".to_string(),
    }]);
    assert_eq!(results[0].outcome, ActionOutcome::UserError);
}
