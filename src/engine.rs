//! Action Engine: runs a fixed, ordered list of actions against a
//! mounted volume, one at a time, reporting a USER-ERROR/OK/CANCELLED
//! outcome per action without aborting the remaining list (§4.6).

use crate::bucket_table::BucketTable;
use crate::digest::new_digest;
use crate::error::{classify, ActionError, ActionOutcome};
use crate::types::{HENTRY_FLAG_DEFAULT, HENTRY_FLAG_HIDDEN};
use crate::volume_handle::Volume;
use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One unit of work from the parsed CLI action list.
#[derive(Debug, Clone)]
pub enum Action {
    AddObj {
        path: PathBuf,
        mime: Option<String>,
        name: Option<String>,
        /// overwrite an existing entry's metadata instead of failing
        /// DUPLICATE when the computed hash already exists
        force: bool,
    },
    RmObj {
        hash_hex: String,
    },
    /// writes the object's bytes to standard output
    CatObj {
        hash_hex: String,
    },
    SetDefault {
        hash_hex: String,
    },
    ClearDefault,
    Ls,
    Info,
}

impl Action {
    fn describe(&self) -> String {
        match self {
            Action::AddObj { path, .. } => format!("add-obj {}", path.display()),
            Action::RmObj { hash_hex } => format!("rm-obj {}", hash_hex),
            Action::CatObj { hash_hex } => format!("cat-obj {}", hash_hex),
            Action::SetDefault { hash_hex } => format!("set-default {}", hash_hex),
            Action::ClearDefault => "clear-default".to_string(),
            Action::Ls => "ls".to_string(),
            Action::Info => "info".to_string(),
        }
    }
}

/// Report for one executed action, in the order it ran.
pub struct ActionResult {
    pub description: String,
    pub outcome: ActionOutcome,
    /// human-readable detail: the new hash for add-obj, the listing
    /// text for ls/info, or the error message for a failed action.
    pub detail: Option<String>,
}

pub struct ActionEngine<'a> {
    volume: &'a mut Volume,
    cancel: Arc<AtomicBool>,
}

impl<'a> ActionEngine<'a> {
    pub fn new(volume: &'a mut Volume, cancel: Arc<AtomicBool>) -> ActionEngine<'a> {
        ActionEngine { volume, cancel }
    }

    /// Runs actions in order until one completes or the list is
    /// exhausted. A cancellation signalled before a token starts aborts
    /// the sequence there: that token is reported `Cancelled` and
    /// nothing after it runs or appears in the result list (§4.6).
    pub fn run(&mut self, actions: &[Action]) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let description = action.describe();
            if self.cancel.load(Ordering::Relaxed) {
                results.push(ActionResult {
                    description,
                    outcome: ActionOutcome::Cancelled,
                    detail: None,
                });
                break;
            }
            let result = self.run_one(action);
            results.push(match result {
                Ok(detail) => ActionResult {
                    description,
                    outcome: ActionOutcome::Ok,
                    detail,
                },
                Err(e) => ActionResult {
                    description,
                    outcome: classify(&e),
                    detail: Some(e.to_string()),
                },
            });
        }
        results
    }

    fn run_one(&mut self, action: &Action) -> Result<Option<String>> {
        match action {
            Action::AddObj { path, mime, name, force } => {
                self.add_obj(path, mime.as_deref(), name.as_deref(), *force).map(Some)
            }
            Action::RmObj { hash_hex } => self.rm_obj(hash_hex).map(|_| None),
            Action::CatObj { hash_hex } => self.cat_obj(hash_hex).map(|_| None),
            Action::SetDefault { hash_hex } => self.set_default(hash_hex).map(|_| None),
            Action::ClearDefault => self.clear_default().map(|_| None),
            Action::Ls => self.ls().map(Some),
            Action::Info => self.info().map(Some),
        }
    }

    fn decode_hash(&self, hash_hex: &str) -> Result<Vec<u8>> {
        let bytes = hex::decode(hash_hex).map_err(|_| ActionError::BadHex(hash_hex.to_string()))?;
        if bytes.len() != self.volume.geometry.hlen {
            return Err(ActionError::BadHex(format!(
                "{} decodes to {} bytes, volume expects {}",
                hash_hex,
                bytes.len(),
                self.volume.geometry.hlen
            ))
            .into());
        }
        Ok(bytes)
    }

    fn add_obj(&mut self, path: &std::path::Path, mime: Option<&str>, name: Option<&str>, force: bool) -> Result<String> {
        let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(ActionError::NotRegularFile(path.to_path_buf()).into());
        }
        let len = meta.len();
        let chunksize = self.volume.vol.chunksize;

        let mut digest = new_digest();
        let mut buf = vec![0_u8; chunksize as usize];
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(ActionError::Cancelled.into());
            }
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            digest.absorb(&buf[..n]);
        }
        let hash = digest.finalize(self.volume.geometry.hlen);

        let default_name = path.file_name().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let name = name.unwrap_or(&default_name);
        let mime = mime.unwrap_or("application/octet-stream");

        if let Some(existing) = BucketTable::lookup(&mut self.volume.cache, &mut self.volume.vol, &hash)? {
            if !force {
                return Err(ActionError::Duplicate.into());
            }
            // identical hash means identical bytes; only the metadata
            // fields need updating, the stored chunks stay put.
            let raw = self.volume.cache.entry_at(&mut self.volume.vol, existing.index)?;
            let mut view = crate::types::HashEntryView::new(self.volume.geometry.hlen, raw);
            view.set_mime(mime);
            view.set_name(name);
            self.volume.cache.mark_dirty(existing.index);
            return Ok(hex::encode(&hash));
        }

        let nb_chunks = ((len + chunksize - 1) / chunksize).max(1);
        let start_chunk = self.volume.allocator.find_free(nb_chunks)?;

        file.seek(SeekFrom::Start(0))?;
        for i in 0..nb_chunks {
            if self.cancel.load(Ordering::Relaxed) {
                self.volume.allocator.unregister(start_chunk, nb_chunks)?;
                return Err(ActionError::Cancelled.into());
            }
            let mut cbuf = vec![0_u8; chunksize as usize];
            file.read_exact_or_to_end(&mut cbuf)?;
            self.volume.vol.write_chunks(start_chunk + i, 1, &cbuf)?;
        }

        let ts = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        if let Err(e) = BucketTable::add(
            &mut self.volume.cache,
            &mut self.volume.vol,
            &hash,
            start_chunk,
            0,
            len,
            ts,
            0,
            mime,
            name,
            "",
        ) {
            self.volume.allocator.unregister(start_chunk, nb_chunks)?;
            return Err(e);
        }

        Ok(hex::encode(&hash))
    }

    fn rm_obj(&mut self, hash_hex: &str) -> Result<()> {
        let hash = self.decode_hash(hash_hex)?;
        let found = BucketTable::lookup(&mut self.volume.cache, &mut self.volume.vol, &hash)?
            .ok_or(ActionError::NoSuchHash)?;
        BucketTable::remove(&mut self.volume.cache, &mut self.volume.vol, &hash)?;
        let chunksize = self.volume.vol.chunksize;
        let nb_chunks = ((found.offset + found.len + chunksize - 1) / chunksize).max(1);
        self.volume.allocator.unregister(found.chunk, nb_chunks)?;
        Ok(())
    }

    fn cat_obj(&mut self, hash_hex: &str) -> Result<()> {
        let hash = self.decode_hash(hash_hex)?;
        let found = BucketTable::lookup(&mut self.volume.cache, &mut self.volume.vol, &hash)?
            .ok_or(ActionError::NoSuchHash)?;

        let chunksize = self.volume.vol.chunksize;
        let nb_chunks = ((found.len + chunksize - 1) / chunksize).max(1);
        let mut remaining = found.len;
        let stdout = io::stdout();
        let mut out = stdout.lock();

        for i in 0..nb_chunks {
            if self.cancel.load(Ordering::Relaxed) {
                bail!(ActionError::Cancelled);
            }
            let mut cbuf = vec![0_u8; chunksize as usize];
            self.volume.vol.read_chunks(found.chunk + i, 1, &mut cbuf)?;
            let take = remaining.min(chunksize) as usize;
            out.write_all(&cbuf[..take])?;
            remaining -= take as u64;
        }
        Ok(())
    }

    fn set_default(&mut self, hash_hex: &str) -> Result<()> {
        let hash = self.decode_hash(hash_hex)?;
        let target = BucketTable::lookup(&mut self.volume.cache, &mut self.volume.vol, &hash)?
            .ok_or(ActionError::NoSuchHash)?;
        self.clear_default()?;
        BucketTable::set_flags_at(
            &mut self.volume.cache,
            &mut self.volume.vol,
            target.index,
            target.flags | HENTRY_FLAG_DEFAULT,
        )?;
        Ok(())
    }

    fn clear_default(&mut self) -> Result<()> {
        for found in BucketTable::iterate(&mut self.volume.cache, &mut self.volume.vol)? {
            if found.flags & HENTRY_FLAG_DEFAULT != 0 {
                let cleared = found.flags & !HENTRY_FLAG_DEFAULT;
                BucketTable::set_flags_at(&mut self.volume.cache, &mut self.volume.vol, found.index, cleared)?;
            }
        }
        Ok(())
    }

    fn ls(&mut self) -> Result<String> {
        let chunksize = self.volume.vol.chunksize;
        let mut found = BucketTable::iterate(&mut self.volume.cache, &mut self.volume.vol)?;
        found.sort_by(|a, b| a.chunk.cmp(&b.chunk));

        let mut lines = Vec::with_capacity(found.len());
        for f in found {
            let chunk_span = ((f.len + chunksize - 1) / chunksize).max(1);
            let flags = format!(
                "{}--{}",
                if f.flags & HENTRY_FLAG_DEFAULT != 0 { "D" } else { "-" },
                if f.flags & HENTRY_FLAG_HIDDEN != 0 { "H" } else { "-" },
            );
            let ts = Local
                .timestamp_opt(f.ts_creation as i64, 0)
                .single()
                .map(|dt| dt.format("%b %e, %g %H:%M").to_string())
                .unwrap_or_else(|| "?".to_string());
            lines.push(format!(
                "{} {:>8} {:>6} {} {:<24} {} {}",
                hex::encode(&f.hash),
                f.chunk,
                chunk_span,
                flags,
                f.mime,
                ts,
                f.name,
            ));
        }
        Ok(lines.join("\n"))
    }

    fn info(&mut self) -> Result<String> {
        let found = BucketTable::iterate(&mut self.volume.cache, &mut self.volume.vol)?;
        let total_len: u64 = found.iter().map(|f| f.len).sum();
        Ok(format!(
            "volume: {}\nstripesize: {}\nstripemode: {:?}\nmembers: {}\nhash length: {}\nobjects: {}\ntotal bytes: {}",
            self.volume.identity.volname,
            self.volume.identity.stripesize,
            self.volume.identity.stripemode,
            self.volume.vol.nb_members(),
            self.volume.geometry.hlen,
            found.len(),
            total_len,
        ))
    }
}

trait ReadExactOrToEnd {
    fn read_exact_or_to_end(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
}

impl<R: Read> ReadExactOrToEnd for R {
    /// Like `read_exact`, but tolerates a short final chunk (the tail
    /// of an object whose length isn't a multiple of `chunksize`),
    /// leaving the rest of `buf` zero-padded.
    fn read_exact_or_to_end(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(())
    }
}
