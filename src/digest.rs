//! Pluggable streaming content digest: objects are addressed by
//! whatever `Digest` implementation the volume was formatted with,
//! fed incrementally as each chunk of the object is read (§9).

use sha2::{Digest as _, Sha256};

/// A streaming digest: bytes are fed in via `absorb` as they're read
/// off disk (or off the source file on add-obj), then `finalize`
/// produces exactly `hlen` bytes of output.
pub trait Digest {
    fn absorb(&mut self, bytes: &[u8]);
    fn finalize(self: Box<Self>, hlen: usize) -> Vec<u8>;
}

/// The reference digest: SHA-256. Its 32-byte native output is
/// truncated for `hlen < 32`, and stretched via re-hashing for `hlen >
/// 32` since SHA-256 has no native extendable output (§9 open question
/// decision 3).
#[derive(Default)]
pub struct Sha256Digest {
    hasher: Sha256,
}

impl Sha256Digest {
    pub fn new() -> Sha256Digest {
        Sha256Digest { hasher: Sha256::new() }
    }
}

impl Digest for Sha256Digest {
    fn absorb(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn finalize(self: Box<Self>, hlen: usize) -> Vec<u8> {
        let first = self.hasher.finalize();
        let mut out = Vec::with_capacity(hlen);
        out.extend_from_slice(&first[..hlen.min(first.len())]);
        while out.len() < hlen {
            let mut stretch = Sha256::new();
            stretch.update(&out);
            let next = stretch.finalize();
            let take = (hlen - out.len()).min(next.len());
            out.extend_from_slice(&next[..take]);
        }
        out.truncate(hlen);
        out
    }
}

/// Constructs the volume's configured digest. `FirstFit` being the
/// only allocator kind, SHA-256 is presently the only digest kind;
/// this indirection exists so a second one slots in without touching
/// callers.
pub fn new_digest() -> Box<dyn Digest> {
    Box::new(Sha256Digest::new())
}
