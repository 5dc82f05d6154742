//! Typed outcomes the Action Engine needs to distinguish without
//! string-matching `anyhow` messages: a user mistake, a full bucket, or
//! a mid-run cancellation each map to a different CLI exit path (§4.6).

use std::fmt;

#[derive(Debug)]
pub enum ActionError {
    /// No entry in the bucket table matches the requested hash.
    NoSuchHash,
    /// An entry with this hash already exists (add-obj without force).
    Duplicate,
    /// Every slot in the target bucket is occupied by a different hash.
    BucketFull,
    /// The data region has no free chunk run large enough for the
    /// object being added.
    NoSpace,
    /// `register` was asked to reserve a range that overlaps a range
    /// already reserved.
    Overlap,
    /// `unregister` was asked to release a range that isn't (wholly)
    /// currently reserved.
    NotReserved,
    /// A `-m`/`-n` argument (or any other hex-expected input) wasn't
    /// valid hex, or decoded to the wrong length for this volume's
    /// `hlen`.
    BadHex(String),
    /// A path given to `cat-obj`'s destination or `add-obj`'s source
    /// isn't a regular file.
    NotRegularFile(std::path::PathBuf),
    /// The operator's cancellation signal fired mid-action.
    Cancelled,
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::NoSuchHash => write!(f, "no object with that hash"),
            ActionError::Duplicate => write!(f, "an object with that hash already exists"),
            ActionError::BucketFull => write!(f, "bucket is full"),
            ActionError::NoSpace => write!(f, "no free space for object"),
            ActionError::Overlap => write!(f, "chunk range overlaps an already-reserved range"),
            ActionError::NotReserved => write!(f, "chunk range is not (wholly) reserved"),
            ActionError::BadHex(s) => write!(f, "invalid hash hex: {}", s),
            ActionError::NotRegularFile(p) => write!(f, "not a regular file: {}", p.display()),
            ActionError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for ActionError {}

/// Outcome of running one `Action`, reported by the CLI front end (§5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Ok,
    UserError,
    Cancelled,
}

/// Classifies an action's `anyhow::Error` into the outcome the Action
/// Engine reports for it, per §5: a `Cancelled`/user-facing
/// `ActionError` surfaces as such; anything else is a user error (a
/// fatal/internal error is expected to have already been returned
/// directly from `mount`, not from an individual action).
pub fn classify(err: &anyhow::Error) -> ActionOutcome {
    match err.downcast_ref::<ActionError>() {
        Some(ActionError::Cancelled) => ActionOutcome::Cancelled,
        Some(_) => ActionOutcome::UserError,
        None => ActionOutcome::UserError,
    }
}
