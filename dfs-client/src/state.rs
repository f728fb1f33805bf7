use std::fmt;

/// Where a client stands with respect to the file it has open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheState {
    /// No usable local copy.
    #[default]
    Invalid,
    /// Read-only copy, one of possibly many readers.
    ReadShared,
    /// Exclusive owner, edit session in progress.
    WriteOwned,
    /// Exclusive owner, session over, local copy differs from the server's.
    ModifiedOwned,
    /// The server asked for the file back mid-session; upload when the session ends.
    ReleasePending,
}

impl CacheState {
    pub fn is_owned(self) -> bool {
        matches!(
            self,
            CacheState::WriteOwned | CacheState::ModifiedOwned | CacheState::ReleasePending
        )
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CacheState::Invalid => "INVALID",
            CacheState::ReadShared => "READ_SHARED",
            CacheState::WriteOwned => "WRITE_OWNED",
            CacheState::ModifiedOwned => "MODIFIED_OWNED",
            CacheState::ReleasePending => "RELEASE_PENDING",
        };
        f.write_str(s)
    }
}
