// src/flags.rs

//! Flag words shared across the transaction set API

use bitflags::bitflags;

bitflags! {
    /// Verification policy bits. The `NO_*` bits disable individual checks;
    /// the masks group them by concern.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VerifyFlags: u32 {
        /// Skip the header check applied during database reads and rebuilds
        const NO_HEADER_CHECK = 1 << 0;
        const NO_HEADER_DIGEST = 1 << 1;
        const NO_PAYLOAD_DIGEST = 1 << 2;
        const NO_HEADER_SIGNATURE = 1 << 3;
        const NO_PAYLOAD_SIGNATURE = 1 << 4;

        /// All signature checking disabled. While every one of these bits is
        /// set the trust keyring is never loaded.
        const MASK_NO_SIGNATURES =
            Self::NO_HEADER_SIGNATURE.bits() | Self::NO_PAYLOAD_SIGNATURE.bits();
        const MASK_NO_DIGESTS =
            Self::NO_HEADER_DIGEST.bits() | Self::NO_PAYLOAD_DIGEST.bits();
    }
}

bitflags! {
    /// What a package must carry to pass verification
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VerifyLevel: u32 {
        const DIGEST = 1 << 0;
        const SIGNATURE = 1 << 1;
    }
}

impl Default for VerifyLevel {
    fn default() -> Self {
        VerifyLevel::DIGEST | VerifyLevel::SIGNATURE
    }
}

bitflags! {
    /// Transaction-wide behaviour flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TransFlags: u32 {
        /// Dry run: mutating effects are suppressed
        const TEST = 1 << 0;
        /// Update the database without touching the filesystem
        const JUST_DB = 1 << 1;
        const NO_SCRIPTS = 1 << 2;
        const NO_TRIGGERS = 1 << 3;
    }
}

bitflags! {
    /// Problem classes the caller has chosen to ignore
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProblemFilter: u32 {
        const IGNORE_ARCH = 1 << 0;
        const IGNORE_OS = 1 << 1;
        const REPLACE_PKG = 1 << 2;
        const REPLACE_NEW_FILES = 1 << 3;
        const REPLACE_OLD_FILES = 1 << 4;
        const OLD_PACKAGE = 1 << 5;
        const DISK_SPACE = 1 << 6;
    }
}
