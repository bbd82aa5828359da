//! # Flags
//!
//! Bit sets exchanged with the kernel. Values match the etnaviv UAPI.

bitflags::bitflags! {
    /// Buffer allocation flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BoFlags: u32 {
        /// CPU-cached mapping
        const CACHED = 0x0001_0000;
        /// Write-combined mapping
        const WC = 0x0002_0000;
        /// Uncached mapping
        const UNCACHED = 0x0004_0000;
        /// Force the buffer through the GPU MMU
        const FORCE_MMU = 0x0010_0000;
    }
}

bitflags::bitflags! {
    /// Access intent recorded for a relocation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RelocFlags: u32 {
        /// GPU reads the target
        const READ = 0x0001;
        /// GPU writes the target
        const WRITE = 0x0002;
    }
}

bitflags::bitflags! {
    /// Per-buffer access flags in a submission's BO table
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SubmitBoFlags: u32 {
        /// Buffer is read by the submission
        const READ = 0x0001;
        /// Buffer is written by the submission
        const WRITE = 0x0002;
    }
}

bitflags::bitflags! {
    /// CPU access intent for prepare
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PrepOp: u32 {
        /// CPU will read
        const READ = 0x01;
        /// CPU will write
        const WRITE = 0x02;
        /// Fail with EBUSY instead of waiting
        const NOSYNC = 0x04;
    }
}

impl From<RelocFlags> for SubmitBoFlags {
    fn from(flags: RelocFlags) -> Self {
        let mut out = SubmitBoFlags::empty();
        if flags.contains(RelocFlags::READ) {
            out |= SubmitBoFlags::READ;
        }
        if flags.contains(RelocFlags::WRITE) {
            out |= SubmitBoFlags::WRITE;
        }
        out
    }
}
