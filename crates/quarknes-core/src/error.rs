//! Emulator error type
//!
//! Every failure in the core maps to one variant carrying enough context
//! for a message, and a stable numeric code that the CLI uses as its exit
//! status.

use thiserror::Error;

/// Errors raised by the emulator core.
#[derive(Debug, Error)]
pub enum EmuError {
    /// Two devices claimed overlapping address ranges on the same bus.
    #[error("address mapping conflict: {0:#06X}-{1:#06X} overlaps an attached device")]
    MappingConflict(u16, u16),

    /// An address range was constructed with min > max.
    #[error("invalid address range: min {0:#06X} exceeds max {1:#06X}")]
    InvalidAddressRange(u16, u16),

    /// The ROM file could not be opened or read.
    #[error("cannot access ROM file: {0}")]
    RomLoadFailure(#[from] std::io::Error),

    /// The ROM file is too short or carries a bad magic number.
    #[error("invalid ROM dump file: {0}")]
    InvalidRomFile(&'static str),

    /// The ROM file uses a header format the loader does not parse.
    #[error("ROM file format not supported")]
    UnsupportedFormat,

    /// The cartridge names a mapper id with no implementation.
    #[error("no compatible mapper available for mapper id {0}")]
    UnsupportedMapper(u32),

    /// A store hit ROM address space (debug diagnosis only).
    #[error("illegal write operation to ROM at {0:#06X}")]
    IllegalRomWrite(u16),

    /// The cartridge declares a TV system other than NTSC.
    #[error("unsupported video mode: only NTSC ROMs are supported")]
    UnsupportedVideoMode,

    /// Four-screen (or otherwise unhandled) nametable mirroring.
    #[error("nametable mirroring mode not supported")]
    NametableMirrorUnsupported,

    /// The audio consumer asked for more samples than the ring holds.
    #[error("incompatible audio buffer size: requested {requested}, capacity {capacity}")]
    IncompatibleAudioBufferSize { requested: usize, capacity: usize },

    /// A pixel write landed outside the framebuffer (debug diagnosis only).
    #[error("framebuffer write out of bounds at ({0}, {1})")]
    FramebufferOutOfBounds(u16, u16),
}

impl EmuError {
    /// Stable numeric code for each failure kind.
    pub fn code(&self) -> i32 {
        match self {
            EmuError::MappingConflict(..) => 301,
            EmuError::InvalidAddressRange(..) => 310,
            EmuError::IllegalRomWrite(..) => 400,
            EmuError::InvalidRomFile(..) => 510,
            EmuError::UnsupportedMapper(..) => 511,
            EmuError::RomLoadFailure(..) => 550,
            EmuError::UnsupportedFormat => 560,
            EmuError::NametableMirrorUnsupported => 620,
            EmuError::UnsupportedVideoMode => 630,
            EmuError::FramebufferOutOfBounds(..) => 666,
            EmuError::IncompatibleAudioBufferSize { .. } => 710,
        }
    }
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, EmuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EmuError::MappingConflict(0, 0).code(), 301);
        assert_eq!(EmuError::InvalidAddressRange(1, 0).code(), 310);
        assert_eq!(EmuError::IllegalRomWrite(0x8000).code(), 400);
        assert_eq!(EmuError::InvalidRomFile("short").code(), 510);
        assert_eq!(EmuError::UnsupportedMapper(4).code(), 511);
        assert_eq!(
            EmuError::RomLoadFailure(std::io::Error::from(std::io::ErrorKind::NotFound)).code(),
            550
        );
        assert_eq!(EmuError::UnsupportedFormat.code(), 560);
        assert_eq!(EmuError::NametableMirrorUnsupported.code(), 620);
        assert_eq!(EmuError::UnsupportedVideoMode.code(), 630);
        assert_eq!(EmuError::FramebufferOutOfBounds(256, 240).code(), 666);
        assert_eq!(
            EmuError::IncompatibleAudioBufferSize {
                requested: 4096,
                capacity: 2048
            }
            .code(),
            710
        );
    }
}
