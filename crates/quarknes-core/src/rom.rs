//! iNES ROM file loading and parsing.

use std::fs;
use std::path::Path;

use crate::error::{EmuError, Result};

/// iNES header magic: "NES" followed by an EOF byte.
pub const NES_MAGIC: [u8; 4] = [0x4E, 0x45, 0x53, 0x1A];

/// iNES header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Optional trainer blob size in bytes.
pub const TRAINER_SIZE: usize = 512;

/// Nametable arrangement soldered onto the cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NametableMirrorMode {
    Horizontal,
    Vertical,
    FourScreen,
}

/// ROM file container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Ines,
    Nes2,
}

/// TV system the ROM was authored for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TvSystem {
    Ntsc,
    Pal,
}

/// Console variant the ROM targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleType {
    Nes,
    VsSystem,
    PlayChoice10,
}

/// Everything the header says about the cartridge.
#[derive(Debug, Clone)]
pub struct CartridgeMetadata {
    pub file_format: FileFormat,
    pub tv_system: TvSystem,
    pub console: ConsoleType,
    pub mirror_mode: NametableMirrorMode,
    /// PRG-ROM size in bytes (multiple of 16 KiB).
    pub prgrom_size: u32,
    /// CHR-ROM size in bytes (multiple of 8 KiB; 0 means CHR-RAM).
    pub chrrom_size: u32,
    /// PRG-RAM size in bytes (byte 8, with 8 KiB inferred from 0).
    pub prgram_size: u32,
    pub mapper_id: u32,
    pub has_trainer: bool,
    pub has_battery: bool,
}

/// A parsed ROM file: metadata plus the PRG and CHR images.
#[derive(Debug, Clone)]
pub struct RomFile {
    metadata: CartridgeMetadata,
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
}

impl RomFile {
    /// Load and parse an iNES file from disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        Self::parse(&data)
    }

    /// Parse an iNES image already in memory.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(EmuError::InvalidRomFile("file shorter than header"));
        }

        let mut header = [0u8; HEADER_SIZE];
        header.copy_from_slice(&data[..HEADER_SIZE]);
        if header[0..4] != NES_MAGIC {
            return Err(EmuError::InvalidRomFile("bad magic number"));
        }

        // NES 2.0 files carry the signature bits 2-3 of byte 7 set to 10.
        // The fields we use are backward compatible, so parse them the
        // iNES way either way.
        let file_format = if (header[7] & 0x0C) == 0x08 {
            FileFormat::Nes2
        } else {
            FileFormat::Ines
        };

        let metadata = Self::parse_ines_header(&header, file_format);

        let mut offset = HEADER_SIZE;
        if metadata.has_trainer {
            offset += TRAINER_SIZE;
        }

        let prg_len = metadata.prgrom_size as usize;
        let chr_len = metadata.chrrom_size as usize;
        if data.len() < offset + prg_len + chr_len {
            return Err(EmuError::InvalidRomFile("file truncated"));
        }

        let prg_rom = data[offset..offset + prg_len].to_vec();
        offset += prg_len;
        let chr_rom = data[offset..offset + chr_len].to_vec();

        log::debug!(
            "rom: mapper {} PRG {} KiB CHR {} KiB {:?} mirror {:?}",
            metadata.mapper_id,
            prg_len / 1024,
            chr_len / 1024,
            metadata.tv_system,
            metadata.mirror_mode,
        );

        Ok(Self {
            metadata,
            prg_rom,
            chr_rom,
        })
    }

    fn parse_ines_header(header: &[u8; HEADER_SIZE], file_format: FileFormat) -> CartridgeMetadata {
        // Bytes 4 and 5: PRG and CHR ROM sizes in 16 KiB / 8 KiB units.
        let prgrom_size = header[4] as u32 * 16 * 1024;
        let chrrom_size = header[5] as u32 * 8 * 1024;

        // Byte 6: mirroring, battery, trainer, four-screen, mapper low.
        let mut mirror_mode = if (header[6] & 0x01) != 0 {
            NametableMirrorMode::Vertical
        } else {
            NametableMirrorMode::Horizontal
        };
        let has_battery = (header[6] & 0x02) != 0;
        let has_trainer = (header[6] & 0x04) != 0;
        if (header[6] & 0x08) != 0 {
            mirror_mode = NametableMirrorMode::FourScreen;
        }

        // Byte 7: console variant and mapper high nibble.
        let console = if (header[7] & 0x01) != 0 {
            ConsoleType::VsSystem
        } else if (header[7] & 0x02) != 0 {
            ConsoleType::PlayChoice10
        } else {
            ConsoleType::Nes
        };

        let mapper_id = ((header[7] & 0xF0) | (header[6] >> 4)) as u32;

        // Byte 8: PRG RAM size in 8 KiB units, 0 meaning 8 KiB.
        let prgram_size = if header[8] == 0 {
            8 * 1024
        } else {
            header[8] as u32 * 8 * 1024
        };

        // Byte 9: TV system. Bytes 10-15 are unused.
        let tv_system = if (header[9] & 0x01) != 0 {
            TvSystem::Pal
        } else {
            TvSystem::Ntsc
        };

        CartridgeMetadata {
            file_format,
            tv_system,
            console,
            mirror_mode,
            prgrom_size,
            chrrom_size,
            prgram_size,
            mapper_id,
            has_trainer,
            has_battery,
        }
    }

    pub fn metadata(&self) -> &CartridgeMetadata {
        &self.metadata
    }

    pub fn prg_rom(&self) -> &[u8] {
        &self.prg_rom
    }

    pub fn chr_rom(&self) -> &[u8] {
        &self.chr_rom
    }

    /// Consume the file, handing out metadata and both ROM images.
    pub fn into_parts(self) -> (CartridgeMetadata, Vec<u8>, Vec<u8>) {
        (self.metadata, self.prg_rom, self.chr_rom)
    }
}
