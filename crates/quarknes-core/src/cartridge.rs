//! Cartridge storage and the bus-facing cartridge slot.
//!
//! One cartridge object backs two facades: the CPU-bus window
//! ($4020-$FFFF) routed through [`CartridgeSlot::read`]/[`write`], and
//! the PPU pattern-table window ($0000-$1FFF) routed through
//! [`CartridgeSlot::ppu_read`]/[`ppu_write`].

use std::path::Path;

use crate::bus::AddressRange;
use crate::error::Result;
use crate::mapper::{self, MappedAddress, MappedTarget, Mapper};
use crate::rom::{CartridgeMetadata, NametableMirrorMode, RomFile, TvSystem};

/// A loaded cartridge: PRG/CHR images, optional PRG RAM and the mapper
/// chosen by the header's mapper id.
#[derive(Debug)]
pub struct Cartridge {
    metadata: CartridgeMetadata,
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    mapper: Box<dyn Mapper + Send>,
}

impl Cartridge {
    /// Load a cartridge from an iNES file on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_rom_file(RomFile::open(path)?)
    }

    /// Load a cartridge from an iNES image in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::from_rom_file(RomFile::parse(data)?)
    }

    fn from_rom_file(file: RomFile) -> Result<Self> {
        let (metadata, prg_rom, chr_rom) = file.into_parts();

        let mapper = mapper::build(
            metadata.mapper_id,
            metadata.prgrom_size,
            metadata.chrrom_size,
            metadata.prgram_size,
        )?;

        let prg_ram = vec![0; metadata.prgram_size as usize];

        log::debug!("cartridge: mapper {} selected", metadata.mapper_id);

        Ok(Self {
            metadata,
            prg_rom,
            chr_rom,
            prg_ram,
            mapper,
        })
    }

    pub fn metadata(&self) -> &CartridgeMetadata {
        &self.metadata
    }

    pub fn mirror_mode(&self) -> NametableMirrorMode {
        self.mapper.mirror_mode(self.metadata.mirror_mode)
    }

    fn read_mapped(&self, addr: MappedAddress) -> u8 {
        let offset = addr.offset as usize;
        match addr.target {
            MappedTarget::PrgRom => self.prg_rom[offset],
            MappedTarget::ChrRom => self.chr_rom[offset],
            MappedTarget::PrgRam => self.prg_ram[offset],
            MappedTarget::None => 0,
        }
    }

    fn write_mapped(&mut self, addr: MappedAddress, data: u8) {
        // The mapper decides what is writable; only PRG RAM ever is here.
        if addr.target == MappedTarget::PrgRam {
            self.prg_ram[addr.offset as usize] = data;
        }
    }

    pub fn bus_read(&self, addr: u16) -> u8 {
        self.read_mapped(self.mapper.map_bus_address(addr, false))
    }

    pub fn bus_write(&mut self, addr: u16, data: u8) {
        self.write_mapped(self.mapper.map_bus_address(addr, true), data);
    }

    pub fn ppu_read(&self, addr: u16) -> u8 {
        self.read_mapped(self.mapper.map_ppu_address(addr, false))
    }

    pub fn ppu_write(&mut self, addr: u16, data: u8) {
        self.write_mapped(self.mapper.map_ppu_address(addr, true), data);
    }
}

/// The bus device holding an (optionally empty) cartridge.
#[derive(Debug)]
pub struct CartridgeSlot {
    range: AddressRange,
    cart: Option<Cartridge>,
}

impl CartridgeSlot {
    pub fn new(range: AddressRange) -> Self {
        Self { range, cart: None }
    }

    pub fn range(&self) -> AddressRange {
        self.range
    }

    pub fn insert(&mut self, cartridge: Cartridge) {
        self.cart = Some(cartridge);
    }

    pub fn cartridge(&self) -> Option<&Cartridge> {
        self.cart.as_ref()
    }

    pub fn mirror_mode(&self) -> Option<NametableMirrorMode> {
        self.cart.as_ref().map(Cartridge::mirror_mode)
    }

    pub fn tv_system(&self) -> Option<TvSystem> {
        self.cart.as_ref().map(|cart| cart.metadata().tv_system)
    }

    pub fn read(&self, addr: u16) -> u8 {
        match &self.cart {
            Some(cart) => cart.bus_read(addr),
            None => 0,
        }
    }

    pub fn write(&mut self, addr: u16, data: u8) {
        if let Some(cart) = &mut self.cart {
            cart.bus_write(addr, data);
        }
    }

    pub fn ppu_read(&self, addr: u16) -> u8 {
        match &self.cart {
            Some(cart) => cart.ppu_read(addr),
            None => 0,
        }
    }

    pub fn ppu_write(&mut self, addr: u16, data: u8) {
        if let Some(cart) = &mut self.cart {
            cart.ppu_write(addr, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rom::NES_MAGIC;

    fn build_nrom(prg: &[u8], chr: &[u8]) -> Cartridge {
        let mut rom = Vec::new();
        rom.extend_from_slice(&NES_MAGIC);
        rom.push((prg.len() / (16 * 1024)) as u8);
        rom.push((chr.len() / (8 * 1024)) as u8);
        rom.extend_from_slice(&[0u8; 10]);
        rom.extend_from_slice(prg);
        rom.extend_from_slice(chr);
        Cartridge::from_bytes(&rom).unwrap()
    }

    #[test]
    fn test_nrom_128_cpu_reads_alias() {
        let mut prg = vec![0u8; 16 * 1024];
        prg[0] = 0x12;
        prg[0x3FFC] = 0x34;
        let cart = build_nrom(&prg, &vec![0u8; 8 * 1024]);

        assert_eq!(cart.bus_read(0x8000), 0x12);
        assert_eq!(cart.bus_read(0xC000), 0x12);
        assert_eq!(cart.bus_read(0xBFFC), 0x34);
        assert_eq!(cart.bus_read(0xFFFC), 0x34);
    }

    #[test]
    fn test_rom_writes_dropped() {
        let cart_prg = vec![0x55u8; 16 * 1024];
        let mut cart = build_nrom(&cart_prg, &vec![0u8; 8 * 1024]);
        cart.bus_write(0x8000, 0xAA);
        assert_eq!(cart.bus_read(0x8000), 0x55);
    }

    #[test]
    fn test_prg_ram_window() {
        let mut cart = build_nrom(&vec![0u8; 16 * 1024], &vec![0u8; 8 * 1024]);
        cart.bus_write(0x6000, 0x77);
        cart.bus_write(0x7FFF, 0x88);
        assert_eq!(cart.bus_read(0x6000), 0x77);
        assert_eq!(cart.bus_read(0x7FFF), 0x88);
    }

    #[test]
    fn test_chr_facade() {
        let mut chr = vec![0u8; 8 * 1024];
        chr[0x1000] = 0x99;
        let mut cart = build_nrom(&vec![0u8; 16 * 1024], &chr);

        assert_eq!(cart.ppu_read(0x1000), 0x99);
        cart.ppu_write(0x1000, 0x11);
        assert_eq!(cart.ppu_read(0x1000), 0x99);
    }

    #[test]
    fn test_empty_slot_reads_zero() {
        let slot = CartridgeSlot::new(AddressRange::new(0x4020, 0xFFFF).unwrap());
        assert_eq!(slot.read(0x8000), 0);
        assert_eq!(slot.ppu_read(0x0000), 0);
    }
}
