//! Console assembly: wires every device onto the bus at the NES memory
//! map and drives them from the master clock.

use std::path::Path;

use crate::apu::{Apu, AudioHandle};
use crate::bus::{AddressRange, Bus, DeviceId, DeviceKind};
use crate::cartridge::{Cartridge, CartridgeSlot};
use crate::controller::{Button, ControllerInterface, Player};
use crate::cpu::{Mos6502, VECTOR_RESET};
use crate::error::Result;
use crate::memory::{MemoryMirror, Ram};
use crate::ppu::{Rp2c02, SCREEN_HEIGHT, SCREEN_WIDTH};

/// Borrowed view of the current frame. Valid until the next `tick`.
#[derive(Debug)]
pub struct FrameView<'a> {
    pub pixels: &'a [u8],
    pub width: usize,
    pub height: usize,
}

/// The assembled console.
#[derive(Debug)]
pub struct NesConsole {
    bus: Bus,
    cpu_id: DeviceId,
    ppu_id: DeviceId,
    apu_id: DeviceId,
    cartridge_id: DeviceId,
    controller_id: DeviceId,
    audio: AudioHandle,
    clock_count: u64,
}

impl NesConsole {
    /// Build the console and attach the full device complement.
    pub fn new() -> Result<Self> {
        let mut bus = Bus::new();

        let cpu_id = bus.attach(DeviceKind::Cpu(Mos6502::new()))?;

        let ram_range = AddressRange::new(0x0000, 0x07FF)?;
        let ram_id = bus.attach(DeviceKind::Ram(Ram::new(ram_range)))?;
        bus.attach(DeviceKind::Mirror(MemoryMirror::new(
            AddressRange::new(0x0800, 0x1FFF)?,
            ram_id,
            ram_range,
        )))?;

        let cartridge_id = bus.attach(DeviceKind::CartridgeSlot(CartridgeSlot::new(
            AddressRange::new(0x4020, 0xFFFF)?,
        )))?;

        let ppu_range = AddressRange::new(0x2000, 0x2007)?;
        let ppu_id = bus.attach(DeviceKind::Ppu(Rp2c02::new(ppu_range)))?;
        bus.attach(DeviceKind::Mirror(MemoryMirror::new(
            AddressRange::new(0x2008, 0x3FFF)?,
            ppu_id,
            ppu_range,
        )))?;

        // $4014 (OAM DMA) sits in the APU's range; $4017 (frame counter)
        // in the controllers'. Each forwards to the real owner over bus
        // signals.
        let apu = Apu::new(AddressRange::new(0x4000, 0x4015)?);
        let audio = apu.audio_handle();
        let apu_id = bus.attach(DeviceKind::Apu(apu))?;

        let controller_id = bus.attach(DeviceKind::Controllers(ControllerInterface::new(
            AddressRange::new(0x4016, 0x4017)?,
        )))?;

        // The 2A03 has no decimal-mode circuitry.
        if let Some(cpu) = bus.cpu_mut(cpu_id) {
            cpu.set_decimal_mode_available(false);
        }

        Ok(Self {
            bus,
            cpu_id,
            ppu_id,
            apu_id,
            cartridge_id,
            controller_id,
            audio,
            clock_count: 0,
        })
    }

    /// Load an iNES file from disk into the cartridge slot.
    pub fn insert_cartridge<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let cartridge = Cartridge::open(path)?;
        self.insert(cartridge);
        Ok(())
    }

    /// Load an iNES image already in memory.
    pub fn insert_cartridge_bytes(&mut self, data: &[u8]) -> Result<()> {
        let cartridge = Cartridge::from_bytes(data)?;
        self.insert(cartridge);
        Ok(())
    }

    fn insert(&mut self, cartridge: Cartridge) {
        log::debug!(
            "console: cartridge inserted, mapper {}",
            cartridge.metadata().mapper_id
        );
        if let Some(slot) = self.bus.cartridge_slot_mut(self.cartridge_id) {
            slot.insert(cartridge);
        }
    }

    /// Reset the CPU through the reset vector. RAM, PPU and APU state
    /// are unaffected, as on the real console.
    pub fn reset(&mut self) {
        let lo = self.bus.read(VECTOR_RESET) as u16;
        let hi = self.bus.read(VECTOR_RESET + 1) as u16;
        self.reset_to((hi << 8) | lo);
    }

    /// Reset the CPU to a forced program counter.
    pub fn reset_to(&mut self, pc: u16) {
        if let Some(cpu) = self.bus.cpu_mut(self.cpu_id) {
            cpu.reset_to(pc);
        }
    }

    /// Advance the master clock by one PPU dot. The CPU and APU run on
    /// every third dot.
    pub fn tick(&mut self) -> Result<()> {
        self.bus.cycle(self.ppu_id)?;

        if self.clock_count % 3 == 0 {
            self.bus.cycle(self.cpu_id)?;
            self.bus.cycle(self.apu_id)?;
        }

        self.clock_count += 1;
        Ok(())
    }

    /// Run whole frames (89342 dots each at NTSC timing).
    pub fn run_frames(&mut self, frames: u64) -> Result<()> {
        const DOTS_PER_FRAME: u64 = 341 * 262;
        for _ in 0..frames * DOTS_PER_FRAME {
            self.tick()?;
        }
        Ok(())
    }

    pub fn video_output(&self) -> FrameView<'_> {
        let pixels = self
            .bus
            .ppu(self.ppu_id)
            .map(Rp2c02::framebuffer)
            .unwrap_or(&[]);
        FrameView {
            pixels,
            width: SCREEN_WIDTH,
            height: SCREEN_HEIGHT,
        }
    }

    /// VBlank entries since power-on.
    pub fn frame_count(&self) -> u64 {
        self.bus
            .ppu(self.ppu_id)
            .map(Rp2c02::frame_count)
            .unwrap_or(0)
    }

    pub fn audio_sample_rate(&self) -> u32 {
        crate::apu::SAMPLE_RATE_HZ
    }

    pub fn audio_buffer_size(&self) -> usize {
        crate::apu::SAMPLE_BUFFER_SIZE
    }

    /// Copy the oldest `out.len()` audio samples.
    pub fn fill_audio(&self, out: &mut [u8]) -> Result<()> {
        self.audio.fill(out)
    }

    /// Shared sample-buffer handle for the host's audio thread.
    pub fn audio_handle(&self) -> AudioHandle {
        self.audio.clone()
    }

    /// Press or release a gamepad button.
    pub fn input(&mut self, player: Player, button: Button, pressed: bool) {
        if let Some(ctl) = self.bus.controllers_mut(self.controller_id) {
            ctl.set_button(player, button, pressed);
        }
    }

    pub fn cpu(&self) -> Option<&Mos6502> {
        self.bus.cpu(self.cpu_id)
    }

    pub fn ppu(&self) -> Option<&Rp2c02> {
        self.bus.ppu(self.ppu_id)
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_builds_without_conflicts() {
        let console = NesConsole::new().unwrap();
        assert_eq!(console.frame_count(), 0);
        assert_eq!(console.audio_sample_rate(), 44100);
        assert_eq!(console.audio_buffer_size(), 2048);
    }

    #[test]
    fn test_ram_visible_through_all_mirrors() {
        let mut console = NesConsole::new().unwrap();
        console.bus_mut().write(0x0042, 0x99);

        for base in [0x0042u16, 0x0842, 0x1042, 0x1842] {
            assert_eq!(console.bus_mut().read(base), 0x99);
        }
    }

    #[test]
    fn test_ppu_registers_mirrored_to_3fff() {
        let mut console = NesConsole::new().unwrap();

        // OAMADDR via a high mirror lands in the same register.
        console.bus_mut().write(0x3FF3, 0x2A);
        console.bus_mut().write(0x2004, 0x77);

        let oam = console.ppu().unwrap().oam();
        assert_eq!(oam[0x2A], 0x77);
    }

    #[test]
    fn test_video_output_dimensions() {
        let console = NesConsole::new().unwrap();
        let frame = console.video_output();
        assert_eq!(frame.width, 256);
        assert_eq!(frame.height, 240);
        assert_eq!(frame.pixels.len(), 256 * 240 * 3);
    }
}
