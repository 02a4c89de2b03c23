//! Bus fabric: address-range routing, read/write forwarding and signal
//! broadcast between the console's devices.
//!
//! The CPU-visible memory map assembled by the console:
//! $0000-$07FF - 2KB internal RAM
//! $0800-$1FFF - RAM mirror (repeats every $0800 bytes)
//! $2000-$2007 - PPU registers
//! $2008-$3FFF - PPU register mirror (repeats every 8 bytes)
//! $4000-$4015 - APU registers (including the $4014 OAM DMA port)
//! $4016-$4017 - Controller ports / APU frame counter
//! $4020-$FFFF - Cartridge space: PRG ROM, PRG RAM
//!
//! Devices live in an arena of slots indexed by [`DeviceId`]. A device
//! whose operation needs the bus itself (the CPU fetching instructions,
//! the PPU running a DMA transfer, a mirror forwarding an access) is
//! taken out of its slot for the duration of the call and handed
//! `&mut Bus`; a routed access that lands on a detached device reads 0.

use crate::apu::Apu;
use crate::cartridge::CartridgeSlot;
use crate::controller::ControllerInterface;
use crate::cpu::Mos6502;
use crate::error::{EmuError, Result};
use crate::memory::{MemoryMirror, Ram, Rom};
use crate::ppu::Rp2c02;
use crate::rom::{NametableMirrorMode, TvSystem};

/// Closed set of signals devices may broadcast to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Maskable interrupt request toward the CPU.
    CpuIrq,
    /// Non-maskable interrupt toward the CPU.
    CpuNmi,
    /// Suspend CPU progress (OAM DMA stall).
    CpuHalt,
    /// Resume CPU progress.
    CpuResume,
    /// A write to $4014 requested an OAM DMA transfer.
    PpuDma,
    /// APU frame counter mode update forwarded from a $4017 write.
    ApuFrameCounter { five_step: bool, irq_inhibit: bool },
}

/// Closed interval of bus addresses claimed by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
    pub min: u16,
    pub max: u16,
}

impl AddressRange {
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min > max {
            return Err(EmuError::InvalidAddressRange(min, max));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.min && addr <= self.max
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

/// Handle into the bus's device arena.
pub type DeviceId = usize;

/// Tagged set of device kinds that can attach to the bus.
#[derive(Debug)]
pub enum DeviceKind {
    Ram(Ram),
    Rom(Rom),
    Mirror(MemoryMirror),
    Cpu(Mos6502),
    Ppu(Rp2c02),
    Apu(Apu),
    CartridgeSlot(CartridgeSlot),
    Controllers(ControllerInterface),
}

impl DeviceKind {
    /// The bus range this device answers to, if it is addressable.
    fn addressable_range(&self) -> Option<AddressRange> {
        match self {
            DeviceKind::Ram(ram) => Some(ram.range()),
            DeviceKind::Rom(rom) => Some(rom.range()),
            DeviceKind::Mirror(mirror) => Some(mirror.range()),
            DeviceKind::Cpu(_) => None,
            DeviceKind::Ppu(ppu) => Some(ppu.range()),
            DeviceKind::Apu(apu) => Some(apu.range()),
            DeviceKind::CartridgeSlot(slot) => Some(slot.range()),
            DeviceKind::Controllers(ctl) => Some(ctl.range()),
        }
    }

    /// Default signal behaviour: ignore. Handlers only raise latches, so
    /// no device needs the bus here.
    fn on_signal(&mut self, signal: Signal) {
        match self {
            DeviceKind::Cpu(cpu) => cpu.on_signal(signal),
            DeviceKind::Ppu(ppu) => ppu.on_signal(signal),
            DeviceKind::Apu(apu) => apu.on_signal(signal),
            _ => {}
        }
    }
}

#[derive(Debug)]
struct Slot {
    range: Option<AddressRange>,
    device: Option<DeviceKind>,
}

/// The address interconnect. Owns every attached device.
#[derive(Debug, Default)]
pub struct Bus {
    slots: Vec<Slot>,
    addressable: Vec<DeviceId>,
    non_addressable: Vec<DeviceId>,
    /// Most recently routed device, checked first for locality.
    cached: Option<DeviceId>,
    /// The cartridge slot, when attached; used for PPU-side fetches.
    cartridge: Option<DeviceId>,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device. Addressable devices must claim a range free of
    /// overlap with every earlier attachment.
    pub fn attach(&mut self, device: DeviceKind) -> Result<DeviceId> {
        let id = self.slots.len();
        let range = device.addressable_range();

        if let Some(range) = range {
            for &other in &self.addressable {
                if let Some(existing) = self.slots[other].range {
                    if existing.overlaps(&range) {
                        return Err(EmuError::MappingConflict(range.min, range.max));
                    }
                }
            }
            self.addressable.push(id);
            self.cached = Some(id);
            log::debug!(
                "bus: attached device {id} at {:#06X}-{:#06X}",
                range.min,
                range.max
            );
        } else {
            self.non_addressable.push(id);
            log::debug!("bus: attached non-addressable device {id}");
        }

        if matches!(device, DeviceKind::CartridgeSlot(_)) {
            self.cartridge = Some(id);
        }

        self.slots.push(Slot {
            range,
            device: Some(device),
        });
        Ok(id)
    }

    fn take(&mut self, id: DeviceId) -> Option<DeviceKind> {
        self.slots.get_mut(id).and_then(|slot| slot.device.take())
    }

    fn put_back(&mut self, id: DeviceId, device: DeviceKind) {
        self.slots[id].device = Some(device);
    }

    /// Find the device owning `addr`, checking the one-entry cache first.
    fn device_at(&mut self, addr: u16) -> Option<DeviceId> {
        if let Some(id) = self.cached {
            if let Some(range) = self.slots[id].range {
                if range.contains(addr) {
                    return Some(id);
                }
            }
        }

        for &id in &self.addressable {
            if let Some(range) = self.slots[id].range {
                if range.contains(addr) {
                    self.cached = Some(id);
                    return Some(id);
                }
            }
        }

        None
    }

    fn device_read(&mut self, id: DeviceId, addr: u16, peek: bool) -> u8 {
        let Some(mut device) = self.take(id) else {
            return 0;
        };

        let value = match &mut device {
            DeviceKind::Ram(ram) => ram.read(addr),
            DeviceKind::Rom(rom) => rom.read(addr),
            DeviceKind::Mirror(mirror) => {
                let (peer, target) = mirror.translate(addr);
                self.device_read(peer, target, peek)
            }
            DeviceKind::Cpu(_) => 0,
            DeviceKind::Ppu(ppu) => ppu.read(self, addr, peek),
            DeviceKind::Apu(apu) => apu.read(addr, peek),
            DeviceKind::CartridgeSlot(slot) => slot.read(addr),
            DeviceKind::Controllers(ctl) => ctl.read(addr, peek),
        };

        self.put_back(id, device);
        value
    }

    fn device_write(&mut self, id: DeviceId, addr: u16, data: u8) {
        let Some(mut device) = self.take(id) else {
            return;
        };

        match &mut device {
            DeviceKind::Ram(ram) => ram.write(addr, data),
            DeviceKind::Rom(rom) => rom.write(addr, data),
            DeviceKind::Mirror(mirror) => {
                let (peer, target) = mirror.translate(addr);
                self.device_write(peer, target, data);
            }
            DeviceKind::Cpu(_) => {}
            DeviceKind::Ppu(ppu) => ppu.write(self, addr, data),
            DeviceKind::Apu(apu) => apu.write(self, addr, data),
            DeviceKind::CartridgeSlot(slot) => slot.write(addr, data),
            DeviceKind::Controllers(ctl) => ctl.write(self, addr, data),
        }

        self.put_back(id, device);
    }

    /// Read a byte. Unowned addresses read 0.
    pub fn read(&mut self, addr: u16) -> u8 {
        match self.device_at(addr) {
            Some(id) => self.device_read(id, addr, false),
            None => 0,
        }
    }

    /// Write a byte. Unowned writes are dropped silently.
    pub fn write(&mut self, addr: u16, data: u8) {
        if let Some(id) = self.device_at(addr) {
            self.device_write(id, addr, data);
        }
    }

    /// Read without side effects: the owning device promises to leave
    /// observable state untouched (VBlank flag, PPUDATA pointer,
    /// controller shift registers).
    pub fn peek(&mut self, addr: u16) -> u8 {
        match self.device_at(addr) {
            Some(id) => self.device_read(id, addr, true),
            None => 0,
        }
    }

    /// Invoke `on_signal` on every device in attach order, addressable
    /// devices first. A device emitting a signal mid-operation is
    /// detached at that moment and does not observe its own broadcast.
    pub fn broadcast(&mut self, signal: Signal) {
        let ids: Vec<DeviceId> = self
            .addressable
            .iter()
            .chain(self.non_addressable.iter())
            .copied()
            .collect();

        for id in ids {
            if let Some(mut device) = self.take(id) {
                device.on_signal(signal);
                self.put_back(id, device);
            }
        }
    }

    /// Advance a clocked device by one of its own cycles.
    pub fn cycle(&mut self, id: DeviceId) -> Result<()> {
        let Some(mut device) = self.take(id) else {
            return Ok(());
        };

        let result = match &mut device {
            DeviceKind::Cpu(cpu) => {
                cpu.cycle(self);
                Ok(())
            }
            DeviceKind::Ppu(ppu) => ppu.cycle(self),
            DeviceKind::Apu(apu) => {
                apu.cycle(self);
                Ok(())
            }
            _ => Ok(()),
        };

        self.put_back(id, device);
        result
    }

    // -----------------------------
    // PPU-side cartridge facade
    // -----------------------------

    /// Pattern-table read on the PPU bus ($0000-$1FFF goes to CHR).
    pub fn ppu_cartridge_read(&mut self, addr: u16) -> u8 {
        match self.cartridge.and_then(|id| self.slots[id].device.as_mut()) {
            Some(DeviceKind::CartridgeSlot(slot)) => slot.ppu_read(addr),
            _ => 0,
        }
    }

    /// Pattern-table write on the PPU bus.
    pub fn ppu_cartridge_write(&mut self, addr: u16, data: u8) {
        if let Some(DeviceKind::CartridgeSlot(slot)) =
            self.cartridge.and_then(|id| self.slots[id].device.as_mut())
        {
            slot.ppu_write(addr, data);
        }
    }

    /// Nametable arrangement selected by the inserted cartridge.
    pub fn cartridge_mirror_mode(&self) -> Option<NametableMirrorMode> {
        match self.cartridge.and_then(|id| self.slots[id].device.as_ref()) {
            Some(DeviceKind::CartridgeSlot(slot)) => slot.mirror_mode(),
            _ => None,
        }
    }

    /// TV system declared by the inserted cartridge.
    pub fn cartridge_tv_system(&self) -> Option<TvSystem> {
        match self.cartridge.and_then(|id| self.slots[id].device.as_ref()) {
            Some(DeviceKind::CartridgeSlot(slot)) => slot.tv_system(),
            _ => None,
        }
    }

    // -----------------------------
    // Typed device accessors
    // -----------------------------

    pub fn cpu(&self, id: DeviceId) -> Option<&Mos6502> {
        match self.slots.get(id).and_then(|slot| slot.device.as_ref()) {
            Some(DeviceKind::Cpu(cpu)) => Some(cpu),
            _ => None,
        }
    }

    pub fn cpu_mut(&mut self, id: DeviceId) -> Option<&mut Mos6502> {
        match self.slots.get_mut(id).and_then(|slot| slot.device.as_mut()) {
            Some(DeviceKind::Cpu(cpu)) => Some(cpu),
            _ => None,
        }
    }

    pub fn ppu(&self, id: DeviceId) -> Option<&Rp2c02> {
        match self.slots.get(id).and_then(|slot| slot.device.as_ref()) {
            Some(DeviceKind::Ppu(ppu)) => Some(ppu),
            _ => None,
        }
    }

    pub fn ppu_mut(&mut self, id: DeviceId) -> Option<&mut Rp2c02> {
        match self.slots.get_mut(id).and_then(|slot| slot.device.as_mut()) {
            Some(DeviceKind::Ppu(ppu)) => Some(ppu),
            _ => None,
        }
    }

    pub fn apu(&self, id: DeviceId) -> Option<&Apu> {
        match self.slots.get(id).and_then(|slot| slot.device.as_ref()) {
            Some(DeviceKind::Apu(apu)) => Some(apu),
            _ => None,
        }
    }

    pub fn apu_mut(&mut self, id: DeviceId) -> Option<&mut Apu> {
        match self.slots.get_mut(id).and_then(|slot| slot.device.as_mut()) {
            Some(DeviceKind::Apu(apu)) => Some(apu),
            _ => None,
        }
    }

    pub fn controllers_mut(&mut self, id: DeviceId) -> Option<&mut ControllerInterface> {
        match self.slots.get_mut(id).and_then(|slot| slot.device.as_mut()) {
            Some(DeviceKind::Controllers(ctl)) => Some(ctl),
            _ => None,
        }
    }

    pub fn cartridge_slot_mut(&mut self, id: DeviceId) -> Option<&mut CartridgeSlot> {
        match self.slots.get_mut(id).and_then(|slot| slot.device.as_mut()) {
            Some(DeviceKind::CartridgeSlot(slot)) => Some(slot),
            _ => None,
        }
    }
}
