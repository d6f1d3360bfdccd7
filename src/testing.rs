//! In-memory hardware for host tests
//!
//! The register blocks are plain memory. `SIE_STATUS` and `BUFF_STATUS`
//! clear the bits written as one, and nothing else changes on its own. The
//! helpers here play the part of the controller and the host.

use crate::{
    dpram::{Dpram, BUFFER_LEN},
    ral::{self, usb::Interrupts, usb::SieStatus},
    Clock, Controller, Device, Peripherals,
};
use core::cell::Cell;
use usb_device::UsbDirection;

const LENGTH: u32 = 0x3FF;
const AVAILABLE: u32 = 1 << 10;
const PID: u32 = 1 << 13;
const FULL: u32 = 1 << 15;

pub struct Hardware {
    pub usb: ral::usb::RegisterBlock,
    pub dpram: Dpram,
    pub resets: ral::resets::RegisterBlock,
}

/// A packet that the host took from an IN endpoint
#[derive(Debug)]
pub struct Packet {
    pub len: usize,
    pub pid: u32,
    pub data: [u8; BUFFER_LEN],
}

impl Packet {
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl Hardware {
    pub fn new() -> Self {
        let hw = Hardware {
            usb: ral::usb::RegisterBlock::new(),
            dpram: Dpram::new(),
            resets: ral::resets::RegisterBlock::new(),
        };
        // Every subsystem is out of reset.
        hw.resets.RESET_DONE.write(u32::MAX);
        hw
    }

    /// A controller that's not yet configured
    pub fn controller<'a>(&'a self, clock: FakeClock<'a>) -> Controller<FakeClock<'a>> {
        Controller::new(FakePeripherals(self), clock)
    }

    /// A clock that never sees the host's ACK
    pub fn clock(&self) -> FakeClock<'_> {
        FakeClock::new(&self.usb)
    }

    /// The host sends a SETUP packet
    pub fn setup(&self, bytes: [u8; 8]) {
        let low = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let high = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        self.dpram.endpoint(0, UsbDirection::In).CONTROL.write(low);
        self.dpram.endpoint(0, UsbDirection::Out).CONTROL.write(high);
        self.usb.SIE_STATUS.raise(SieStatus::SETUP_REC.bits());
        self.update_interrupts();
    }

    /// The host sends an OUT packet
    ///
    /// The controller only accepts the packet if the buffer was available.
    pub fn host_out(&self, index: usize, data: &[u8]) -> bool {
        let bc = self.dpram.endpoint(index, UsbDirection::Out).BUFFER_CONTROL;
        let word = bc.read();
        if word & AVAILABLE == 0 {
            return false;
        }
        let len = self.dpram.write_buffer(index, UsbDirection::Out, data);
        bc.write((word & PID) | FULL | len as u32);
        self.usb.BUFF_STATUS.raise(1 << (2 * index + 1));
        self.update_interrupts();
        true
    }

    /// The host takes, and acknowledges, a packet from an IN endpoint
    pub fn host_in(&self, index: usize) -> Option<Packet> {
        let bc = self.dpram.endpoint(index, UsbDirection::In).BUFFER_CONTROL;
        let word = bc.read();
        if word & AVAILABLE == 0 {
            return None;
        }
        let len = (word & LENGTH) as usize;
        let mut data = [0; BUFFER_LEN];
        self.dpram
            .read_buffer(index, UsbDirection::In, &mut data[..len.min(BUFFER_LEN)]);
        bc.write(word & !(AVAILABLE | FULL));
        self.usb.BUFF_STATUS.raise(1 << (2 * index));
        self.update_interrupts();
        Some(Packet {
            len,
            pid: (word & PID) >> 13,
            data,
        })
    }

    /// The host resets the bus
    pub fn bus_reset(&self) {
        self.usb.SIE_STATUS.raise(SieStatus::BUS_RESET.bits());
        self.update_interrupts();
    }

    /// Run the interrupt handler
    ///
    /// Status bits that the driver didn't acknowledge stay pending, and keep
    /// their interrupt source active.
    pub fn interrupt<C: Clock>(&self, device: &mut Device<C>) {
        device.on_interrupt();
        self.update_interrupts();
    }

    /// Derive `INTS` from the status registers and `INTE`, like the controller does
    pub fn update_interrupts(&self) {
        let mut ints = Interrupts::empty();
        if self.usb.BUFF_STATUS.read() != 0 {
            ints |= Interrupts::BUFF_STATUS;
        }
        let sie = SieStatus::from_bits_truncate(self.usb.SIE_STATUS.read());
        if sie.contains(SieStatus::SETUP_REC) {
            ints |= Interrupts::SETUP_REQ;
        }
        if sie.contains(SieStatus::BUS_RESET) {
            ints |= Interrupts::BUS_RESET;
        }
        self.usb.INTS.write(ints.bits() & self.usb.INTE.read());
    }

    /// The IN buffer control word
    pub fn ep_in(&self, index: usize) -> u32 {
        self.dpram
            .endpoint(index, UsbDirection::In)
            .BUFFER_CONTROL
            .read()
    }

    /// The OUT buffer control word
    pub fn ep_out(&self, index: usize) -> u32 {
        self.dpram
            .endpoint(index, UsbDirection::Out)
            .BUFFER_CONTROL
            .read()
    }
}

pub struct FakePeripherals<'a>(&'a Hardware);

unsafe impl Peripherals for FakePeripherals<'_> {
    fn usb(&self) -> *const () {
        &self.0.usb as *const _ as *const ()
    }
    fn dpram(&self) -> *const () {
        &self.0.dpram as *const _ as *const ()
    }
    fn resets(&self) -> *const () {
        &self.0.resets as *const _ as *const ()
    }
}

/// A clock that advances on every read
///
/// The clock also decides when the host acknowledges the status stage:
/// `SIE_STATUS.ACK_REC` reads as set from `ack_at` onwards, and clear before.
/// It can also complete buffers at a given time, which lets a test finish a
/// transfer while a handler is running.
pub struct FakeClock<'a> {
    now: Cell<u32>,
    step: u32,
    ack_at: Option<u32>,
    completion: Cell<Option<(u32, u32)>>,
    usb: &'a ral::usb::RegisterBlock,
}

impl<'a> FakeClock<'a> {
    pub fn new(usb: &'a ral::usb::RegisterBlock) -> Self {
        FakeClock {
            now: Cell::new(0),
            step: 10,
            ack_at: None,
            completion: Cell::new(None),
            usb,
        }
    }

    /// The host acknowledges at `micros`
    pub fn ack_at(mut self, micros: u32) -> Self {
        self.ack_at = Some(micros);
        self
    }

    /// The controller sets the `BUFF_STATUS` bits in `buffers` at `micros`
    pub fn complete_at(self, micros: u32, buffers: u32) -> Self {
        self.completion.set(Some((micros, buffers)));
        self
    }

    pub fn now(&self) -> u32 {
        self.now.get()
    }
}

impl Clock for FakeClock<'_> {
    fn now_micros(&self) -> u32 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));

        let ack = SieStatus::ACK_REC.bits();
        match self.ack_at {
            Some(at) if now >= at => self.usb.SIE_STATUS.raise(ack),
            _ => self.usb.SIE_STATUS.write(ack),
        }
        if let Some((at, buffers)) = self.completion.get() {
            if now >= at {
                self.completion.set(None);
                self.usb.BUFF_STATUS.raise(buffers);
            }
        }
        now
    }
}
