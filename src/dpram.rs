//! USB packet memory (DPRAM)
//!
//! The packet memory is shared between the CPU and the USB controller. It
//! holds, per endpoint and direction, an endpoint control word, a buffer
//! control word, and the data buffer itself.
//!
//! | Offset  | Contents                                            |
//! |---------|-----------------------------------------------------|
//! | `0x000` | Setup packet (aliases the EP0 endpoint control pair) |
//! | `0x008` | EP1..EP15 endpoint control, IN then OUT             |
//! | `0x080` | EP0..EP15 buffer control, IN then OUT               |
//! | `0x100` | EP0 buffer, shared by both directions               |
//! | `0x180` | EPn buffers, 128 bytes per endpoint                 |
//!
//! Endpoint `n > 0` owns the 128 bytes at `0x100 + n * 128`. The IN buffer
//! is the first half, and the OUT buffer is the second half.
//!
//! The driver is the only writer of control words. The controller writes
//! received lengths and clears the available flag when it takes a buffer.

#![allow(non_snake_case, non_upper_case_globals)]
#![allow(clippy::declare_interior_mutable_const)] // Usage is legit in this module.

use crate::vcell::VCell;
use usb_device::UsbDirection;

/// Number of endpoint indices supported by the controller
pub const ENDPOINT_COUNT: usize = 16;

/// Size of a single (non double-buffered) endpoint buffer
pub const BUFFER_LEN: usize = 64;

/// Start of the data buffers
const BUFFERS_OFFSET: u32 = 0x100;
/// Bytes reserved for each endpoint index
const SLOT_LEN: usize = BUFFER_LEN * 2;

/// One control word for each direction
#[repr(C)]
struct Pair {
    IN: VCell<u32>,
    OUT: VCell<u32>,
}

impl Pair {
    const fn new() -> Self {
        Pair {
            IN: VCell::new(0),
            OUT: VCell::new(0),
        }
    }

    fn get(&self, direction: UsbDirection) -> &VCell<u32> {
        match direction {
            UsbDirection::In => &self.IN,
            UsbDirection::Out => &self.OUT,
        }
    }
}

#[repr(C)]
struct Slot([VCell<u8>; SLOT_LEN]);

impl Slot {
    const fn new() -> Self {
        const BYTE: VCell<u8> = VCell::new(0);
        Slot([BYTE; SLOT_LEN])
    }
}

/// The packet memory layout
#[repr(C)]
pub struct Dpram {
    /// Index 0 holds the setup packet, not endpoint control.
    ep_control: [Pair; ENDPOINT_COUNT],
    buffer_control: [Pair; ENDPOINT_COUNT],
    buffers: [Slot; ENDPOINT_COUNT],
}

pub type Instance = crate::ral::Instance<Dpram>;

/// Register view of one endpoint direction
///
/// Lets the RAL macros work with the endpoint control words, even though they
/// are spread across two tables.
pub struct Registers<'a> {
    /// Endpoint control. For EP0, this aliases the setup packet; the controller
    /// has no EP0 endpoint control words.
    pub CONTROL: &'a VCell<u32>,
    pub BUFFER_CONTROL: &'a VCell<u32>,
}

/// Endpoint control word fields
pub mod CONTROL {
    field!(BUFFER_ADDRESS, 0, 16);
    field!(INTERRUPT_ON_NAK, 16, 1);
    field!(INTERRUPT_ON_STALL, 17, 1);
    pub mod ENDPOINT_TYPE {
        pub const offset: u32 = 26;
        pub const mask: u32 = 0b11 << offset;
        pub mod R {}
        pub mod W {}
        pub mod RW {
            pub const CONTROL: u32 = 0;
            pub const ISOCHRONOUS: u32 = 1;
            pub const BULK: u32 = 2;
            pub const INTERRUPT: u32 = 3;
        }
    }
    field!(INTERRUPT_PER_DOUBLE_BUFF, 28, 1);
    field!(INTERRUPT_PER_BUFF, 29, 1);
    field!(DOUBLE_BUFFERED, 30, 1);
    field!(ENABLE, 31, 1);
}

/// Buffer control word fields
///
/// Only buffer 0 is described; the driver doesn't double-buffer.
pub mod BUFFER_CONTROL {
    field!(LENGTH_0, 0, 10);
    field!(AVAILABLE_0, 10, 1);
    field!(STALL, 11, 1);
    field!(RESET, 12, 1);
    field!(PID_0, 13, 1);
    field!(LAST_0, 14, 1);
    field!(FULL_0, 15, 1);
}

impl Dpram {
    /// Packet memory with every byte zeroed
    pub const fn new() -> Self {
        const PAIR: Pair = Pair::new();
        const SLOT: Slot = Slot::new();
        Dpram {
            ep_control: [PAIR; ENDPOINT_COUNT],
            buffer_control: [PAIR; ENDPOINT_COUNT],
            buffers: [SLOT; ENDPOINT_COUNT],
        }
    }

    /// Zero all endpoint control and buffer control words
    ///
    /// Data buffers are left as-is.
    pub fn reset(&self) {
        for (ctrl, buf) in self.ep_control.iter().zip(self.buffer_control.iter()) {
            ctrl.IN.write(0);
            ctrl.OUT.write(0);
            buf.IN.write(0);
            buf.OUT.write(0);
        }
    }

    /// Access the control words for an endpoint direction
    ///
    /// # Panics
    ///
    /// Panics if `index` is not less than [`ENDPOINT_COUNT`].
    pub fn endpoint(&self, index: usize, direction: UsbDirection) -> Registers<'_> {
        Registers {
            CONTROL: self.ep_control[index].get(direction),
            BUFFER_CONTROL: self.buffer_control[index].get(direction),
        }
    }

    /// Read the eight bytes of the most recent setup packet
    pub fn setup_packet(&self) -> [u8; 8] {
        let low = self.ep_control[0].IN.read().to_le_bytes();
        let high = self.ep_control[0].OUT.read().to_le_bytes();
        [
            low[0], low[1], low[2], low[3], high[0], high[1], high[2], high[3],
        ]
    }

    /// The buffer offset that belongs in an endpoint control word
    pub fn buffer_offset(index: usize, direction: UsbDirection) -> u32 {
        if index == 0 {
            BUFFERS_OFFSET
        } else {
            let half = match direction {
                UsbDirection::In => 0,
                UsbDirection::Out => BUFFER_LEN,
            };
            BUFFERS_OFFSET + (index * SLOT_LEN + half) as u32
        }
    }

    fn buffer(&self, index: usize, direction: UsbDirection) -> &[VCell<u8>] {
        let start = if index == 0 {
            0
        } else {
            match direction {
                UsbDirection::In => 0,
                UsbDirection::Out => BUFFER_LEN,
            }
        };
        &self.buffers[index].0[start..start + BUFFER_LEN]
    }

    /// Copy `src` into an endpoint buffer
    ///
    /// Returns the number of bytes copied, which is at most [`BUFFER_LEN`].
    pub fn write_buffer(&self, index: usize, direction: UsbDirection, src: &[u8]) -> usize {
        let buffer = self.buffer(index, direction);
        let size = src.len().min(buffer.len());
        for (dst, src) in buffer.iter().zip(&src[..size]) {
            dst.write(*src);
        }
        size
    }

    /// Copy an endpoint buffer into `dst`
    ///
    /// Returns the number of bytes copied, which is at most [`BUFFER_LEN`].
    pub fn read_buffer(&self, index: usize, direction: UsbDirection, dst: &mut [u8]) -> usize {
        let buffer = self.buffer(index, direction);
        let size = dst.len().min(buffer.len());
        for (dst, src) in dst[..size].iter_mut().zip(buffer) {
            *dst = src.read();
        }
        size
    }
}

const _: () = assert!(core::mem::size_of::<Dpram>() == 0x900);
