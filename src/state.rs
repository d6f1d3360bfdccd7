//! Driver-owned endpoint state
//!
//! The controller doesn't expose which DATA0 / DATA1 PID it expects next, so
//! the driver keeps track of it.

use crate::dpram::ENDPOINT_COUNT;
use usb_device::UsbDirection;

/// A data packet PID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Pid {
    Data0 = 0,
    Data1 = 1,
}

impl Pid {
    /// Returns the other PID
    pub const fn toggled(self) -> Self {
        match self {
            Pid::Data0 => Pid::Data1,
            Pid::Data1 => Pid::Data0,
        }
    }
}

/// The PID for the next packet, for every endpoint direction
///
/// A set bit means DATA1. Bit `n` describes endpoint `n`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataSequence {
    ep_in: u16,
    ep_out: u16,
}

impl DataSequence {
    /// Every endpoint direction expects DATA0
    pub const fn new() -> Self {
        DataSequence {
            ep_in: 0,
            ep_out: 0,
        }
    }

    fn mask(&mut self, direction: UsbDirection) -> &mut u16 {
        match direction {
            UsbDirection::In => &mut self.ep_in,
            UsbDirection::Out => &mut self.ep_out,
        }
    }

    /// Returns the PID for the next packet without advancing
    pub fn peek(&self, index: usize, direction: UsbDirection) -> Pid {
        let mask = match direction {
            UsbDirection::In => self.ep_in,
            UsbDirection::Out => self.ep_out,
        };
        if mask & (1 << index) != 0 {
            Pid::Data1
        } else {
            Pid::Data0
        }
    }

    /// Returns the PID for the next packet, then toggles it
    ///
    /// Call this exactly once for each buffer handed to the controller.
    pub fn advance(&mut self, index: usize, direction: UsbDirection) -> Pid {
        debug_assert!(index < ENDPOINT_COUNT);
        let pid = self.peek(index, direction);
        *self.mask(direction) ^= 1 << index;
        pid
    }

    /// Force the PID of the next packet
    pub fn set(&mut self, index: usize, direction: UsbDirection, pid: Pid) {
        let mask = self.mask(direction);
        match pid {
            Pid::Data0 => *mask &= !(1 << index),
            Pid::Data1 => *mask |= 1 << index,
        }
    }

    /// Reset every endpoint direction to DATA0
    pub fn reset(&mut self) {
        *self = DataSequence::new();
    }
}
