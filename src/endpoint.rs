//! A USB endpoint, as seen through packet memory
//!
//! Each operation here follows the controller's buffer hand-off rules:
//! the CPU owns a buffer while its `AVAILABLE` bit is clear, and gives it to
//! the controller by setting `AVAILABLE`. The data copy always happens before
//! the hand-off.

use crate::{
    dpram::{self, Dpram, Registers, BUFFER_LEN},
    ral,
    state::{DataSequence, Pid},
    Error,
};
use core::sync::atomic::{compiler_fence, Ordering};
use usb_device::{endpoint::EndpointType, UsbDirection};

/// The endpoint types with buffer priming rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Kind {
    Control = dpram::CONTROL::ENDPOINT_TYPE::RW::CONTROL,
    Bulk = dpram::CONTROL::ENDPOINT_TYPE::RW::BULK,
    Interrupt = dpram::CONTROL::ENDPOINT_TYPE::RW::INTERRUPT,
}

impl TryFrom<EndpointType> for Kind {
    type Error = Error;
    fn try_from(kind: EndpointType) -> Result<Self, Error> {
        match kind {
            EndpointType::Control => Ok(Kind::Control),
            EndpointType::Bulk => Ok(Kind::Bulk),
            EndpointType::Interrupt => Ok(Kind::Interrupt),
            EndpointType::Isochronous { .. } => Err(Error::Unsupported),
        }
    }
}

/// One direction of an endpoint
pub struct Endpoint<'a> {
    dpram: &'a Dpram,
    regs: Registers<'a>,
    index: usize,
    direction: UsbDirection,
}

impl<'a> Endpoint<'a> {
    /// # Panics
    ///
    /// Panics if `index` is out of range. Callers validate it first.
    pub fn new(dpram: &'a Dpram, index: usize, direction: UsbDirection) -> Self {
        Endpoint {
            dpram,
            regs: dpram.endpoint(index, direction),
            index,
            direction,
        }
    }

    /// Write the endpoint control word for `kind`
    ///
    /// EP0 has no endpoint control word; the controller always enables it.
    fn enable(&self, kind: Kind) {
        if self.index == 0 {
            return;
        }
        ral::write_reg!(
            crate::dpram,
            &self.regs,
            CONTROL,
            ENABLE: 1,
            INTERRUPT_PER_BUFF: 1,
            ENDPOINT_TYPE: kind as u32,
            BUFFER_ADDRESS: Dpram::buffer_offset(self.index, self.direction)
        );
    }

    /// Indicates if the endpoint is enabled
    ///
    /// EP0 is always enabled.
    pub fn is_enabled(&self) -> bool {
        self.index == 0 || ral::read_reg!(crate::dpram, &self.regs, CONTROL, ENABLE == 1)
    }

    /// Indicates if this endpoint follows control-transfer rules
    pub fn is_control(&self) -> bool {
        self.index == 0
            || ral::read_reg!(crate::dpram, &self.regs, CONTROL, ENDPOINT_TYPE == CONTROL)
    }

    /// Enable the endpoint, and prime the buffer for its type and direction
    ///
    /// - Control endpoints prime their OUT buffer as DATA1.
    /// - Bulk and interrupt OUT endpoints prime their buffer as DATA0.
    /// - IN endpoints stay unavailable until there's something to send.
    ///
    /// Running this twice has the same effect as running it once.
    pub fn configure(&self, kind: Kind, sequence: &mut DataSequence) {
        self.enable(kind);
        sequence.set(self.index, self.direction, Pid::Data0);
        ral::write_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, 0);

        if self.direction == UsbDirection::Out {
            let pid = if kind == Kind::Control {
                Pid::Data1
            } else {
                sequence.advance(self.index, self.direction)
            };
            self.arm(pid);
        }
    }

    /// Hand an empty OUT buffer to the controller
    fn arm(&self, pid: Pid) {
        ral::write_reg!(
            crate::dpram,
            &self.regs,
            BUFFER_CONTROL,
            LENGTH_0: BUFFER_LEN as u32,
            PID_0: pid as u32
        );
        // The controller may sample AVAILABLE before the other bits settle.
        compiler_fence(Ordering::SeqCst);
        ral::modify_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, AVAILABLE_0: 1);
    }

    /// Indicates if the controller owns the buffer
    pub fn is_available(&self) -> bool {
        ral::read_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, AVAILABLE_0 == 1)
    }

    /// Copy up to one packet from `data` into the IN buffer, and hand it to the controller
    ///
    /// Returns the number of bytes scheduled.
    pub fn transmit(&self, data: &[u8], sequence: &mut DataSequence) -> usize {
        debug_assert_eq!(self.direction, UsbDirection::In);
        let count = self.dpram.write_buffer(self.index, self.direction, data);
        compiler_fence(Ordering::SeqCst);

        let pid = sequence.advance(self.index, self.direction);
        ral::write_reg!(
            crate::dpram,
            &self.regs,
            BUFFER_CONTROL,
            LENGTH_0: count as u32,
            PID_0: pid as u32,
            FULL_0: 1,
            AVAILABLE_0: 1
        );
        trace!("EP{} IN {} {}", self.index, count, pid as u32);
        count
    }

    /// Take a received packet from the OUT buffer
    ///
    /// Returns `None`, and leaves the buffer alone, if it didn't hold a packet.
    /// Otherwise, resets the buffer length to the full capacity, then copies the
    /// payload into `buffer`. The buffer stays with the CPU until
    /// [`complete_receive`](Self::complete_receive).
    pub fn receive(&self, buffer: &mut [u8; BUFFER_LEN]) -> Option<usize> {
        debug_assert_eq!(self.direction, UsbDirection::Out);
        let (full, length) =
            ral::read_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, FULL_0, LENGTH_0);
        if full == 0 {
            return None;
        }
        ral::write_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, LENGTH_0: BUFFER_LEN as u32);

        let size = (length as usize).min(BUFFER_LEN);
        let read = self
            .dpram
            .read_buffer(self.index, self.direction, &mut buffer[..size]);
        trace!("EP{} OUT {}", self.index, read);
        Some(read)
    }

    /// Give the OUT buffer back to the controller for the next packet
    ///
    /// Control endpoints always expect DATA1. Other endpoints alternate.
    pub fn complete_receive(&self, sequence: &mut DataSequence) {
        let pid = if self.is_control() {
            Pid::Data1
        } else {
            sequence.advance(self.index, self.direction)
        };
        ral::modify_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, PID_0: pid as u32);
        compiler_fence(Ordering::SeqCst);
        ral::modify_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, AVAILABLE_0: 1);
    }

    /// Stall the endpoint
    ///
    /// For EP0, you also need to arm the stall in the controller registers.
    pub fn stall(&self) {
        ral::write_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, FULL_0: 1);
        ral::write_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, FULL_0: 1, STALL: 1);
    }

    /// Clear a stall, restarting the data sequence at DATA0
    pub fn unstall(&self, sequence: &mut DataSequence) {
        ral::write_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, 0);
        sequence.set(self.index, self.direction, Pid::Data0);
        if self.direction == UsbDirection::Out {
            if self.is_control() {
                self.arm(Pid::Data1);
            } else {
                let pid = sequence.advance(self.index, self.direction);
                self.arm(pid);
            }
        }
    }

    /// Indicates if the endpoint is stalled
    pub fn is_stalled(&self) -> bool {
        ral::read_reg!(crate::dpram, &self.regs, BUFFER_CONTROL, STALL == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::{Endpoint, Kind};
    use crate::{
        dpram::{Dpram, BUFFER_LEN},
        state::{DataSequence, Pid},
        Error,
    };
    use usb_device::{endpoint::EndpointType, UsbDirection};

    const AVAILABLE: u32 = 1 << 10;
    const STALL: u32 = 1 << 11;
    const DATA1: u32 = 1 << 13;
    const FULL: u32 = 1 << 15;
    const ENABLE: u32 = 1 << 31;
    const INTERRUPT_PER_BUFF: u32 = 1 << 29;

    #[test]
    fn kinds() {
        assert_eq!(Kind::try_from(EndpointType::Bulk), Ok(Kind::Bulk));
        assert_eq!(Kind::try_from(EndpointType::Control), Ok(Kind::Control));
        assert_eq!(Kind::try_from(EndpointType::Interrupt), Ok(Kind::Interrupt));
        assert_eq!(
            Kind::try_from(EndpointType::Isochronous {
                synchronization: usb_device::endpoint::IsochronousSynchronizationType::NoSynchronization,
                usage: usb_device::endpoint::IsochronousUsageType::Data,
            }),
            Err(Error::Unsupported)
        );
    }

    #[test]
    fn availability_after_configure() {
        for kind in [Kind::Control, Kind::Bulk, Kind::Interrupt] {
            for index in 0..16 {
                for direction in [UsbDirection::In, UsbDirection::Out] {
                    let dpram = Dpram::new();
                    let mut seq = DataSequence::new();
                    let ep = Endpoint::new(&dpram, index, direction);
                    ep.configure(kind, &mut seq);
                    assert_eq!(
                        ep.is_available(),
                        direction == UsbDirection::Out,
                        "{kind:?} EP{index} {direction:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn bulk_out_control_words() {
        let dpram = Dpram::new();
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 2, UsbDirection::Out);
        ep.configure(Kind::Bulk, &mut seq);

        let regs = dpram.endpoint(2, UsbDirection::Out);
        assert_eq!(
            regs.CONTROL.read(),
            ENABLE | INTERRUPT_PER_BUFF | (2 << 26) | 0x240
        );
        assert_eq!(regs.BUFFER_CONTROL.read(), AVAILABLE | BUFFER_LEN as u32);
        assert_eq!(seq.peek(2, UsbDirection::Out), Pid::Data1);
    }

    #[test]
    fn interrupt_in_control_words() {
        let dpram = Dpram::new();
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 3, UsbDirection::In);
        ep.configure(Kind::Interrupt, &mut seq);

        let regs = dpram.endpoint(3, UsbDirection::In);
        assert_eq!(
            regs.CONTROL.read(),
            ENABLE | INTERRUPT_PER_BUFF | (3 << 26) | 0x280
        );
        assert_eq!(regs.BUFFER_CONTROL.read(), 0);
        assert!(ep.is_enabled());
        assert!(!ep.is_control());
    }

    #[test]
    fn control_ep0_leaves_setup_alone() {
        let dpram = Dpram::new();
        dpram.endpoint(0, UsbDirection::In).CONTROL.write(0xDEAD_BEEF);
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 0, UsbDirection::Out);
        ep.configure(Kind::Control, &mut seq);

        assert_eq!(dpram.endpoint(0, UsbDirection::In).CONTROL.read(), 0xDEAD_BEEF);
        assert_eq!(
            dpram.endpoint(0, UsbDirection::Out).BUFFER_CONTROL.read(),
            DATA1 | AVAILABLE | BUFFER_LEN as u32
        );
    }

    #[test]
    fn configure_is_idempotent() {
        let once = Dpram::new();
        let twice = Dpram::new();
        let mut seq_once = DataSequence::new();
        let mut seq_twice = DataSequence::new();

        Endpoint::new(&once, 4, UsbDirection::Out).configure(Kind::Bulk, &mut seq_once);
        let ep = Endpoint::new(&twice, 4, UsbDirection::Out);
        ep.configure(Kind::Bulk, &mut seq_twice);
        ep.configure(Kind::Bulk, &mut seq_twice);

        let once = once.endpoint(4, UsbDirection::Out);
        let twice = twice.endpoint(4, UsbDirection::Out);
        assert_eq!(once.CONTROL.read(), twice.CONTROL.read());
        assert_eq!(once.BUFFER_CONTROL.read(), twice.BUFFER_CONTROL.read());
        assert_eq!(seq_once, seq_twice);
    }

    #[test]
    fn transmit_alternates_pid() {
        let dpram = Dpram::new();
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 1, UsbDirection::In);
        ep.configure(Kind::Bulk, &mut seq);

        for packet in 0..6u32 {
            assert_eq!(ep.transmit(&[packet as u8; 10], &mut seq), 10);
            let word = dpram.endpoint(1, UsbDirection::In).BUFFER_CONTROL.read();
            assert_eq!(word & DATA1 != 0, packet % 2 == 1);
            assert_eq!(word & (FULL | AVAILABLE), FULL | AVAILABLE);
            assert_eq!(word & 0x3FF, 10);
        }
    }

    #[test]
    fn transmit_limits_to_one_packet() {
        let dpram = Dpram::new();
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 5, UsbDirection::In);
        assert_eq!(ep.transmit(&[0x11; 100], &mut seq), BUFFER_LEN);

        let mut buffer = [0; BUFFER_LEN];
        dpram.read_buffer(5, UsbDirection::In, &mut buffer);
        assert_eq!(buffer, [0x11; BUFFER_LEN]);
    }

    #[test]
    fn receive_then_rearm() {
        let dpram = Dpram::new();
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 2, UsbDirection::Out);
        ep.configure(Kind::Bulk, &mut seq);

        // Controller receives five bytes
        dpram.write_buffer(2, UsbDirection::Out, b"hello");
        let regs = dpram.endpoint(2, UsbDirection::Out);
        regs.BUFFER_CONTROL.write(FULL | 5);

        let mut buffer = [0; BUFFER_LEN];
        assert_eq!(ep.receive(&mut buffer), Some(5));
        assert_eq!(&buffer[..5], b"hello");
        assert_eq!(regs.BUFFER_CONTROL.read(), BUFFER_LEN as u32);
        assert!(!ep.is_available());

        ep.complete_receive(&mut seq);
        assert_eq!(
            regs.BUFFER_CONTROL.read(),
            DATA1 | AVAILABLE | BUFFER_LEN as u32
        );

        // Next packet is DATA1, so the one after expects DATA0
        regs.BUFFER_CONTROL.write(FULL | 1);
        assert_eq!(ep.receive(&mut buffer), Some(1));
        ep.complete_receive(&mut seq);
        assert_eq!(regs.BUFFER_CONTROL.read(), AVAILABLE | BUFFER_LEN as u32);
    }

    #[test]
    fn control_out_pinned_to_data1() {
        let dpram = Dpram::new();
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 0, UsbDirection::Out);
        ep.configure(Kind::Control, &mut seq);

        let regs = dpram.endpoint(0, UsbDirection::Out);
        let mut buffer = [0; BUFFER_LEN];
        for _ in 0..3 {
            regs.BUFFER_CONTROL.write(FULL | DATA1);
            assert_eq!(ep.receive(&mut buffer), Some(0));
            ep.complete_receive(&mut seq);
            assert_eq!(
                regs.BUFFER_CONTROL.read(),
                DATA1 | AVAILABLE | BUFFER_LEN as u32
            );
        }
    }

    #[test]
    fn receive_without_packet() {
        let dpram = Dpram::new();
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 6, UsbDirection::Out);
        ep.configure(Kind::Bulk, &mut seq);

        let mut buffer = [0; BUFFER_LEN];
        assert_eq!(ep.receive(&mut buffer), None);
    }

    #[test]
    fn stall_and_unstall() {
        let dpram = Dpram::new();
        let mut seq = DataSequence::new();
        let ep = Endpoint::new(&dpram, 7, UsbDirection::Out);
        ep.configure(Kind::Bulk, &mut seq);
        seq.advance(7, UsbDirection::Out);

        ep.stall();
        assert!(ep.is_stalled());
        assert_eq!(
            dpram.endpoint(7, UsbDirection::Out).BUFFER_CONTROL.read(),
            FULL | STALL
        );

        ep.unstall(&mut seq);
        assert!(!ep.is_stalled());
        assert!(ep.is_available());
        // Restarted at DATA0
        assert_eq!(
            dpram.endpoint(7, UsbDirection::Out).BUFFER_CONTROL.read(),
            AVAILABLE | BUFFER_LEN as u32
        );
        assert_eq!(seq.peek(7, UsbDirection::Out), Pid::Data1);
    }
}
