//! USB controller driver
//!
//! [`Controller`] owns the register blocks, and implements the transfer
//! operations that the interrupt dispatcher and your handlers use. It
//! doesn't dispatch anything on its own; see [`Device`](crate::Device).

use crate::{
    control::{PendingControl, Setup},
    dpram::{self, BUFFER_LEN, ENDPOINT_COUNT},
    endpoint::{Endpoint, Kind},
    ral::{
        self,
        usb::{Interrupts, SieStatus},
    },
    state::{DataSequence, Pid},
    timer::{Clock, Deadline},
    Config, Error,
};
use usb_device::{
    endpoint::{EndpointAddress, EndpointType},
    UsbDirection,
};

/// How long the host has to acknowledge the SET_ADDRESS status stage
const SET_ADDRESS_TIMEOUT_US: u32 = 570;

/// How long a handler waits for an EP0 OUT data stage
const CONTROL_OUT_TIMEOUT_US: u32 = 5_000;

/// `BUFF_STATUS` bit for an endpoint direction
const fn buffer_bit(index: usize, direction: UsbDirection) -> u32 {
    let shift = 2 * index as u32;
    match direction {
        UsbDirection::In => 1 << shift,
        UsbDirection::Out => 1 << (shift + 1),
    }
}

/// A USB device controller
///
/// After you create a `Controller` with [`new()`](Controller::new), you must
///
/// - call [`configure()`](Controller::configure) once
/// - configure your endpoints with [`configure_endpoint()`](Controller::configure_endpoint)
///
/// EP0 is always configured as a control endpoint. `C` is the time source for
/// the driver's bounded busy-waits.
pub struct Controller<C> {
    usb: ral::usb::Instance,
    dpram: dpram::Instance,
    resets: ral::resets::Instance,
    clock: C,
    sequence: DataSequence,
    pending: PendingControl,
    ep0_packet_size: usize,
}

impl<C: Clock> Controller<C> {
    /// Create a controller from the USB register blocks
    ///
    /// Creation doesn't touch the hardware.
    pub fn new<P: crate::Peripherals>(peripherals: P, clock: C) -> Self {
        let ral::Instances { usb, dpram, resets } = ral::instances(peripherals);
        Controller {
            usb,
            dpram,
            resets,
            clock,
            sequence: DataSequence::new(),
            pending: PendingControl::new(),
            ep0_packet_size: BUFFER_LEN,
        }
    }

    /// Reset and enable the USB controller in device mode, then connect to the bus
    ///
    /// Assumes that the USB clock is running. Every endpoint other than EP0 is
    /// disabled after this call.
    pub fn configure(&mut self, config: Config) {
        let reset = config.chip.usbctrl_reset();
        self.resets.RESET.set_bits(reset);
        self.resets.RESET.clear_bits(reset);
        while self.resets.RESET_DONE.read() & reset == 0 {}

        self.dpram.reset();
        ral::write_reg!(ral::usb, self.usb, INTE, 0);

        ral::write_reg!(ral::usb, self.usb, USB_MUXING, TO_PHY: 1, SOFTCON: 1);
        if config.force_vbus_detect {
            ral::write_reg!(ral::usb, self.usb, USB_PWR, VBUS_DETECT: 1, VBUS_DETECT_OVERRIDE_EN: 1);
        }
        // Device mode. Also removes the RP2350 PHY isolation.
        ral::write_reg!(ral::usb, self.usb, MAIN_CTRL, CONTROLLER_EN: 1, HOST_NDEVICE: 0, PHY_ISO: 0);

        self.ep0_packet_size = (config.ep0_max_packet_size as usize).clamp(8, BUFFER_LEN);
        self.sequence.reset();
        self.pending.clear();
        self.configure_ep0();

        ral::write_reg!(
            ral::usb,
            self.usb,
            INTE,
            (Interrupts::BUFF_STATUS | Interrupts::BUS_RESET | Interrupts::SETUP_REQ).bits()
        );
        ral::modify_reg!(ral::usb, self.usb, SIE_CTRL, PULLUP_EN: 1);
        debug!("CONFIGURED");
    }

    /// EP0 has no endpoint control words. Instead, the controller raises one
    /// interrupt per EP0 buffer when `EP0_INT_1BUF` is set.
    fn configure_ep0(&mut self) {
        ral::modify_reg!(ral::usb, self.usb, SIE_CTRL, EP0_INT_1BUF: 1);
        for direction in [UsbDirection::In, UsbDirection::Out] {
            Endpoint::new(&self.dpram, 0, direction).configure(Kind::Control, &mut self.sequence);
        }
    }

    /// Configure an endpoint
    ///
    /// OUT endpoints are ready to receive when this returns. Isochronous
    /// endpoints aren't supported, and EP0 can only be a control endpoint.
    /// Rejected configurations leave the hardware untouched.
    pub fn configure_endpoint(
        &mut self,
        addr: EndpointAddress,
        kind: EndpointType,
    ) -> Result<(), Error> {
        let kind = Kind::try_from(kind)?;
        let index = addr.index();
        if index >= ENDPOINT_COUNT || (index == 0 && kind != Kind::Control) {
            return Err(Error::InvalidEndpoint);
        }

        if index == 0 {
            ral::modify_reg!(ral::usb, self.usb, SIE_CTRL, EP0_INT_1BUF: 1);
        }
        Endpoint::new(&self.dpram, index, addr.direction()).configure(kind, &mut self.sequence);
        debug!("CONFIGURE EP{} {:?} {}", index, addr.direction(), kind as u32);
        Ok(())
    }

    /// Send one packet on an IN endpoint
    ///
    /// Returns the number of bytes scheduled, which is at most one packet.
    /// For EP0, this behaves like [`send_control`](Self::send_control) without
    /// a length limit.
    pub fn send(&mut self, index: usize, data: &[u8]) -> Result<usize, Error> {
        self.send_with_max(index, data, 0)
    }

    /// Like [`send`](Self::send), but never sends more than `max_count` bytes
    ///
    /// A `max_count` of zero means "no limit."
    pub fn send_with_max(
        &mut self,
        index: usize,
        data: &[u8],
        max_count: usize,
    ) -> Result<usize, Error> {
        if index == 0 {
            return self.send_control(data, max_count);
        }
        if index >= ENDPOINT_COUNT {
            return Err(Error::InvalidEndpoint);
        }

        let ep = Endpoint::new(&self.dpram, index, UsbDirection::In);
        if !ep.is_enabled() {
            return Err(Error::InvalidEndpoint);
        }
        if ep.is_available() {
            return Err(Error::WouldBlock);
        }

        let count = if max_count > 0 {
            data.len().min(max_count)
        } else {
            data.len()
        };
        Ok(ep.transmit(&data[..count], &mut self.sequence))
    }

    /// Start the data stage of an EP0 IN transfer
    ///
    /// `max_count` is the host's requested length (`wLength`), or zero if
    /// there's no limit. The driver sends the first packet right away, and
    /// the remaining packets as the host acknowledges each one. If the data
    /// is shorter than the host asked for, and it ends on a packet boundary,
    /// the driver terminates the transfer with a zero-length packet.
    ///
    /// Returns the number of bytes in the first packet. Starting a new transfer
    /// abandons whatever remained of the previous one.
    ///
    /// A data stage longer than one packet must fit in
    /// [`CONTROL_BUFFER_LEN`](crate::CONTROL_BUFFER_LEN) bytes. If it doesn't,
    /// this returns [`Error::BufferOverflow`] and sends nothing. Use
    /// [`send_control_static`](Self::send_control_static) for larger, static data.
    pub fn send_control(&mut self, data: &[u8], max_count: usize) -> Result<usize, Error> {
        self.start_control(data, max_count, |pending, data, first, zlp| {
            pending.start(data, first, zlp)
        })
    }

    /// Like [`send_control`](Self::send_control), but the driver holds on to
    /// `data` instead of copying it
    ///
    /// Use this for descriptors. There's no size limit.
    pub fn send_control_static(
        &mut self,
        data: &'static [u8],
        max_count: usize,
    ) -> Result<usize, Error> {
        self.start_control(data, max_count, |pending, data, first, zlp| {
            pending.start_static(data, first, zlp);
            Ok(())
        })
    }

    fn start_control<'d>(
        &mut self,
        data: &'d [u8],
        max_count: usize,
        start: impl FnOnce(&mut PendingControl, &'d [u8], usize, bool) -> Result<(), Error>,
    ) -> Result<usize, Error> {
        let total = if max_count > 0 {
            data.len().min(max_count)
        } else {
            data.len()
        };
        let data = &data[..total];
        let packet_size = self.ep0_packet_size;
        let zlp = max_count > total && total > 0 && total % packet_size == 0;
        let first = total.min(packet_size);

        if total > packet_size || zlp {
            start(&mut self.pending, data, first, zlp)?;
        } else {
            self.pending.clear();
        }

        self.sequence.set(0, UsbDirection::In, Pid::Data1);
        Ok(Endpoint::new(&self.dpram, 0, UsbDirection::In)
            .transmit(&data[..first], &mut self.sequence))
    }

    /// Send a zero-length DATA1 packet on EP0
    ///
    /// Use this for the status stage of a control transfer without an IN data stage.
    pub fn send_zlp(&mut self) {
        self.pending.clear();
        self.sequence.set(0, UsbDirection::In, Pid::Data1);
        Endpoint::new(&self.dpram, 0, UsbDirection::In).transmit(&[], &mut self.sequence);
    }

    /// Indicates if an EP0 IN transfer is waiting for the host to take more packets
    pub fn is_control_pending(&self) -> bool {
        self.pending.is_active()
    }

    /// Stall EP0 IN, rejecting the current control request
    ///
    /// The controller drops the stall when the next SETUP arrives.
    pub fn stall_ep0_in(&mut self) {
        self.pending.clear();
        ral::modify_reg!(ral::usb, self.usb, EP_STALL_ARM, EP0_IN: 1);
        Endpoint::new(&self.dpram, 0, UsbDirection::In).stall();
    }

    /// Stall (`true`) or clear the stall on (`false`) an endpoint
    ///
    /// Clearing a stall restarts the endpoint's data sequence at DATA0, and
    /// readies an OUT endpoint to receive.
    pub fn set_stalled(&mut self, addr: EndpointAddress, stalled: bool) -> Result<(), Error> {
        let (index, direction) = (addr.index(), addr.direction());
        if index >= ENDPOINT_COUNT {
            return Err(Error::InvalidEndpoint);
        }
        let ep = Endpoint::new(&self.dpram, index, direction);
        if !ep.is_enabled() {
            return Err(Error::InvalidEndpoint);
        }

        if index == 0 {
            let arm = stalled as u32;
            match direction {
                UsbDirection::In => ral::modify_reg!(ral::usb, self.usb, EP_STALL_ARM, EP0_IN: arm),
                UsbDirection::Out => ral::modify_reg!(ral::usb, self.usb, EP_STALL_ARM, EP0_OUT: arm),
            }
        }

        if stalled {
            ep.stall();
        } else {
            ep.unstall(&mut self.sequence);
        }
        debug!("STALL EP{} {:?} {}", index, direction, stalled);
        Ok(())
    }

    /// Indicates if the endpoint is stalled
    ///
    /// Endpoints that don't exist are never stalled.
    pub fn is_stalled(&self, addr: EndpointAddress) -> bool {
        addr.index() < ENDPOINT_COUNT
            && Endpoint::new(&self.dpram, addr.index(), addr.direction()).is_stalled()
    }

    /// Complete a SET_ADDRESS request
    ///
    /// Sends the status stage, and waits for the host to acknowledge it before
    /// the new address takes effect. Blocks for at most 570us. On timeout, the
    /// address doesn't change.
    pub fn set_address(&mut self, setup: &Setup) -> Result<(), Error> {
        ral::write_reg!(ral::usb, self.usb, SIE_STATUS, SieStatus::ACK_REC.bits());
        self.send_zlp();

        let deadline = Deadline::new(&self.clock, SET_ADDRESS_TIMEOUT_US);
        while !self.sie_status().contains(SieStatus::ACK_REC) {
            if deadline.is_expired(&self.clock) {
                warn!("SET_ADDRESS timeout");
                return Err(Error::Timeout);
            }
        }

        let address = (setup.value & 0xFF) as u32;
        ral::write_reg!(ral::usb, self.usb, ADDR_ENDP, ADDRESS: address);
        debug!("ADDRESS {}", self.address());
        Ok(())
    }

    /// The device address
    pub fn address(&self) -> u8 {
        ral::read_reg!(ral::usb, self.usb, ADDR_ENDP, ADDRESS) as u8
    }

    /// Wait for, then read, the OUT data stage of a control transfer
    ///
    /// Call this from a setup handler that expects data from the host. Copies
    /// at most `buffer.len()` bytes, and readies EP0 OUT for the next packet.
    /// Blocks for at most 5ms.
    pub fn receive_control(&mut self, buffer: &mut [u8]) -> Result<usize, Error> {
        let ep0_out = buffer_bit(0, UsbDirection::Out);
        let deadline = Deadline::new(&self.clock, CONTROL_OUT_TIMEOUT_US);
        while self.buffer_status() & ep0_out == 0 {
            if deadline.is_expired(&self.clock) {
                warn!("EP0 OUT timeout");
                return Err(Error::Timeout);
            }
        }
        self.acknowledge_buffers(ep0_out);

        let mut packet = [0; BUFFER_LEN];
        let received = self.read_packet(0, &mut packet).unwrap_or(0);
        self.complete_receive(0);

        let count = received.min(buffer.len());
        buffer[..count].copy_from_slice(&packet[..count]);
        Ok(count)
    }

    /// Access the driver's time source
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn sie_status(&self) -> SieStatus {
        SieStatus::from_bits_truncate(ral::read_reg!(ral::usb, self.usb, SIE_STATUS))
    }

    /// The unmasked, active interrupt sources
    pub(crate) fn interrupt_status(&self) -> Interrupts {
        Interrupts::from_bits_truncate(ral::read_reg!(ral::usb, self.usb, INTS))
    }

    /// Acknowledge a SETUP, and read the packet
    ///
    /// A new SETUP abandons any EP0 IN transfer still in progress.
    pub(crate) fn take_setup(&mut self) -> Setup {
        ral::write_reg!(ral::usb, self.usb, SIE_STATUS, SieStatus::SETUP_REC.bits());
        self.pending.clear();
        Setup::from_bytes(self.dpram.setup_packet())
    }

    pub(crate) fn buffer_status(&self) -> u32 {
        ral::read_reg!(ral::usb, self.usb, BUFF_STATUS)
    }

    pub(crate) fn acknowledge_buffers(&mut self, buffers: u32) {
        ral::write_reg!(ral::usb, self.usb, BUFF_STATUS, buffers);
    }

    /// Send the next packet of a multi-packet EP0 IN transfer
    ///
    /// Returns `false` if there was nothing left to send.
    pub(crate) fn continue_control(&mut self) -> bool {
        match self.pending.next_chunk(self.ep0_packet_size) {
            Some(chunk) => {
                Endpoint::new(&self.dpram, 0, UsbDirection::In).transmit(chunk, &mut self.sequence);
                true
            }
            None => false,
        }
    }

    /// Copy a received packet out of an OUT endpoint
    ///
    /// The buffer stays with the CPU until [`complete_receive`](Self::complete_receive).
    pub(crate) fn read_packet(&self, index: usize, packet: &mut [u8; BUFFER_LEN]) -> Option<usize> {
        Endpoint::new(&self.dpram, index, UsbDirection::Out).receive(packet)
    }

    pub(crate) fn complete_receive(&mut self, index: usize) {
        Endpoint::new(&self.dpram, index, UsbDirection::Out).complete_receive(&mut self.sequence);
    }

    /// Handle a bus reset
    ///
    /// Drops the device address, restarts every data sequence, and readies EP0.
    pub(crate) fn bus_reset(&mut self) {
        ral::write_reg!(ral::usb, self.usb, SIE_STATUS, SieStatus::BUS_RESET.bits());
        ral::write_reg!(ral::usb, self.usb, ADDR_ENDP, 0);
        self.sequence.reset();
        self.pending.clear();
        self.configure_ep0();
        debug!("RESET");
    }
}
