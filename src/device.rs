//! Interrupt dispatch
//!
//! A [`Device`] owns the [`Controller`] and your handlers. Call
//! [`on_interrupt()`](Device::on_interrupt) from the USBCTRL interrupt, and the
//! device runs the EP0 control transfers, hands received packets to your
//! receive handlers, and tells your transmit handlers when the host took a
//! packet.
//!
//! Handlers run in interrupt context. They're plain functions that receive
//! the controller, so they can respond right away.

use crate::{
    control::Setup,
    dpram::{BUFFER_LEN, ENDPOINT_COUNT},
    driver::Controller,
    ral::usb::Interrupts,
    timer::Clock,
    Error,
};
use usb_device::{
    control::{Recipient, Request, RequestType},
    endpoint::EndpointAddress,
};

/// Number of interface (class) request handlers
pub const INTERFACE_COUNT: usize = 16;

/// Handles a SETUP packet
///
/// Return `true` if you serviced the request, which means you already sent
/// the response through the controller. Return `false` to have the
/// device stall the request.
pub type SetupHandler<C> = fn(&mut Controller<C>, &Setup) -> bool;

/// Handles a packet received on an OUT endpoint
///
/// The second argument is the endpoint index. The endpoint receives the
/// next packet after the handler returns.
pub type ReceiveHandler<C> = fn(&mut Controller<C>, usize, &[u8]);

/// Called when the host took a packet from an IN endpoint
///
/// The second argument is the endpoint index.
pub type TransmitHandler<C> = fn(&mut Controller<C>, usize);

/// `BUFF_STATUS` bit for EP0 IN
const EP0_IN: u32 = 1;

/// A USB device
pub struct Device<C> {
    controller: Controller<C>,
    standard: Option<SetupHandler<C>>,
    interfaces: [Option<SetupHandler<C>>; INTERFACE_COUNT],
    receive: [Option<ReceiveHandler<C>>; ENDPOINT_COUNT],
    transmit: [Option<TransmitHandler<C>>; ENDPOINT_COUNT],
}

impl<C: Clock> Device<C> {
    /// Create a device without any handlers
    ///
    /// You should configure the controller before creating the device.
    pub fn new(controller: Controller<C>) -> Self {
        Device {
            controller,
            standard: None,
            interfaces: [None; INTERFACE_COUNT],
            receive: [None; ENDPOINT_COUNT],
            transmit: [None; ENDPOINT_COUNT],
        }
    }

    /// Handle standard requests, like GET_DESCRIPTOR and SET_CONFIGURATION
    ///
    /// The device always handles SET_ADDRESS. If your handler doesn't
    /// service a GET_STATUS, the device answers it.
    pub fn set_standard_handler(&mut self, handler: SetupHandler<C>) {
        self.standard = Some(handler);
    }

    /// Handle class and vendor requests for an interface
    ///
    /// Requests addressed to an endpoint go to the handler at the endpoint's
    /// index.
    pub fn set_interface_handler(
        &mut self,
        interface: usize,
        handler: SetupHandler<C>,
    ) -> Result<(), Error> {
        let slot = self
            .interfaces
            .get_mut(interface)
            .ok_or(Error::InvalidInterface)?;
        *slot = Some(handler);
        Ok(())
    }

    /// Handle packets received on the OUT endpoint `index`
    pub fn set_receive_handler(
        &mut self,
        index: usize,
        handler: ReceiveHandler<C>,
    ) -> Result<(), Error> {
        let slot = self.receive.get_mut(index).ok_or(Error::InvalidEndpoint)?;
        *slot = Some(handler);
        Ok(())
    }

    /// Handle transmit completions on the IN endpoint `index`
    pub fn set_transmit_handler(
        &mut self,
        index: usize,
        handler: TransmitHandler<C>,
    ) -> Result<(), Error> {
        let slot = self.transmit.get_mut(index).ok_or(Error::InvalidEndpoint)?;
        *slot = Some(handler);
        Ok(())
    }

    /// Access the controller
    pub fn controller(&self) -> &Controller<C> {
        &self.controller
    }

    /// Mutable access to the controller, for sending and endpoint configuration
    pub fn controller_mut(&mut self) -> &mut Controller<C> {
        &mut self.controller
    }

    /// Service the USB interrupt
    ///
    /// Handles a SETUP, then completed buffers, then a bus reset, for
    /// whichever of those are signaled.
    pub fn on_interrupt(&mut self) {
        let status = self.controller.interrupt_status();
        trace!("INTS {:X}", status.bits());

        let setup = status.contains(Interrupts::SETUP_REQ);
        if setup {
            let setup = self.controller.take_setup();
            self.on_setup(&setup);
        }

        if status.contains(Interrupts::BUFF_STATUS) {
            let buffers = self.controller.buffer_status();
            self.on_buffers(buffers, setup);
            // Only after everything is handled, so we don't lose a
            // completion that arrived in the meantime.
            self.controller.acknowledge_buffers(buffers);
        }

        if status.contains(Interrupts::BUS_RESET) {
            self.controller.bus_reset();
        }
    }

    fn on_setup(&mut self, setup: &Setup) {
        debug!(
            "SETUP {:X} {:X} {:X} {:X} {}",
            setup.request_type, setup.request, setup.value, setup.index, setup.length
        );
        let serviced = match setup.request_type() {
            RequestType::Standard => self.standard_request(setup),
            _ => self.interface_request(setup),
        };
        if !serviced {
            warn!("STALL {:X} {:X}", setup.request_type, setup.request);
            self.controller.stall_ep0_in();
        }
    }

    fn standard_request(&mut self, setup: &Setup) -> bool {
        if setup.request == Request::SET_ADDRESS && setup.recipient() == Recipient::Device {
            return self.controller.set_address(setup).is_ok();
        }
        if let Some(handler) = self.standard {
            if handler(&mut self.controller, setup) {
                return true;
            }
        }
        setup.request == Request::GET_STATUS && self.get_status(setup)
    }

    /// Device and interface status are always zero. Endpoints report their halt bit.
    fn get_status(&mut self, setup: &Setup) -> bool {
        let status: u16 = match setup.recipient() {
            Recipient::Device | Recipient::Interface => 0,
            Recipient::Endpoint => {
                let addr = EndpointAddress::from(setup.index as u8);
                if addr.index() >= ENDPOINT_COUNT {
                    return false;
                }
                self.controller.is_stalled(addr) as u16
            }
            _ => return false,
        };
        self.controller
            .send_control(&status.to_le_bytes(), setup.length as usize)
            .is_ok()
    }

    fn interface_request(&mut self, setup: &Setup) -> bool {
        let index = match setup.recipient() {
            Recipient::Endpoint => setup.index & 0x0F,
            _ => setup.index & 0xFF,
        };
        match self.interfaces.get(index as usize).copied().flatten() {
            Some(handler) => handler(&mut self.controller, setup),
            None => false,
        }
    }

    fn on_buffers(&mut self, buffers: u32, setup: bool) {
        // A SETUP in the same interrupt makes any EP0 IN completion stale.
        let continued = buffers & EP0_IN != 0 && !setup && self.controller.continue_control();

        for index in 0..ENDPOINT_COUNT {
            let ep_in = 1 << (2 * index);
            let ep_out = ep_in << 1;

            if buffers & ep_out != 0 {
                self.on_receive(index);
            }
            if buffers & ep_in != 0 && !(index == 0 && continued) {
                if let Some(handler) = self.transmit[index] {
                    handler(&mut self.controller, index);
                }
            }
        }
    }

    fn on_receive(&mut self, index: usize) {
        let mut packet = [0; BUFFER_LEN];
        // The buffer may have been taken by a handler that polled for it.
        let Some(len) = self.controller.read_packet(index, &mut packet) else {
            return;
        };
        if let Some(handler) = self.receive[index] {
            handler(&mut self.controller, index, &packet[..len]);
        }
        self.controller.complete_receive(index);
    }
}
