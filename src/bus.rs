//! Sharing the device between thread mode and the USB interrupt

use crate::{
    device::{Device, ReceiveHandler, SetupHandler, TransmitHandler},
    timer::Clock,
    Error,
};
use core::cell::RefCell;
use cortex_m::interrupt::{self, Mutex};
use usb_device::endpoint::{EndpointAddress, EndpointType};

/// A [`Device`] shared by thread mode and the USB interrupt
///
/// Every method runs in a critical section. Call
/// [`on_interrupt()`](BusAdapter::on_interrupt) from your USBCTRL interrupt
/// handler, and use the other methods from anywhere.
pub struct BusAdapter<C> {
    device: Mutex<RefCell<Device<C>>>,
}

impl<C: Clock> BusAdapter<C> {
    /// Wrap a device
    ///
    /// Register the handlers you know about before wrapping the device.
    pub const fn new(device: Device<C>) -> Self {
        BusAdapter {
            device: Mutex::new(RefCell::new(device)),
        }
    }

    /// Interrupt-safe, mutable access to the device
    ///
    /// # Panics
    ///
    /// Panics if called from within `func`.
    pub fn with_device<R>(&self, func: impl FnOnce(&mut Device<C>) -> R) -> R {
        interrupt::free(|cs| {
            let device = self.device.borrow(cs);
            let mut device = device.borrow_mut();
            func(&mut *device)
        })
    }

    /// Service the USB interrupt
    pub fn on_interrupt(&self) {
        self.with_device(|device| device.on_interrupt());
    }

    /// Send one packet on an IN endpoint
    ///
    /// See [`Controller::send`](crate::Controller::send).
    pub fn send(&self, index: usize, data: &[u8]) -> Result<usize, Error> {
        self.with_device(|device| device.controller_mut().send(index, data))
    }

    pub fn configure_endpoint(
        &self,
        addr: EndpointAddress,
        kind: EndpointType,
    ) -> Result<(), Error> {
        self.with_device(|device| device.controller_mut().configure_endpoint(addr, kind))
    }

    pub fn set_standard_handler(&self, handler: SetupHandler<C>) {
        self.with_device(|device| device.set_standard_handler(handler));
    }

    pub fn set_interface_handler(
        &self,
        interface: usize,
        handler: SetupHandler<C>,
    ) -> Result<(), Error> {
        self.with_device(|device| device.set_interface_handler(interface, handler))
    }

    pub fn set_receive_handler(&self, index: usize, handler: ReceiveHandler<C>) -> Result<(), Error> {
        self.with_device(|device| device.set_receive_handler(index, handler))
    }

    pub fn set_transmit_handler(
        &self,
        index: usize,
        handler: TransmitHandler<C>,
    ) -> Result<(), Error> {
        self.with_device(|device| device.set_transmit_handler(index, handler))
    }
}
