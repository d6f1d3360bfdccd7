//! A full-speed USB device driver for RP2040 and RP2350 processors
//!
//! `rp-usbd` drives the on-chip USB controller in device mode. It owns the
//! packet memory (DPRAM), configures endpoints, runs the EP0 control-transfer
//! state machine, and dispatches USB interrupts to your handlers.
//!
//! Standard-request decoding above EP0 (descriptors, configurations) and USB
//! classes are not part of this crate. You supply them as handlers, and
//! respond through the [`Controller`] API.
//!
//! To interface the library, you must define a safe implementation of [`Peripherals`].
//! See the peripherals documentation for more information.
//!
//! # Example
//!
//! ```no_run
//! use rp_usbd::{Config, Controller, Device, Setup, Timer};
//! use usb_device::{endpoint::{EndpointAddress, EndpointType}, UsbDirection};
//!
//! # struct Ps;
//! # unsafe impl rp_usbd::Peripherals for Ps {
//! #   fn usb(&self) -> *const () { 0x5011_0000 as _ }
//! #   fn dpram(&self) -> *const () { 0x5010_0000 as _ }
//! #   fn resets(&self) -> *const () { 0x4000_C000 as _ }
//! # }
//! fn standard(usb: &mut Controller<Timer>, setup: &Setup) -> bool {
//!     // GET_DESCRIPTOR, SET_CONFIGURATION, ...
//!     # let _ = (usb, setup);
//!     false
//! }
//!
//! fn echo(usb: &mut Controller<Timer>, _: usize, data: &[u8]) {
//!     let _ = usb.send(1, data);
//! }
//!
//! let timer = unsafe { Timer::new(0x4005_4000 as _) };
//! let mut controller = Controller::new(Ps, timer);
//! controller.configure(Config::default());
//!
//! let bulk_in = EndpointAddress::from_parts(1, UsbDirection::In);
//! let bulk_out = EndpointAddress::from_parts(2, UsbDirection::Out);
//! controller.configure_endpoint(bulk_in, EndpointType::Bulk).unwrap();
//! controller.configure_endpoint(bulk_out, EndpointType::Bulk).unwrap();
//!
//! let mut device = Device::new(controller);
//! device.set_standard_handler(standard);
//! device.set_receive_handler(2, echo).unwrap();
//!
//! // From the USBCTRL_IRQ handler:
//! device.on_interrupt();
//! ```

#![no_std]

#[cfg(feature = "defmt-03")]
extern crate defmt_03 as defmt;

#[macro_use]
mod log;
#[macro_use]
mod ral;

mod bus;
mod control;
mod device;
mod dpram;
mod driver;
mod endpoint;
mod state;
mod timer;
mod vcell;

#[cfg(test)]
mod testing;

pub use bus::BusAdapter;
pub use control::{Setup, CONTROL_BUFFER_LEN};
pub use device::{Device, ReceiveHandler, SetupHandler, TransmitHandler, INTERFACE_COUNT};
pub use dpram::{BUFFER_LEN, ENDPOINT_COUNT};
pub use driver::Controller;
pub use timer::{Clock, Timer};

/// A type that owns the USB register blocks
///
/// An implementation of `Peripherals` is expected to own
///
/// - the USB controller registers (`USBCTRL_REGS`)
/// - the USB packet memory (`USBCTRL_DPRAM`)
/// - the subsystem resets (`RESETS`)
///
/// The driver only touches the USB controller's bit in `RESETS`.
///
/// # Safety
///
/// `Peripherals` should only be implemented on a type that
/// owns the various register blocks required for all USB
/// operation. The pointer returned by the methods are
/// assumed to be valid, and will be cast to a register
/// definition.
///
/// # Example
///
/// A safe implementation of `Peripherals` that works with the
/// `rp2040-pac` crate. Assume that `pac` is shorthand for `rp2040_pac`.
///
/// ```
/// # mod pac {
/// #   pub struct USBCTRL_REGS; impl USBCTRL_REGS { pub const PTR: *const () = 0x5011_0000 as _; }
/// #   pub struct USBCTRL_DPRAM; impl USBCTRL_DPRAM { pub const PTR: *const () = 0x5010_0000 as _; }
/// #   pub struct RESETS; impl RESETS { pub const PTR: *const () = 0x4000_C000 as _; }
/// # }
/// use rp_usbd::Peripherals;
///
/// struct Instances {
///     usb: pac::USBCTRL_REGS,
///     dpram: pac::USBCTRL_DPRAM,
///     resets: pac::RESETS,
/// }
///
/// unsafe impl Peripherals for Instances {
///     fn usb(&self) -> *const () {
///         pac::USBCTRL_REGS::PTR
///     }
///     fn dpram(&self) -> *const () {
///         pac::USBCTRL_DPRAM::PTR
///     }
///     fn resets(&self) -> *const () {
///         pac::RESETS::PTR
///     }
/// }
///
/// let instances = Instances {
///     usb: pac::USBCTRL_REGS,
///     dpram: pac::USBCTRL_DPRAM,
///     resets: pac::RESETS,
/// };
/// assert_eq!(instances.dpram(), 0x5010_0000 as *const ());
/// ```
pub unsafe trait Peripherals {
    /// Returns the address of the USB controller registers
    fn usb(&self) -> *const ();
    /// Returns the address of the USB packet memory
    fn dpram(&self) -> *const ();
    /// Returns the address of the subsystem reset registers
    fn resets(&self) -> *const ();
}

/// Driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The endpoint type has no buffer priming rules in this driver.
    ///
    /// Returned for isochronous endpoints.
    Unsupported,
    /// The endpoint index is out of range, or the endpoint isn't configured.
    InvalidEndpoint,
    /// The interface index is out of range.
    InvalidInterface,
    /// The EP0 payload doesn't fit in the control-transfer buffer.
    BufferOverflow,
    /// The endpoint buffer still belongs to the controller.
    WouldBlock,
    /// The controller didn't respond within the allowed time.
    Timeout,
}

impl From<Error> for usb_device::UsbError {
    fn from(err: Error) -> Self {
        use usb_device::UsbError;
        match err {
            Error::Unsupported => UsbError::Unsupported,
            Error::InvalidEndpoint => UsbError::InvalidEndpoint,
            Error::InvalidInterface => UsbError::InvalidState,
            Error::BufferOverflow => UsbError::BufferOverflow,
            Error::WouldBlock => UsbError::WouldBlock,
            Error::Timeout => UsbError::InvalidState,
        }
    }
}

/// The processor hosting the USB controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Chip {
    #[default]
    Rp2040,
    /// Also requires the PHY isolation to be removed.
    Rp2350,
}

impl Chip {
    /// The USBCTRL bit in the `RESETS` registers
    const fn usbctrl_reset(self) -> u32 {
        match self {
            Chip::Rp2040 => 1 << 24,
            Chip::Rp2350 => 1 << 28,
        }
    }
}

/// Controller configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Which processor we're running on.
    pub chip: Chip,
    /// Pretend that VBUS is always present.
    ///
    /// Use this on boards that don't route VBUS to the VBUS detect pin.
    pub force_vbus_detect: bool,
    /// The EP0 max packet size, as described in your device descriptor.
    ///
    /// Control transfers are chunked into packets of this size. The driver
    /// clamps the value between 8 and 64.
    pub ep0_max_packet_size: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chip: Chip::Rp2040,
            force_vbus_detect: true,
            ep0_max_packet_size: BUFFER_LEN as u8,
        }
    }
}
