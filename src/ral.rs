//! Register access for the USB controller and its neighbors
//!
//! The register blocks are modelled as plain `#[repr(C)]` structures of
//! volatile cells, with RAL-style field modules. That's enough for the
//! `ral-registers` macros to work on them, just like they would on a
//! generated RAL.

#![allow(non_snake_case, non_upper_case_globals, clippy::upper_case_acronyms)]

use core::ops::Deref;

pub use ral_registers::{modify_reg, read_reg, write_reg};

/// Declares a register field module understood by the RAL macros
macro_rules! field {
    ($name:ident, $offset:expr, $width:expr) => {
        pub mod $name {
            pub const offset: u32 = $offset;
            pub const mask: u32 = ((1 << $width) - 1) << offset;
            pub mod R {}
            pub mod W {}
            pub mod RW {}
        }
    };
}

/// A handle to a register block at a fixed address
pub struct Instance<RB> {
    ptr: *const RB,
}

impl<RB> Instance<RB> {
    /// # Safety
    ///
    /// `ptr` must point to a valid register block (or an equivalent in-memory
    /// structure) that outlives the instance, and the caller must not create
    /// another instance for the same block.
    pub const unsafe fn new(ptr: *const ()) -> Self {
        Instance { ptr: ptr.cast() }
    }
}

impl<RB> Deref for Instance<RB> {
    type Target = RB;
    fn deref(&self) -> &RB {
        // Safety: validity upheld by the caller of new().
        unsafe { &*self.ptr }
    }
}

// Safety: an instance is an owned handle to a unique register block.
unsafe impl<RB> Send for Instance<RB> {}

/// USB controller registers (`USBCTRL_REGS`)
pub mod usb {
    use crate::vcell::{VCell, W1cCell};

    #[repr(C)]
    pub struct RegisterBlock {
        pub ADDR_ENDP: VCell<u32>,
        /// ADDR_ENDP1..ADDR_ENDP15, host mode only
        _reserved0: [u32; 15],
        pub MAIN_CTRL: VCell<u32>,
        _reserved1: [u32; 2],
        pub SIE_CTRL: VCell<u32>,
        pub SIE_STATUS: W1cCell,
        _reserved2: [u32; 1],
        pub BUFF_STATUS: W1cCell,
        _reserved3: [u32; 3],
        pub EP_STALL_ARM: VCell<u32>,
        _reserved4: [u32; 2],
        pub USB_MUXING: VCell<u32>,
        pub USB_PWR: VCell<u32>,
        _reserved5: [u32; 4],
        pub INTR: VCell<u32>,
        pub INTE: VCell<u32>,
        pub INTF: VCell<u32>,
        pub INTS: VCell<u32>,
    }

    impl RegisterBlock {
        /// A register block with every register zeroed
        pub const fn new() -> Self {
            RegisterBlock {
                ADDR_ENDP: VCell::new(0),
                _reserved0: [0; 15],
                MAIN_CTRL: VCell::new(0),
                _reserved1: [0; 2],
                SIE_CTRL: VCell::new(0),
                SIE_STATUS: W1cCell::new(0),
                _reserved2: [0; 1],
                BUFF_STATUS: W1cCell::new(0),
                _reserved3: [0; 3],
                EP_STALL_ARM: VCell::new(0),
                _reserved4: [0; 2],
                USB_MUXING: VCell::new(0),
                USB_PWR: VCell::new(0),
                _reserved5: [0; 4],
                INTR: VCell::new(0),
                INTE: VCell::new(0),
                INTF: VCell::new(0),
                INTS: VCell::new(0),
            }
        }
    }

    pub type Instance = super::Instance<RegisterBlock>;

    pub mod ADDR_ENDP {
        field!(ADDRESS, 0, 7);
        field!(ENDPOINT, 16, 4);
    }

    pub mod MAIN_CTRL {
        field!(CONTROLLER_EN, 0, 1);
        field!(HOST_NDEVICE, 1, 1);
        /// RP2350 only. Reserved on the RP2040.
        field!(PHY_ISO, 2, 1);
    }

    pub mod SIE_CTRL {
        field!(PULLUP_EN, 16, 1);
        field!(EP0_INT_1BUF, 29, 1);
    }

    pub mod EP_STALL_ARM {
        field!(EP0_IN, 0, 1);
        field!(EP0_OUT, 1, 1);
    }

    pub mod USB_MUXING {
        field!(TO_PHY, 0, 1);
        field!(SOFTCON, 3, 1);
    }

    pub mod USB_PWR {
        field!(VBUS_DETECT, 2, 1);
        field!(VBUS_DETECT_OVERRIDE_EN, 3, 1);
    }

    bitflags::bitflags! {
        /// Interrupt sources shared by `INTR`, `INTE`, `INTF`, and `INTS`
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct Interrupts : u32 {
            const TRANS_COMPLETE = 1 << 3;
            const BUFF_STATUS = 1 << 4;
            const ERROR_DATA_SEQ = 1 << 5;
            const STALL = 1 << 10;
            const BUS_RESET = 1 << 12;
            const DEV_CONN_DIS = 1 << 13;
            const DEV_SUSPEND = 1 << 14;
            const DEV_RESUME_FROM_HOST = 1 << 15;
            const SETUP_REQ = 1 << 16;
            const DEV_SOF = 1 << 17;
        }
    }

    bitflags::bitflags! {
        /// `SIE_STATUS` flags
        ///
        /// Most are write-one-to-clear.
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct SieStatus : u32 {
            const VBUS_DETECTED = 1 << 0;
            const SUSPENDED = 1 << 4;
            const CONNECTED = 1 << 16;
            const SETUP_REC = 1 << 17;
            const TRANS_COMPLETE = 1 << 18;
            const BUS_RESET = 1 << 19;
            const CRC_ERROR = 1 << 24;
            const BIT_STUFF_ERROR = 1 << 25;
            const RX_OVERFLOW = 1 << 26;
            const RX_TIMEOUT = 1 << 27;
            const NAK_REC = 1 << 28;
            const STALL_REC = 1 << 29;
            const ACK_REC = 1 << 30;
            const DATA_SEQ_ERROR = 1 << 31;
        }
    }
}

/// Subsystem resets (`RESETS`)
pub mod resets {
    use crate::vcell::VCell;

    #[repr(C)]
    pub struct RegisterBlock {
        pub RESET: VCell<u32>,
        pub WDSEL: VCell<u32>,
        pub RESET_DONE: VCell<u32>,
    }

    impl RegisterBlock {
        pub const fn new() -> Self {
            RegisterBlock {
                RESET: VCell::new(0),
                WDSEL: VCell::new(0),
                RESET_DONE: VCell::new(0),
            }
        }
    }

    pub type Instance = super::Instance<RegisterBlock>;
}

/// The microsecond timer (`TIMER` / `TIMER0`)
pub mod timer {
    use crate::vcell::VCell;

    #[repr(C)]
    pub struct RegisterBlock {
        _reserved0: [u32; 10],
        /// Raw read from the low 32 bits of the time, no side effects
        pub TIMERAWL: VCell<u32>,
    }

    impl RegisterBlock {
        pub const fn new() -> Self {
            RegisterBlock {
                _reserved0: [0; 10],
                TIMERAWL: VCell::new(0),
            }
        }
    }

    pub type Instance = super::Instance<RegisterBlock>;
}

/// The register blocks used by the driver
pub struct Instances {
    pub usb: usb::Instance,
    pub dpram: crate::dpram::Instance,
    pub resets: resets::Instance,
}

/// Converts the user's peripherals into register block instances
pub fn instances<P: crate::Peripherals>(peripherals: P) -> Instances {
    // Safety: validity and uniqueness are upheld by the Peripherals implementer.
    unsafe {
        Instances {
            usb: usb::Instance::new(peripherals.usb()),
            dpram: crate::dpram::Instance::new(peripherals.dpram()),
            resets: resets::Instance::new(peripherals.resets()),
        }
    }
}

const _: () = assert!(core::mem::size_of::<usb::RegisterBlock>() == 0x9C);
const _: () = assert!(core::mem::size_of::<timer::RegisterBlock>() == 0x2C);
