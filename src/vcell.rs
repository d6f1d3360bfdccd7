//! Volatile cell that conforms to the RAL's register API

use core::cell::UnsafeCell;

#[repr(transparent)]
pub struct VCell<T>(UnsafeCell<T>);

impl<T> VCell<T> {
    pub const fn new(val: T) -> Self {
        VCell(UnsafeCell::new(val))
    }
}

impl<T: Copy> VCell<T> {
    pub fn read(&self) -> T {
        unsafe { self.0.get().read_volatile() }
    }
    pub fn write(&self, val: T) {
        unsafe { self.0.get().write_volatile(val) }
    }
}

impl VCell<u32> {
    /// Read-modify-write that sets `bits`
    ///
    /// Not atomic with respect to the hardware. Only use this on words
    /// that the CPU currently owns.
    pub fn set_bits(&self, bits: u32) {
        self.write(self.read() | bits);
    }

    /// Read-modify-write that clears `bits`
    pub fn clear_bits(&self, bits: u32) {
        self.write(self.read() & !bits);
    }
}

/// A status register that clears the bits written as one
///
/// On hardware, a write is a plain volatile store, and the controller does
/// the clearing. The in-memory model used by host tests does it here.
#[repr(transparent)]
pub struct W1cCell(VCell<u32>);

impl W1cCell {
    pub const fn new(val: u32) -> Self {
        W1cCell(VCell::new(val))
    }

    pub fn read(&self) -> u32 {
        self.0.read()
    }

    pub fn write(&self, val: u32) {
        #[cfg(not(test))]
        self.0.write(val);
        #[cfg(test)]
        self.0.clear_bits(val);
    }

    /// The controller sets `bits`
    #[cfg(test)]
    pub fn raise(&self, bits: u32) {
        self.0.set_bits(bits);
    }
}
