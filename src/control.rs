//! Control transfer state
//!
//! Setup packet decoding, and the continuation state for EP0 IN transfers that
//! span more than one packet.

use crate::Error;
use usb_device::{
    control::{Recipient, RequestType},
    UsbDirection,
};

/// Capacity of the EP0 continuation buffer
///
/// An EP0 IN data stage larger than one packet must fit in this many bytes,
/// unless it's `'static`.
pub const CONTROL_BUFFER_LEN: usize = 512;

/// An 8-byte setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setup {
    /// `bmRequestType`
    pub request_type: u8,
    /// `bRequest`
    pub request: u8,
    /// `wValue`
    pub value: u16,
    /// `wIndex`
    pub index: u16,
    /// `wLength`
    pub length: u16,
}

impl Setup {
    /// Decode a setup packet from its wire format
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Setup {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Encode the setup packet in its wire format
    pub const fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    /// Direction of the data stage
    pub fn direction(&self) -> UsbDirection {
        if self.request_type & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        }
    }

    pub fn request_type(&self) -> RequestType {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        }
    }

    pub fn recipient(&self) -> Recipient {
        match self.request_type & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        }
    }
}

/// Where the rest of the transfer comes from
#[derive(Clone, Copy)]
enum Source {
    /// The driver's copy
    Buffer,
    Static(&'static [u8]),
}

/// Continuation state for a multi-packet EP0 IN transfer
///
/// There's at most one transfer in flight. Starting a new transfer
/// discards whatever remained of the previous one.
pub struct PendingControl {
    buffer: [u8; CONTROL_BUFFER_LEN],
    source: Source,
    len: usize,
    /// Bytes already handed to the controller
    offset: usize,
    /// Terminate with a zero-length packet
    zlp: bool,
    active: bool,
}

impl PendingControl {
    pub const fn new() -> Self {
        PendingControl {
            buffer: [0; CONTROL_BUFFER_LEN],
            source: Source::Buffer,
            len: 0,
            offset: 0,
            zlp: false,
            active: false,
        }
    }

    /// Remember `data` for continuation, noting that `sent` bytes
    /// already went out in the first packet
    ///
    /// Fails without changing the state if `data` doesn't fit.
    pub fn start(&mut self, data: &[u8], sent: usize, zlp: bool) -> Result<(), Error> {
        let buffer = self
            .buffer
            .get_mut(..data.len())
            .ok_or(Error::BufferOverflow)?;
        buffer.copy_from_slice(data);
        self.source = Source::Buffer;
        self.resume(data.len(), sent, zlp);
        Ok(())
    }

    /// Like [`start`](Self::start), but keeps a reference to `data`
    /// instead of a copy, so there's no size limit
    pub fn start_static(&mut self, data: &'static [u8], sent: usize, zlp: bool) {
        self.source = Source::Static(data);
        self.resume(data.len(), sent, zlp);
    }

    fn resume(&mut self, len: usize, sent: usize, zlp: bool) {
        self.len = len;
        self.offset = sent.min(len);
        self.zlp = zlp;
        self.active = true;
    }

    /// Indicates if there's more of the transfer to send
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Take the next chunk of at most `packet_size` bytes
    ///
    /// The final chunk may be empty when the transfer ends with a
    /// zero-length packet. Returns `None` once everything is sent.
    pub fn next_chunk(&mut self, packet_size: usize) -> Option<&[u8]> {
        if !self.active {
            return None;
        }
        let start = self.offset;
        let count = (self.len - start).min(packet_size);
        self.offset += count;

        if self.offset == self.len && (count < packet_size || !self.zlp || count == 0) {
            // Short packet (or the ZLP itself) ends the transfer. A full final
            // packet that needs a ZLP keeps the transfer alive one more round.
            self.clear();
        }

        let data = match self.source {
            Source::Buffer => &self.buffer[..],
            Source::Static(data) => data,
        };
        Some(&data[start..start + count])
    }

    /// Forget the transfer
    pub fn clear(&mut self) {
        self.source = Source::Buffer;
        self.len = 0;
        self.offset = 0;
        self.zlp = false;
        self.active = false;
    }
}
