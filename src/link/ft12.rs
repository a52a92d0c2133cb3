//! FT1.2 frame codec for tokio.
//!
//! ```text
//! single character   E5
//! fixed length       10 C A.. CS 16
//! variable length    68 L L 68 C A.. user-data CS 16
//! ```
//!
//! `CS` is the sum modulo 256 of the control, address and user data
//! octets; `L` counts the same octets. Line noise and frames with a bad
//! checksum are skipped, never fatal: a serial line resynchronizes on the
//! next start character.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::Control;
use crate::error::Iec60870Error;

const SINGLE_CHAR_ACK: u8 = 0xE5;
const FIXED_START: u8 = 0x10;
const VARIABLE_START: u8 = 0x68;
const END: u8 = 0x16;

/// A decoded FT1.2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ft12Frame {
    /// `0xE5`, a positive acknowledgement without address
    SingleCharAck,
    Fixed {
        control: Control,
        address: u16,
    },
    Variable {
        control: Control,
        address: u16,
        user_data: Bytes,
    },
}

impl Ft12Frame {
    /// Control field, absent for the single character.
    pub fn control(&self) -> Option<Control> {
        match self {
            Self::SingleCharAck => None,
            Self::Fixed { control, .. } | Self::Variable { control, .. } => Some(*control),
        }
    }

    pub fn address(&self) -> Option<u16> {
        match self {
            Self::SingleCharAck => None,
            Self::Fixed { address, .. } | Self::Variable { address, .. } => Some(*address),
        }
    }
}

fn sum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// FT1.2 codec with a fixed link address length.
#[derive(Debug, Clone)]
pub struct Ft12Codec {
    address_length: usize,
}

impl Ft12Codec {
    pub fn new(address_length: usize) -> Self {
        Self { address_length }
    }

    pub fn address_length(&self) -> usize {
        self.address_length
    }

    fn read_address(&self, data: &[u8]) -> u16 {
        match self.address_length {
            0 => 0,
            1 => u16::from(data[0]),
            _ => u16::from_le_bytes([data[0], data[1]]),
        }
    }

    fn put_address(&self, address: u16, dst: &mut BytesMut) {
        match self.address_length {
            0 => {}
            1 => dst.put_u8(address as u8),
            _ => dst.put_u16_le(address),
        }
    }

    /// Try to take one fixed length frame; `None` means more data is needed.
    fn decode_fixed(&self, src: &mut BytesMut) -> Option<Option<Ft12Frame>> {
        let len = 4 + self.address_length;
        if src.len() < len {
            return None;
        }
        let body = &src[1..len - 2];
        if src[len - 1] != END || sum(body) != src[len - 2] {
            tracing::debug!(frame = ?&src[..len], "invalid fixed frame dropped");
            src.advance(1);
            return Some(None);
        }
        let frame = Ft12Frame::Fixed {
            control: Control(body[0]),
            address: self.read_address(&body[1..]),
        };
        src.advance(len);
        Some(Some(frame))
    }

    fn decode_variable(&self, src: &mut BytesMut) -> Option<Option<Ft12Frame>> {
        if src.len() < 4 {
            return None;
        }
        let l = usize::from(src[1]);
        if src[2] != src[1] || src[3] != VARIABLE_START || l < 1 + self.address_length {
            tracing::debug!(header = ?&src[..4], "invalid variable frame header");
            src.advance(1);
            return Some(None);
        }
        let len = 4 + l + 2;
        if src.len() < len {
            src.reserve(len - src.len());
            return None;
        }
        let body = &src[4..4 + l];
        if src[len - 1] != END || sum(body) != src[len - 2] {
            tracing::debug!(length = l, "variable frame with bad checksum dropped");
            src.advance(1);
            return Some(None);
        }
        let control = Control(body[0]);
        let address = self.read_address(&body[1..]);
        let mut frame = src.split_to(len);
        frame.advance(5 + self.address_length);
        frame.truncate(l - 1 - self.address_length);
        Some(Some(Ft12Frame::Variable {
            control,
            address,
            user_data: frame.freeze(),
        }))
    }
}

impl Decoder for Ft12Codec {
    type Item = Ft12Frame;
    type Error = Iec60870Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = src
                .iter()
                .position(|b| matches!(*b, SINGLE_CHAR_ACK | FIXED_START | VARIABLE_START))
            else {
                if !src.is_empty() {
                    tracing::trace!(count = src.len(), "skipping bytes outside of a frame");
                }
                src.clear();
                return Ok(None);
            };
            if pos > 0 {
                tracing::trace!(count = pos, "skipping bytes outside of a frame");
                src.advance(pos);
            }

            let step = match src[0] {
                SINGLE_CHAR_ACK => {
                    src.advance(1);
                    Some(Some(Ft12Frame::SingleCharAck))
                }
                FIXED_START => self.decode_fixed(src),
                _ => self.decode_variable(src),
            };
            match step {
                None => return Ok(None),
                Some(Some(frame)) => {
                    tracing::trace!(frame = ?frame, "received FT1.2 frame");
                    return Ok(Some(frame));
                }
                Some(None) => continue,
            }
        }
    }
}

impl Encoder<Ft12Frame> for Ft12Codec {
    type Error = Iec60870Error;

    fn encode(&mut self, item: Ft12Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        tracing::trace!(frame = ?item, "sending FT1.2 frame");
        match item {
            Ft12Frame::SingleCharAck => dst.put_u8(SINGLE_CHAR_ACK),
            Ft12Frame::Fixed { control, address } => {
                dst.reserve(4 + self.address_length);
                dst.put_u8(FIXED_START);
                let start = dst.len();
                dst.put_u8(control.0);
                self.put_address(address, dst);
                let cs = sum(&dst[start..]);
                dst.put_u8(cs);
                dst.put_u8(END);
            }
            Ft12Frame::Variable {
                control,
                address,
                user_data,
            } => {
                let l = 1 + self.address_length + user_data.len();
                if l > 255 {
                    return Err(Iec60870Error::Codec(format!(
                        "user data of {} bytes does not fit a variable frame",
                        user_data.len()
                    )));
                }
                dst.reserve(l + 6);
                dst.put_u8(VARIABLE_START);
                dst.put_u8(l as u8);
                dst.put_u8(l as u8);
                dst.put_u8(VARIABLE_START);
                let start = dst.len();
                dst.put_u8(control.0);
                self.put_address(address, dst);
                dst.put_slice(&user_data);
                let cs = sum(&dst[start..]);
                dst.put_u8(cs);
                dst.put_u8(END);
            }
        }
        Ok(())
    }
}
