//! CS104 APCI (Application Protocol Control Information).
//!
//! The APCI is the 6-byte header of every APDU: start byte, length and a
//! 4-byte control field that tells I-, S- and U-frames apart.

use crate::error::{Iec60870Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Minimum APDU length (control field only, no ASDU).
pub const MIN_APDU_LENGTH: usize = 4;

/// Maximum APDU length (control field plus ASDU).
pub const MAX_APDU_LENGTH: usize = 253;

/// Sequence numbers are 15 bits wide.
pub const SEQ_MODULO: u16 = 32768;

/// Next sequence number, wrapping at 32768.
#[inline]
pub const fn next_seq(seq: u16) -> u16 {
    (seq + 1) % SEQ_MODULO
}

/// Distance from `from` forward to `to` modulo 32768.
#[inline]
pub const fn seq_distance(from: u16, to: u16) -> u16 {
    (to.wrapping_sub(from)) % SEQ_MODULO
}

/// APCI frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// Numbered information transfer
    IFrame,
    /// Numbered supervisory function (acknowledge only)
    SFrame,
    /// Unnumbered control function
    UFrame,
}

/// U-frame functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UFunction {
    /// STARTDT act
    StartDtAct,
    /// STARTDT con
    StartDtCon,
    /// STOPDT act
    StopDtAct,
    /// STOPDT con
    StopDtCon,
    /// TESTFR act
    TestFrAct,
    /// TESTFR con
    TestFrCon,
}

impl UFunction {
    /// Control field byte for this U-function.
    #[inline]
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07,
            Self::StartDtCon => 0x0B,
            Self::StopDtAct => 0x13,
            Self::StopDtCon => 0x23,
            Self::TestFrAct => 0x43,
            Self::TestFrCon => 0x83,
        }
    }

    /// Parse U-function from control byte.
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x07 => Self::StartDtAct,
            0x0B => Self::StartDtCon,
            0x13 => Self::StopDtAct,
            0x23 => Self::StopDtCon,
            0x43 => Self::TestFrAct,
            0x83 => Self::TestFrCon,
            other => {
                return Err(Iec60870Error::invalid_frame(format!(
                    "unknown U-frame control byte 0x{:02X}",
                    other
                )))
            }
        })
    }

    /// Short name as used in traces.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StartDtAct => "STARTDT act",
            Self::StartDtCon => "STARTDT con",
            Self::StopDtAct => "STOPDT act",
            Self::StopDtCon => "STOPDT con",
            Self::TestFrAct => "TESTFR act",
            Self::TestFrCon => "TESTFR con",
        }
    }
}

/// APCI control field.
///
/// ```text
/// I: | N(S) lsb  0 | N(S) msb | N(R) lsb  0 | N(R) msb |
/// S: | 0000 0001   | 0        | N(R) lsb  0 | N(R) msb |
/// U: | TT SS SS 11 | 0        | 0           | 0        |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame with send and receive sequence numbers.
    IFrame {
        /// N(S), 0-32767
        send_seq: u16,
        /// N(R), 0-32767
        recv_seq: u16,
    },
    /// S-frame with receive sequence number only.
    SFrame {
        /// N(R), 0-32767
        recv_seq: u16,
    },
    /// U-frame with function code.
    UFrame {
        /// U-frame function
        function: UFunction,
    },
}

impl Apci {
    /// Create a new I-frame APCI.
    #[inline]
    pub fn i_frame(send_seq: u16, recv_seq: u16) -> Self {
        Self::IFrame { send_seq, recv_seq }
    }

    /// Create a new S-frame APCI.
    #[inline]
    pub fn s_frame(recv_seq: u16) -> Self {
        Self::SFrame { recv_seq }
    }

    /// Create a new U-frame APCI.
    #[inline]
    pub fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::IFrame { .. } => FrameType::IFrame,
            Self::SFrame { .. } => FrameType::SFrame,
            Self::UFrame { .. } => FrameType::UFrame,
        }
    }

    /// Parse the 4-byte control field.
    pub fn parse(control: &[u8]) -> Result<Self> {
        if control.len() < 4 {
            return Err(Iec60870Error::invalid_frame("control field too short"));
        }

        let seq = |lsb: u8, msb: u8| (u16::from(msb) << 7) | u16::from(lsb >> 1);

        match control[0] & 0x03 {
            0x00 | 0x02 => Ok(Self::IFrame {
                send_seq: seq(control[0], control[1]),
                recv_seq: seq(control[2], control[3]),
            }),
            0x01 => Ok(Self::SFrame {
                recv_seq: seq(control[2], control[3]),
            }),
            _ => Ok(Self::UFrame {
                function: UFunction::from_control_byte(control[0])?,
            }),
        }
    }

    /// Encode to the 4-byte control field.
    pub fn encode(&self) -> [u8; 4] {
        let split = |seq: u16| (((seq & 0x7F) << 1) as u8, ((seq >> 7) & 0xFF) as u8);
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                let (s0, s1) = split(*send_seq);
                let (r0, r1) = split(*recv_seq);
                [s0, s1, r0, r1]
            }
            Self::SFrame { recv_seq } => {
                let (r0, r1) = split(*recv_seq);
                [0x01, 0x00, r0, r1]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Encode start byte, length and control field.
    ///
    /// `asdu_len` is the length of the ASDU that follows (0 for S/U-frames).
    #[inline]
    pub fn encode_header(&self, asdu_len: usize) -> [u8; 6] {
        let c = self.encode();
        [START_BYTE, (4 + asdu_len) as u8, c[0], c[1], c[2], c[3]]
    }

    /// Check if this is an I-frame.
    #[inline]
    pub fn is_i_frame(&self) -> bool {
        matches!(self, Self::IFrame { .. })
    }

    /// Check if this is an S-frame.
    #[inline]
    pub fn is_s_frame(&self) -> bool {
        matches!(self, Self::SFrame { .. })
    }

    /// Check if this is a U-frame.
    #[inline]
    pub fn is_u_frame(&self) -> bool {
        matches!(self, Self::UFrame { .. })
    }

    /// N(S) (I-frame only).
    #[inline]
    pub fn send_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { send_seq, .. } => Some(*send_seq),
            _ => None,
        }
    }

    /// N(R) (I-frame and S-frame).
    #[inline]
    pub fn recv_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { recv_seq, .. } | Self::SFrame { recv_seq } => Some(*recv_seq),
            _ => None,
        }
    }
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { send_seq, recv_seq } => write!(f, "I(S={}, R={})", send_seq, recv_seq),
            Self::SFrame { recv_seq } => write!(f, "S(R={})", recv_seq),
            Self::UFrame { function } => write!(f, "U({})", function.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_U: [UFunction; 6] = [
        UFunction::StartDtAct,
        UFunction::StartDtCon,
        UFunction::StopDtAct,
        UFunction::StopDtCon,
        UFunction::TestFrAct,
        UFunction::TestFrCon,
    ];

    #[test]
    fn test_i_frame_encode_decode() {
        let apci = Apci::i_frame(100, 50);
        let decoded = Apci::parse(&apci.encode()).unwrap();
        assert_eq!(decoded, apci);
        assert_eq!(decoded.send_seq(), Some(100));
        assert_eq!(decoded.recv_seq(), Some(50));
    }

    #[test]
    fn test_sequence_packing() {
        // (byte * 0x100 + (ctrl & 0xFE)) / 2
        let apci = Apci::parse(&[0x02, 0x01, 0xFE, 0xFF]).unwrap();
        assert_eq!(apci, Apci::i_frame(129, 32767));

        for (send, recv) in [(0, 32767), (32767, 0), (127, 128), (12345, 23456)] {
            let apci = Apci::i_frame(send, recv);
            assert_eq!(Apci::parse(&apci.encode()).unwrap(), apci);
        }
    }

    #[test]
    fn test_s_frame_layout() {
        let apci = Apci::s_frame(100);
        assert_eq!(apci.encode(), [0x01, 0x00, 0xC8, 0x00]);
        assert_eq!(Apci::parse(&apci.encode()).unwrap(), apci);
        assert_eq!(apci.send_seq(), None);
    }

    #[test]
    fn test_u_frames() {
        for func in ALL_U {
            let apci = Apci::u_frame(func);
            let encoded = apci.encode();
            assert_eq!(encoded[0] & 0x03, 0x03);
            assert_eq!(Apci::parse(&encoded).unwrap(), apci);
            assert_eq!(apci.recv_seq(), None);
        }
    }

    #[test]
    fn test_u_function_invalid_byte() {
        for byte in [0x03, 0x0F, 0x33, 0xFF] {
            assert!(UFunction::from_control_byte(byte).is_err(), "0x{:02X}", byte);
        }
    }

    #[test]
    fn test_parse_too_short() {
        assert!(Apci::parse(&[0x00, 0x00, 0x00]).is_err());
    }

    #[test]
    fn test_encode_header_length() {
        let header = Apci::u_frame(UFunction::StartDtAct).encode_header(0);
        assert_eq!(header, [0x68, 0x04, 0x07, 0x00, 0x00, 0x00]);
        assert_eq!(Apci::i_frame(0, 0).encode_header(100)[1], 104);
    }

    #[test]
    fn test_display() {
        assert_eq!(Apci::i_frame(10, 5).to_string(), "I(S=10, R=5)");
        assert_eq!(Apci::s_frame(20).to_string(), "S(R=20)");
        assert_eq!(
            Apci::u_frame(UFunction::TestFrCon).to_string(),
            "U(TESTFR con)"
        );
    }

    #[test]
    fn test_seq_helpers() {
        assert_eq!(next_seq(32767), 0);
        assert_eq!(next_seq(5), 6);
        assert_eq!(seq_distance(5, 10), 5);
        assert_eq!(seq_distance(32766, 2), 4);
        assert_eq!(seq_distance(10, 4), 32762);
    }

    #[test]
    fn test_frame_type() {
        assert_eq!(Apci::i_frame(0, 0).frame_type(), FrameType::IFrame);
        assert_eq!(Apci::s_frame(0).frame_type(), FrameType::SFrame);
        assert!(Apci::u_frame(UFunction::StartDtAct).is_u_frame());
    }
}
