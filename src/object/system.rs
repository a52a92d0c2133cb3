//! System information and parameter elements (types 100..=113).

use bytes::{BufMut, BytesMut};

use super::Element;
use crate::error::Result;
use crate::types::{
    f32_from_bytes, Cp16Time2a, Cp56Time2a, NormalizedValue, ParameterQualifier, ScaledValue,
    TypeId,
};

/// Fixed bit pattern of C_TS_NA_1 (0xAA, 0x55 on the wire).
pub const TEST_PATTERN: u16 = 0x55AA;

impl Element {
    /// C_TS_NA_1 with the standard test pattern.
    pub fn test_command() -> Self {
        Self::TestCommand {
            pattern: TEST_PATTERN,
        }
    }
}

pub(super) fn decode(type_id: TypeId, b: &[u8]) -> Result<Element> {
    Ok(match type_id.as_u8() {
        100 => Element::Interrogation { qoi: b[0] },
        101 => Element::CounterInterrogation { qcc: b[0] },
        102 => Element::Read,
        103 => Element::ClockSync {
            time: Cp56Time2a::from_bytes(b)?,
        },
        104 => Element::TestCommand {
            pattern: u16::from_le_bytes([b[0], b[1]]),
        },
        105 => Element::ResetProcess { qrp: b[0] },
        106 => Element::DelayAcquisition {
            delay: Cp16Time2a::from_bytes(b)?,
        },
        107 => Element::TestCommandWithTime {
            counter: u16::from_le_bytes([b[0], b[1]]),
            time: Cp56Time2a::from_bytes(&b[2..])?,
        },
        110 => Element::ParameterNormalized {
            value: NormalizedValue::from_bytes(b),
            qualifier: ParameterQualifier::from_u8(b[2]),
        },
        111 => Element::ParameterScaled {
            value: ScaledValue::from_bytes(b),
            qualifier: ParameterQualifier::from_u8(b[2]),
        },
        112 => Element::ParameterFloat {
            value: f32_from_bytes(b),
            qualifier: ParameterQualifier::from_u8(b[4]),
        },
        _ => Element::ParameterActivation { qpa: b[0] },
    })
}

pub(super) fn encode(element: &Element, buf: &mut BytesMut) -> bool {
    match element {
        Element::Interrogation { qoi } => buf.put_u8(*qoi),
        Element::CounterInterrogation { qcc } => buf.put_u8(*qcc),
        Element::Read => {}
        Element::ClockSync { time } => buf.put_slice(&time.to_bytes()),
        Element::TestCommand { pattern } => buf.put_u16_le(*pattern),
        Element::ResetProcess { qrp } => buf.put_u8(*qrp),
        Element::DelayAcquisition { delay } => buf.put_slice(&delay.to_bytes()),
        Element::TestCommandWithTime { counter, time } => {
            buf.put_u16_le(*counter);
            buf.put_slice(&time.to_bytes());
        }
        Element::ParameterNormalized { value, qualifier } => {
            buf.put_slice(&value.to_bytes());
            buf.put_u8(qualifier.as_u8());
        }
        Element::ParameterScaled { value, qualifier } => {
            buf.put_slice(&value.to_bytes());
            buf.put_u8(qualifier.as_u8());
        }
        Element::ParameterFloat { value, qualifier } => {
            buf.put_f32_le(*value);
            buf.put_u8(qualifier.as_u8());
        }
        Element::ParameterActivation { qpa } => buf.put_u8(*qpa),
        _ => return false,
    }
    true
}
