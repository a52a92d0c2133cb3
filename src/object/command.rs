//! Control direction elements (process commands, types 45..=64).

use bytes::{BufMut, BytesMut};

use super::Element;
use crate::error::Result;
use crate::types::{
    f32_from_bytes, CommandQualifier, Cp56Time2a, DoublePointValue, NormalizedValue, ScaledValue,
    SetpointQualifier, StepCommandValue, TypeId,
};

fn read_time(type_id: TypeId, bytes: &[u8]) -> Result<Option<Cp56Time2a>> {
    if type_id.as_u8() >= 58 {
        Cp56Time2a::from_bytes(bytes).map(Some)
    } else {
        Ok(None)
    }
}

pub(super) fn decode(type_id: TypeId, b: &[u8]) -> Result<Element> {
    Ok(match type_id.as_u8() {
        45 | 58 => Element::SingleCommand {
            state: b[0] & 0x01 != 0,
            qualifier: CommandQualifier::from_u8(b[0]),
            time: read_time(type_id, &b[1..])?,
        },
        46 | 59 => Element::DoubleCommand {
            state: DoublePointValue::from_u8(b[0]),
            qualifier: CommandQualifier::from_u8(b[0]),
            time: read_time(type_id, &b[1..])?,
        },
        47 | 60 => Element::StepCommand {
            state: StepCommandValue::from_u8(b[0]),
            qualifier: CommandQualifier::from_u8(b[0]),
            time: read_time(type_id, &b[1..])?,
        },
        48 | 61 => Element::SetpointNormalized {
            value: NormalizedValue::from_bytes(b),
            qualifier: SetpointQualifier::from_u8(b[2]),
            time: read_time(type_id, &b[3..])?,
        },
        49 | 62 => Element::SetpointScaled {
            value: ScaledValue::from_bytes(b),
            qualifier: SetpointQualifier::from_u8(b[2]),
            time: read_time(type_id, &b[3..])?,
        },
        50 | 63 => Element::SetpointFloat {
            value: f32_from_bytes(b),
            qualifier: SetpointQualifier::from_u8(b[4]),
            time: read_time(type_id, &b[5..])?,
        },
        _ => Element::Bitstring32Command {
            value: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            time: read_time(type_id, &b[4..])?,
        },
    })
}

fn put_time(buf: &mut BytesMut, time: &Option<Cp56Time2a>) {
    if let Some(t) = time {
        buf.put_slice(&t.to_bytes());
    }
}

pub(super) fn encode(element: &Element, buf: &mut BytesMut) -> bool {
    match element {
        Element::SingleCommand {
            state,
            qualifier,
            time,
        } => {
            buf.put_u8(qualifier.as_u8() | u8::from(*state));
            put_time(buf, time);
        }
        Element::DoubleCommand {
            state,
            qualifier,
            time,
        } => {
            buf.put_u8(qualifier.as_u8() | state.as_u8());
            put_time(buf, time);
        }
        Element::StepCommand {
            state,
            qualifier,
            time,
        } => {
            buf.put_u8(qualifier.as_u8() | (*state as u8));
            put_time(buf, time);
        }
        Element::SetpointNormalized {
            value,
            qualifier,
            time,
        } => {
            buf.put_slice(&value.to_bytes());
            buf.put_u8(qualifier.as_u8());
            put_time(buf, time);
        }
        Element::SetpointScaled {
            value,
            qualifier,
            time,
        } => {
            buf.put_slice(&value.to_bytes());
            buf.put_u8(qualifier.as_u8());
            put_time(buf, time);
        }
        Element::SetpointFloat {
            value,
            qualifier,
            time,
        } => {
            buf.put_f32_le(*value);
            buf.put_u8(qualifier.as_u8());
            put_time(buf, time);
        }
        Element::Bitstring32Command { value, time } => {
            buf.put_u32_le(*value);
            put_time(buf, time);
        }
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(element: Element) {
        let mut buf = BytesMut::new();
        assert!(encode(&element, &mut buf));
        assert_eq!(buf.len(), element.encoded_size());
        assert_eq!(decode(element.type_id(), &buf).unwrap(), element);
    }

    #[test]
    fn test_single_command_select() {
        let el = Element::SingleCommand {
            state: true,
            qualifier: CommandQualifier { qu: 1, select: true },
            time: None,
        };
        let mut buf = BytesMut::new();
        encode(&el, &mut buf);
        assert_eq!(&buf[..], &[0x85]);
        assert_eq!(decode(TypeId::C_SC_NA_1, &buf).unwrap(), el);
    }

    #[test]
    fn test_command_roundtrip() {
        let time = Some(Cp56Time2a {
            milliseconds: 1,
            minutes: 2,
            hours: 3,
            day: 4,
            day_of_week: 5,
            month: 6,
            year: 7,
            ..Default::default()
        });
        for time in [None, time] {
            roundtrip(Element::DoubleCommand {
                state: DoublePointValue::Off,
                qualifier: CommandQualifier::EXECUTE,
                time,
            });
            roundtrip(Element::StepCommand {
                state: StepCommandValue::Higher,
                qualifier: CommandQualifier { qu: 31, select: false },
                time,
            });
            roundtrip(Element::SetpointNormalized {
                value: NormalizedValue::from_f32(-0.25),
                qualifier: SetpointQualifier { ql: 3, select: true },
                time,
            });
            roundtrip(Element::SetpointScaled {
                value: ScaledValue(-32768),
                qualifier: SetpointQualifier::default(),
                time,
            });
            roundtrip(Element::SetpointFloat {
                value: 230.5,
                qualifier: SetpointQualifier::default(),
                time,
            });
            roundtrip(Element::Bitstring32Command {
                value: u32::MAX,
                time,
            });
        }
    }

    #[test]
    fn test_timed_type_ids() {
        let el = Element::SetpointFloat {
            value: 0.0,
            qualifier: SetpointQualifier::default(),
            time: Some(Cp56Time2a::default()),
        };
        assert_eq!(el.type_id(), TypeId::C_SE_TC_1);
        assert_eq!(el.encoded_size(), 12);
    }
}
