//! Monitoring direction elements (process information, types 1..=40 and 70).

use bytes::{BufMut, BytesMut};

use super::{Element, TimeKind, Timestamp};
use crate::error::Result;
use crate::types::{
    f32_from_bytes, siq, BinaryCounterReading, CauseOfInitialization, Cp16Time2a, Cp24Time2a,
    Cp56Time2a, DoublePointValue, NormalizedValue, OutputCircuitInfo, QualityDescriptor,
    QualityDescriptorP, ScaledValue, StartEvent, StatusAndChangeDetection, StepPositionValue,
    TypeId,
};

fn protection_time(type_id: TypeId, bytes: &[u8]) -> Result<Timestamp> {
    Ok(match TimeKind::of(type_id) {
        TimeKind::Full => Timestamp::Full(Cp56Time2a::from_bytes(bytes)?),
        _ => Timestamp::Short(Cp24Time2a::from_bytes(bytes)?),
    })
}

/// Quality bits of a SIQ/DIQ byte.
#[inline]
fn point_quality(byte: u8) -> QualityDescriptor {
    QualityDescriptor::from_raw(byte & 0xF0)
}

pub(super) fn decode(type_id: TypeId, b: &[u8]) -> Result<Element> {
    let time = TimeKind::of(type_id);
    Ok(match type_id.as_u8() {
        1 | 2 | 30 => Element::SinglePoint {
            value: b[0] & 0x01 != 0,
            quality: point_quality(b[0]),
            time: time.read(&b[1..])?,
        },
        3 | 4 | 31 => Element::DoublePoint {
            value: DoublePointValue::from_u8(b[0]),
            quality: point_quality(b[0]),
            time: time.read(&b[1..])?,
        },
        5 | 6 | 32 => Element::StepPosition {
            value: StepPositionValue::from_u8(b[0]),
            quality: QualityDescriptor::from_raw(b[1]),
            time: time.read(&b[2..])?,
        },
        7 | 8 | 33 => Element::Bitstring32 {
            value: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            quality: QualityDescriptor::from_raw(b[4]),
            time: time.read(&b[5..])?,
        },
        9 | 10 | 34 => Element::MeasuredNormalized {
            value: NormalizedValue::from_bytes(b),
            quality: QualityDescriptor::from_raw(b[2]),
            time: time.read(&b[3..])?,
        },
        11 | 12 | 35 => Element::MeasuredScaled {
            value: ScaledValue::from_bytes(b),
            quality: QualityDescriptor::from_raw(b[2]),
            time: time.read(&b[3..])?,
        },
        13 | 14 | 36 => Element::MeasuredFloat {
            value: f32_from_bytes(b),
            quality: QualityDescriptor::from_raw(b[4]),
            time: time.read(&b[5..])?,
        },
        15 | 16 | 37 => Element::IntegratedTotals {
            value: BinaryCounterReading::from_bytes(b),
            time: time.read(&b[BinaryCounterReading::SIZE..])?,
        },
        17 | 38 => Element::ProtectionEvent {
            state: DoublePointValue::from_u8(b[0]),
            quality: QualityDescriptorP::from_raw(b[0]),
            elapsed: Cp16Time2a::from_bytes(&b[1..])?,
            time: protection_time(type_id, &b[3..])?,
        },
        18 | 39 => Element::PackedStartEvents {
            events: StartEvent::from_raw(b[0]),
            quality: QualityDescriptorP::from_raw(b[1]),
            duration: Cp16Time2a::from_bytes(&b[2..])?,
            time: protection_time(type_id, &b[4..])?,
        },
        19 | 40 => Element::PackedOutputCircuit {
            circuits: OutputCircuitInfo::from_raw(b[0]),
            quality: QualityDescriptorP::from_raw(b[1]),
            operating_time: Cp16Time2a::from_bytes(&b[2..])?,
            time: protection_time(type_id, &b[4..])?,
        },
        20 => Element::PackedSinglePoint {
            scd: StatusAndChangeDetection::from_bytes(b),
            quality: QualityDescriptor::from_raw(b[4]),
        },
        21 => Element::MeasuredNormalizedNoQuality {
            value: NormalizedValue::from_bytes(b),
        },
        _ => Element::EndOfInitialization {
            coi: CauseOfInitialization::from_u8(b[0]),
        },
    })
}

fn put_time(buf: &mut BytesMut, time: &Option<Timestamp>) {
    if let Some(t) = time {
        t.encode(buf);
    }
}

pub(super) fn encode(element: &Element, buf: &mut BytesMut) -> bool {
    match element {
        Element::SinglePoint {
            value,
            quality,
            time,
        } => {
            buf.put_u8(siq(*value, *quality));
            put_time(buf, time);
        }
        Element::DoublePoint {
            value,
            quality,
            time,
        } => {
            buf.put_u8((quality.as_raw() & 0xF0) | value.as_u8());
            put_time(buf, time);
        }
        Element::StepPosition {
            value,
            quality,
            time,
        } => {
            buf.put_u8(value.as_u8());
            buf.put_u8(quality.as_raw());
            put_time(buf, time);
        }
        Element::Bitstring32 {
            value,
            quality,
            time,
        } => {
            buf.put_u32_le(*value);
            buf.put_u8(quality.as_raw());
            put_time(buf, time);
        }
        Element::MeasuredNormalized {
            value,
            quality,
            time,
        } => {
            buf.put_slice(&value.to_bytes());
            buf.put_u8(quality.as_raw());
            put_time(buf, time);
        }
        Element::MeasuredScaled {
            value,
            quality,
            time,
        } => {
            buf.put_slice(&value.to_bytes());
            buf.put_u8(quality.as_raw());
            put_time(buf, time);
        }
        Element::MeasuredFloat {
            value,
            quality,
            time,
        } => {
            buf.put_f32_le(*value);
            buf.put_u8(quality.as_raw());
            put_time(buf, time);
        }
        Element::IntegratedTotals { value, time } => {
            buf.put_slice(&value.to_bytes());
            put_time(buf, time);
        }
        Element::ProtectionEvent {
            state,
            quality,
            elapsed,
            time,
        } => {
            buf.put_u8(quality.as_raw() | state.as_u8());
            buf.put_slice(&elapsed.to_bytes());
            time.encode(buf);
        }
        Element::PackedStartEvents {
            events,
            quality,
            duration,
            time,
        } => {
            buf.put_u8(events.as_raw());
            buf.put_u8(quality.as_raw());
            buf.put_slice(&duration.to_bytes());
            time.encode(buf);
        }
        Element::PackedOutputCircuit {
            circuits,
            quality,
            operating_time,
            time,
        } => {
            buf.put_u8(circuits.as_raw());
            buf.put_u8(quality.as_raw());
            buf.put_slice(&operating_time.to_bytes());
            time.encode(buf);
        }
        Element::PackedSinglePoint { scd, quality } => {
            buf.put_slice(&scd.to_bytes());
            buf.put_u8(quality.as_raw());
        }
        Element::MeasuredNormalizedNoQuality { value } => buf.put_slice(&value.to_bytes()),
        Element::EndOfInitialization { coi } => buf.put_u8(coi.as_u8()),
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_point_wire_byte() {
        let el = decode(TypeId::M_SP_NA_1, &[0x81]).unwrap();
        assert_eq!(
            el,
            Element::SinglePoint {
                value: true,
                quality: QualityDescriptor::INVALID,
                time: None,
            }
        );
    }

    #[test]
    fn test_float_little_endian() {
        let mut buf = BytesMut::new();
        encode(&Element::measured_float(1.0, QualityDescriptor::GOOD), &mut buf);
        assert_eq!(&buf[..], &[0x00, 0x00, 0x80, 0x3F, 0x00]);
    }

    #[test]
    fn test_scaled_boundaries_wire() {
        let el = decode(TypeId::M_ME_NB_1, &[0x00, 0x80, 0x00]).unwrap();
        assert!(matches!(
            el,
            Element::MeasuredScaled {
                value: ScaledValue(i16::MIN),
                ..
            }
        ));
        let el = decode(TypeId::M_ME_NB_1, &[0xFF, 0x7F, 0x00]).unwrap();
        assert!(matches!(
            el,
            Element::MeasuredScaled {
                value: ScaledValue(i16::MAX),
                ..
            }
        ));
    }

    #[test]
    fn test_protection_event_layout() {
        // SEP = ON | EI, elapsed 1000 ms, CP24 time
        let bytes = [0x0A, 0xE8, 0x03, 0x00, 0x00, 0x05];
        let el = decode(TypeId::M_EP_TA_1, &bytes).unwrap();
        match &el {
            Element::ProtectionEvent {
                state,
                quality,
                elapsed,
                time,
            } => {
                assert_eq!(*state, DoublePointValue::On);
                assert!(quality.elapsed_time_invalid());
                assert_eq!(elapsed.milliseconds(), 1000);
                assert!(matches!(time, Timestamp::Short(t) if t.minutes == 5));
            }
            other => panic!("unexpected {:?}", other),
        }
        let mut buf = BytesMut::new();
        encode(&el, &mut buf);
        assert_eq!(&buf[..], &bytes);
    }

    #[test]
    fn test_encode_rejects_other_groups() {
        let mut buf = BytesMut::new();
        assert!(!encode(&Element::Read, &mut buf));
        assert!(buf.is_empty());
    }
}
