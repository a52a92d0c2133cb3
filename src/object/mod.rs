//! Information objects.
//!
//! Every standard type identifier maps to one [`Element`] variant. Variants
//! that exist with and without a time tag (e.g. `M_SP_NA_1`, `M_SP_TA_1`,
//! `M_SP_TB_1`) share one variant and derive the type identifier from the
//! attached [`Timestamp`].
//!
//! Decoding goes through a per-type [`TypeDescriptor`] table that maps a type
//! identifier to its encoded payload size, sequence support and decode
//! function. Encoding is a plain `match` on the element.

mod command;
mod file;
mod monitor;
mod system;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Iec60870Error, Result};
use crate::types::{
    BinaryCounterReading, CauseOfInitialization, CommandQualifier, Cp16Time2a, Cp24Time2a,
    Cp56Time2a, DoublePointValue, NormalizedValue, OutputCircuitInfo, ParameterQualifier,
    QualityDescriptor, QualityDescriptorP, ScaledValue, SetpointQualifier, StartEvent,
    StatusAndChangeDetection, StepCommandValue, StepPositionValue, TypeId,
};

pub use file::{AckQualifier, FileError, LastSectionQualifier, NameOfFile, SelectAndCallQualifier};
pub use file::{SOF_FA, SOF_FOR, SOF_LFD};
pub(crate) use file::SEGMENT_HEADER_SIZE;

/// Time tag of a monitoring object.
///
/// `Short` selects the `*_TA_1` variant (CP24Time2a), `Full` the `*_TB_1`
/// variant (CP56Time2a).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timestamp {
    /// CP24Time2a: milliseconds and minutes only
    Short(Cp24Time2a),
    /// CP56Time2a: full date and time
    Full(Cp56Time2a),
}

impl Timestamp {
    /// Encoded size in bytes.
    pub const fn size(&self) -> usize {
        match self {
            Self::Short(_) => Cp24Time2a::SIZE,
            Self::Full(_) => Cp56Time2a::SIZE,
        }
    }

    /// The full timestamp, if this is one.
    pub fn full(&self) -> Option<&Cp56Time2a> {
        match self {
            Self::Full(t) => Some(t),
            Self::Short(_) => None,
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Short(t) => buf.put_slice(&t.to_bytes()),
            Self::Full(t) => buf.put_slice(&t.to_bytes()),
        }
    }
}

impl From<Cp56Time2a> for Timestamp {
    fn from(time: Cp56Time2a) -> Self {
        Self::Full(time)
    }
}

impl From<Cp24Time2a> for Timestamp {
    fn from(time: Cp24Time2a) -> Self {
        Self::Short(time)
    }
}

/// Time tag format implied by a monitoring type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimeKind {
    None,
    Short,
    Full,
}

impl TimeKind {
    pub(crate) fn of(type_id: TypeId) -> Self {
        match type_id.as_u8() {
            2 | 4 | 6 | 8 | 10 | 12 | 14 | 16..=19 => Self::Short,
            30..=40 | 58..=64 => Self::Full,
            _ => Self::None,
        }
    }

    pub(crate) fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Short => Cp24Time2a::SIZE,
            Self::Full => Cp56Time2a::SIZE,
        }
    }

    pub(crate) fn read(self, bytes: &[u8]) -> Result<Option<Timestamp>> {
        Ok(match self {
            Self::None => None,
            Self::Short => Some(Timestamp::Short(Cp24Time2a::from_bytes(bytes)?)),
            Self::Full => Some(Timestamp::Full(Cp56Time2a::from_bytes(bytes)?)),
        })
    }
}

/// Pick the type identifier matching an optional time tag.
const fn by_time(time: &Option<Timestamp>, plain: TypeId, short: TypeId, full: TypeId) -> TypeId {
    match time {
        None => plain,
        Some(Timestamp::Short(_)) => short,
        Some(Timestamp::Full(_)) => full,
    }
}

/// Pick the command type identifier for an optional CP56 time tag.
const fn by_cmd_time(time: &Option<Cp56Time2a>, plain: TypeId, timed: TypeId) -> TypeId {
    match time {
        None => plain,
        Some(_) => timed,
    }
}

/// Information element: the payload of one information object.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    // ----- monitoring direction -----
    /// M_SP_NA_1 / M_SP_TA_1 / M_SP_TB_1
    SinglePoint {
        value: bool,
        quality: QualityDescriptor,
        time: Option<Timestamp>,
    },
    /// M_DP_NA_1 / M_DP_TA_1 / M_DP_TB_1
    DoublePoint {
        value: DoublePointValue,
        quality: QualityDescriptor,
        time: Option<Timestamp>,
    },
    /// M_ST_NA_1 / M_ST_TA_1 / M_ST_TB_1
    StepPosition {
        value: StepPositionValue,
        quality: QualityDescriptor,
        time: Option<Timestamp>,
    },
    /// M_BO_NA_1 / M_BO_TA_1 / M_BO_TB_1
    Bitstring32 {
        value: u32,
        quality: QualityDescriptor,
        time: Option<Timestamp>,
    },
    /// M_ME_NA_1 / M_ME_TA_1 / M_ME_TD_1
    MeasuredNormalized {
        value: NormalizedValue,
        quality: QualityDescriptor,
        time: Option<Timestamp>,
    },
    /// M_ME_NB_1 / M_ME_TB_1 / M_ME_TE_1
    MeasuredScaled {
        value: ScaledValue,
        quality: QualityDescriptor,
        time: Option<Timestamp>,
    },
    /// M_ME_NC_1 / M_ME_TC_1 / M_ME_TF_1
    MeasuredFloat {
        value: f32,
        quality: QualityDescriptor,
        time: Option<Timestamp>,
    },
    /// M_IT_NA_1 / M_IT_TA_1 / M_IT_TB_1
    IntegratedTotals {
        value: BinaryCounterReading,
        time: Option<Timestamp>,
    },
    /// M_EP_TA_1 / M_EP_TD_1
    ProtectionEvent {
        state: DoublePointValue,
        quality: QualityDescriptorP,
        elapsed: Cp16Time2a,
        time: Timestamp,
    },
    /// M_EP_TB_1 / M_EP_TE_1
    PackedStartEvents {
        events: StartEvent,
        quality: QualityDescriptorP,
        duration: Cp16Time2a,
        time: Timestamp,
    },
    /// M_EP_TC_1 / M_EP_TF_1
    PackedOutputCircuit {
        circuits: OutputCircuitInfo,
        quality: QualityDescriptorP,
        operating_time: Cp16Time2a,
        time: Timestamp,
    },
    /// M_PS_NA_1
    PackedSinglePoint {
        scd: StatusAndChangeDetection,
        quality: QualityDescriptor,
    },
    /// M_ME_ND_1
    MeasuredNormalizedNoQuality { value: NormalizedValue },
    /// M_EI_NA_1
    EndOfInitialization { coi: CauseOfInitialization },

    // ----- control direction -----
    /// C_SC_NA_1 / C_SC_TA_1
    SingleCommand {
        state: bool,
        qualifier: CommandQualifier,
        time: Option<Cp56Time2a>,
    },
    /// C_DC_NA_1 / C_DC_TA_1
    DoubleCommand {
        state: DoublePointValue,
        qualifier: CommandQualifier,
        time: Option<Cp56Time2a>,
    },
    /// C_RC_NA_1 / C_RC_TA_1
    StepCommand {
        state: StepCommandValue,
        qualifier: CommandQualifier,
        time: Option<Cp56Time2a>,
    },
    /// C_SE_NA_1 / C_SE_TA_1
    SetpointNormalized {
        value: NormalizedValue,
        qualifier: SetpointQualifier,
        time: Option<Cp56Time2a>,
    },
    /// C_SE_NB_1 / C_SE_TB_1
    SetpointScaled {
        value: ScaledValue,
        qualifier: SetpointQualifier,
        time: Option<Cp56Time2a>,
    },
    /// C_SE_NC_1 / C_SE_TC_1
    SetpointFloat {
        value: f32,
        qualifier: SetpointQualifier,
        time: Option<Cp56Time2a>,
    },
    /// C_BO_NA_1 / C_BO_TA_1
    Bitstring32Command { value: u32, time: Option<Cp56Time2a> },

    // ----- system information -----
    /// C_IC_NA_1 (QOI)
    Interrogation { qoi: u8 },
    /// C_CI_NA_1 (QCC)
    CounterInterrogation { qcc: u8 },
    /// C_RD_NA_1 (no payload)
    Read,
    /// C_CS_NA_1
    ClockSync { time: Cp56Time2a },
    /// C_TS_NA_1, fixed test bit pattern
    TestCommand { pattern: u16 },
    /// C_RP_NA_1 (QRP)
    ResetProcess { qrp: u8 },
    /// C_CD_NA_1
    DelayAcquisition { delay: Cp16Time2a },
    /// C_TS_TA_1
    TestCommandWithTime { counter: u16, time: Cp56Time2a },

    // ----- parameters -----
    /// P_ME_NA_1
    ParameterNormalized {
        value: NormalizedValue,
        qualifier: ParameterQualifier,
    },
    /// P_ME_NB_1
    ParameterScaled {
        value: ScaledValue,
        qualifier: ParameterQualifier,
    },
    /// P_ME_NC_1
    ParameterFloat {
        value: f32,
        qualifier: ParameterQualifier,
    },
    /// P_AC_NA_1 (QPA)
    ParameterActivation { qpa: u8 },

    // ----- file transfer -----
    /// F_FR_NA_1
    FileReady {
        nof: NameOfFile,
        length: u32,
        ready: bool,
    },
    /// F_SR_NA_1
    SectionReady {
        nof: NameOfFile,
        nos: u8,
        length: u32,
        ready: bool,
    },
    /// F_SC_NA_1
    CallOrSelect {
        nof: NameOfFile,
        nos: u8,
        qualifier: SelectAndCallQualifier,
        error: FileError,
    },
    /// F_LS_NA_1
    LastSegmentOrSection {
        nof: NameOfFile,
        nos: u8,
        qualifier: LastSectionQualifier,
        checksum: u8,
    },
    /// F_AF_NA_1
    AckFileOrSection {
        nof: NameOfFile,
        nos: u8,
        qualifier: AckQualifier,
        error: FileError,
    },
    /// F_SG_NA_1, variable length
    Segment {
        nof: NameOfFile,
        nos: u8,
        data: Bytes,
    },
    /// F_DR_TA_1
    Directory {
        nof: NameOfFile,
        length: u32,
        status: u8,
        time: Cp56Time2a,
    },

    /// Element of a registered private type, kept as raw payload.
    Private { type_id: TypeId, payload: Bytes },
}

impl Element {
    /// Type identifier of this element.
    pub fn type_id(&self) -> TypeId {
        match self {
            Self::SinglePoint { time, .. } => {
                by_time(time, TypeId::M_SP_NA_1, TypeId::M_SP_TA_1, TypeId::M_SP_TB_1)
            }
            Self::DoublePoint { time, .. } => {
                by_time(time, TypeId::M_DP_NA_1, TypeId::M_DP_TA_1, TypeId::M_DP_TB_1)
            }
            Self::StepPosition { time, .. } => {
                by_time(time, TypeId::M_ST_NA_1, TypeId::M_ST_TA_1, TypeId::M_ST_TB_1)
            }
            Self::Bitstring32 { time, .. } => {
                by_time(time, TypeId::M_BO_NA_1, TypeId::M_BO_TA_1, TypeId::M_BO_TB_1)
            }
            Self::MeasuredNormalized { time, .. } => {
                by_time(time, TypeId::M_ME_NA_1, TypeId::M_ME_TA_1, TypeId::M_ME_TD_1)
            }
            Self::MeasuredScaled { time, .. } => {
                by_time(time, TypeId::M_ME_NB_1, TypeId::M_ME_TB_1, TypeId::M_ME_TE_1)
            }
            Self::MeasuredFloat { time, .. } => {
                by_time(time, TypeId::M_ME_NC_1, TypeId::M_ME_TC_1, TypeId::M_ME_TF_1)
            }
            Self::IntegratedTotals { time, .. } => {
                by_time(time, TypeId::M_IT_NA_1, TypeId::M_IT_TA_1, TypeId::M_IT_TB_1)
            }
            Self::ProtectionEvent { time, .. } => match time {
                Timestamp::Short(_) => TypeId::M_EP_TA_1,
                Timestamp::Full(_) => TypeId::M_EP_TD_1,
            },
            Self::PackedStartEvents { time, .. } => match time {
                Timestamp::Short(_) => TypeId::M_EP_TB_1,
                Timestamp::Full(_) => TypeId::M_EP_TE_1,
            },
            Self::PackedOutputCircuit { time, .. } => match time {
                Timestamp::Short(_) => TypeId::M_EP_TC_1,
                Timestamp::Full(_) => TypeId::M_EP_TF_1,
            },
            Self::PackedSinglePoint { .. } => TypeId::M_PS_NA_1,
            Self::MeasuredNormalizedNoQuality { .. } => TypeId::M_ME_ND_1,
            Self::EndOfInitialization { .. } => TypeId::M_EI_NA_1,

            Self::SingleCommand { time, .. } => by_cmd_time(time, TypeId::C_SC_NA_1, TypeId::C_SC_TA_1),
            Self::DoubleCommand { time, .. } => by_cmd_time(time, TypeId::C_DC_NA_1, TypeId::C_DC_TA_1),
            Self::StepCommand { time, .. } => by_cmd_time(time, TypeId::C_RC_NA_1, TypeId::C_RC_TA_1),
            Self::SetpointNormalized { time, .. } => {
                by_cmd_time(time, TypeId::C_SE_NA_1, TypeId::C_SE_TA_1)
            }
            Self::SetpointScaled { time, .. } => by_cmd_time(time, TypeId::C_SE_NB_1, TypeId::C_SE_TB_1),
            Self::SetpointFloat { time, .. } => by_cmd_time(time, TypeId::C_SE_NC_1, TypeId::C_SE_TC_1),
            Self::Bitstring32Command { time, .. } => {
                by_cmd_time(time, TypeId::C_BO_NA_1, TypeId::C_BO_TA_1)
            }

            Self::Interrogation { .. } => TypeId::C_IC_NA_1,
            Self::CounterInterrogation { .. } => TypeId::C_CI_NA_1,
            Self::Read => TypeId::C_RD_NA_1,
            Self::ClockSync { .. } => TypeId::C_CS_NA_1,
            Self::TestCommand { .. } => TypeId::C_TS_NA_1,
            Self::ResetProcess { .. } => TypeId::C_RP_NA_1,
            Self::DelayAcquisition { .. } => TypeId::C_CD_NA_1,
            Self::TestCommandWithTime { .. } => TypeId::C_TS_TA_1,

            Self::ParameterNormalized { .. } => TypeId::P_ME_NA_1,
            Self::ParameterScaled { .. } => TypeId::P_ME_NB_1,
            Self::ParameterFloat { .. } => TypeId::P_ME_NC_1,
            Self::ParameterActivation { .. } => TypeId::P_AC_NA_1,

            Self::FileReady { .. } => TypeId::F_FR_NA_1,
            Self::SectionReady { .. } => TypeId::F_SR_NA_1,
            Self::CallOrSelect { .. } => TypeId::F_SC_NA_1,
            Self::LastSegmentOrSection { .. } => TypeId::F_LS_NA_1,
            Self::AckFileOrSection { .. } => TypeId::F_AF_NA_1,
            Self::Segment { .. } => TypeId::F_SG_NA_1,
            Self::Directory { .. } => TypeId::F_DR_TA_1,

            Self::Private { type_id, .. } => *type_id,
        }
    }

    /// Encoded payload size in bytes (without the IOA).
    pub fn encoded_size(&self) -> usize {
        match self {
            Self::Segment { data, .. } => file::SEGMENT_HEADER_SIZE + data.len(),
            Self::Private { payload, .. } => payload.len(),
            other => descriptor(other.type_id()).map_or(0, |d| d.size),
        }
    }

    /// Append the encoded payload to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        if monitor::encode(self, buf)
            || command::encode(self, buf)
            || system::encode(self, buf)
            || file::encode(self, buf)
        {
            return;
        }
        if let Self::Private { payload, .. } = self {
            buf.put_slice(payload);
        }
    }

    /// Decode one element of a standard type from `bytes`.
    ///
    /// `bytes` must start at the element payload; trailing bytes are ignored.
    pub fn decode(type_id: TypeId, bytes: &[u8]) -> Result<Self> {
        let desc = descriptor(type_id).ok_or(Iec60870Error::UnknownTypeId(type_id.as_u8()))?;
        if bytes.len() < desc.size {
            return Err(Iec60870Error::invalid_asdu(format!(
                "{}: need {} bytes, have {}",
                type_id,
                desc.size,
                bytes.len()
            )));
        }
        (desc.decode)(type_id, bytes)
    }

    /// Build a single-point element without time tag.
    pub fn single_point(value: bool, quality: QualityDescriptor) -> Self {
        Self::SinglePoint {
            value,
            quality,
            time: None,
        }
    }

    /// Build a short float measurement without time tag.
    pub fn measured_float(value: f32, quality: QualityDescriptor) -> Self {
        Self::MeasuredFloat {
            value,
            quality,
            time: None,
        }
    }

    /// Build a scaled measurement without time tag.
    pub fn measured_scaled(value: i16, quality: QualityDescriptor) -> Self {
        Self::MeasuredScaled {
            value: ScaledValue(value),
            quality,
            time: None,
        }
    }
}

/// Per-type codec entry.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    /// Payload size without IOA; for `F_SG_NA_1` the fixed part before the data
    pub size: usize,
    /// Whether the payload size depends on the content
    pub variable: bool,
    /// Whether SQ=1 encoding is allowed when building
    pub sequence: bool,
    decode: fn(TypeId, &[u8]) -> Result<Element>,
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("size", &self.size)
            .field("variable", &self.variable)
            .field("sequence", &self.sequence)
            .finish()
    }
}

const fn fixed(size: usize, sequence: bool, decode: fn(TypeId, &[u8]) -> Result<Element>) -> TypeDescriptor {
    TypeDescriptor {
        size,
        variable: false,
        sequence,
        decode,
    }
}

/// Codec entry of a standard type identifier.
pub fn descriptor(type_id: TypeId) -> Option<TypeDescriptor> {
    let m = monitor::decode;
    let c = command::decode;
    let s = system::decode;
    let f = file::decode;
    Some(match type_id.as_u8() {
        1 | 3 => fixed(1, true, m),
        2 | 4 => fixed(4, false, m),
        5 => fixed(2, true, m),
        6 => fixed(5, false, m),
        7 => fixed(5, true, m),
        8 => fixed(8, false, m),
        9 | 11 => fixed(3, true, m),
        10 | 12 => fixed(6, false, m),
        13 => fixed(5, true, m),
        14 => fixed(8, false, m),
        15 => fixed(5, true, m),
        16 => fixed(8, false, m),
        17 => fixed(6, false, m),
        18 | 19 => fixed(7, false, m),
        20 => fixed(5, true, m),
        21 => fixed(2, true, m),
        30 | 31 => fixed(8, false, m),
        32 => fixed(9, false, m),
        33 => fixed(12, false, m),
        34 | 35 => fixed(10, false, m),
        36 | 37 => fixed(12, false, m),
        38 => fixed(10, false, m),
        39 | 40 => fixed(11, false, m),
        70 => fixed(1, false, m),

        45..=47 => fixed(1, false, c),
        48 | 49 => fixed(3, false, c),
        50 => fixed(5, false, c),
        51 => fixed(4, false, c),
        58..=60 => fixed(8, false, c),
        61 | 62 => fixed(10, false, c),
        63 => fixed(12, false, c),
        64 => fixed(11, false, c),

        100 | 101 => fixed(1, false, s),
        102 => fixed(0, false, s),
        103 => fixed(7, false, s),
        104 => fixed(2, false, s),
        105 => fixed(1, false, s),
        106 => fixed(2, false, s),
        107 => fixed(9, false, s),
        110 | 111 => fixed(3, true, s),
        112 => fixed(5, true, s),
        113 => fixed(1, true, s),

        120 => fixed(6, false, f),
        121 => fixed(7, false, f),
        122 => fixed(4, false, f),
        123 => fixed(5, false, f),
        124 => fixed(4, false, f),
        125 => TypeDescriptor {
            size: file::SEGMENT_HEADER_SIZE,
            variable: true,
            sequence: false,
            decode: f,
        },
        126 => fixed(13, true, f),
        _ => return None,
    })
}

/// Encoded payload size of a fixed-size standard type.
pub fn payload_size(type_id: TypeId) -> Option<usize> {
    descriptor(type_id).filter(|d| !d.variable).map(|d| d.size)
}

/// Whether the type may be encoded with SQ=1.
pub fn supports_sequence(type_id: TypeId) -> bool {
    descriptor(type_id).is_some_and(|d| d.sequence)
}

/// Information object: an address plus its element.
#[derive(Debug, Clone, PartialEq)]
pub struct InformationObject {
    /// Information object address
    pub ioa: u32,
    /// The information element
    pub element: Element,
}

impl InformationObject {
    /// Create a new information object.
    pub fn new(ioa: u32, element: Element) -> Self {
        Self { ioa, element }
    }

    /// Type identifier of the contained element.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.element.type_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(element: Element) {
        let mut buf = BytesMut::new();
        element.encode(&mut buf);
        assert_eq!(buf.len(), element.encoded_size(), "{:?}", element);
        let decoded = Element::decode(element.type_id(), &buf).unwrap();
        assert_eq!(decoded, element);
    }

    fn cp56() -> Cp56Time2a {
        Cp56Time2a {
            milliseconds: 59_999,
            minutes: 59,
            hours: 23,
            day: 31,
            day_of_week: 7,
            month: 12,
            year: 99,
            substituted: false,
            invalid: true,
            summer_time: true,
        }
    }

    fn cp24() -> Cp24Time2a {
        Cp24Time2a {
            milliseconds: 1234,
            minutes: 17,
            substituted: true,
            invalid: false,
        }
    }

    fn times() -> [Option<Timestamp>; 3] {
        [None, Some(Timestamp::Short(cp24())), Some(Timestamp::Full(cp56()))]
    }

    #[test]
    fn test_every_standard_type_has_descriptor() {
        for type_id in TypeId::ALL_STANDARD {
            assert!(descriptor(*type_id).is_some(), "{}", type_id);
        }
        assert!(descriptor(TypeId(22)).is_none());
        assert!(descriptor(TypeId(200)).is_none());
        assert_eq!(payload_size(TypeId::F_SG_NA_1), None);
        assert_eq!(payload_size(TypeId::C_RD_NA_1), Some(0));
        assert_eq!(payload_size(TypeId::M_EP_TA_1), Some(6));
        assert_eq!(payload_size(TypeId::M_EI_NA_1), Some(1));
    }

    #[test]
    fn test_sequence_support() {
        for id in [1u8, 3, 5, 7, 9, 11, 13, 15, 20, 21, 110, 111, 112, 113, 126] {
            assert!(supports_sequence(TypeId(id)), "{}", id);
        }
        for id in [2u8, 30, 45, 100, 102, 125] {
            assert!(!supports_sequence(TypeId(id)), "{}", id);
        }
    }

    #[test]
    fn test_monitor_roundtrip_with_time_tags() {
        let all_quality = QualityDescriptor::from_raw(0xF1);
        for time in times() {
            roundtrip(Element::SinglePoint {
                value: true,
                quality: QualityDescriptor::from_raw(0xF0),
                time,
            });
            roundtrip(Element::DoublePoint {
                value: DoublePointValue::Indeterminate,
                quality: QualityDescriptor::from_raw(0xF0),
                time,
            });
            roundtrip(Element::StepPosition {
                value: StepPositionValue::new(-64, true),
                quality: all_quality,
                time,
            });
            roundtrip(Element::Bitstring32 {
                value: 0xDEAD_BEEF,
                quality: all_quality,
                time,
            });
            roundtrip(Element::MeasuredNormalized {
                value: NormalizedValue(i16::MIN),
                quality: all_quality,
                time,
            });
            for v in [i16::MIN, -1, 0, i16::MAX] {
                roundtrip(Element::MeasuredScaled {
                    value: ScaledValue(v),
                    quality: all_quality,
                    time,
                });
            }
            roundtrip(Element::MeasuredFloat {
                value: -1.5e10,
                quality: QualityDescriptor::GOOD,
                time,
            });
            roundtrip(Element::IntegratedTotals {
                value: BinaryCounterReading {
                    value: i32::MIN,
                    sequence_number: 31,
                    carry: true,
                    adjusted: true,
                    invalid: true,
                },
                time,
            });
        }
    }

    #[test]
    fn test_protection_roundtrip() {
        for time in [Timestamp::Short(cp24()), Timestamp::Full(cp56())] {
            roundtrip(Element::ProtectionEvent {
                state: DoublePointValue::On,
                quality: QualityDescriptorP::from_raw(0xF8),
                elapsed: Cp16Time2a::new(59_999),
                time,
            });
            roundtrip(Element::PackedStartEvents {
                events: StartEvent::from_raw(0x3F),
                quality: QualityDescriptorP::GOOD,
                duration: Cp16Time2a::new(10),
                time,
            });
            roundtrip(Element::PackedOutputCircuit {
                circuits: OutputCircuitInfo::from_raw(0x0F),
                quality: QualityDescriptorP::GOOD.set_invalid(true),
                operating_time: Cp16Time2a::new(500),
                time,
            });
        }
        roundtrip(Element::PackedSinglePoint {
            scd: StatusAndChangeDetection {
                status: 0xA5A5,
                change: 0x0001,
            },
            quality: QualityDescriptor::GOOD.set_overflow(true),
        });
        roundtrip(Element::MeasuredNormalizedNoQuality {
            value: NormalizedValue(i16::MAX),
        });
        roundtrip(Element::EndOfInitialization {
            coi: CauseOfInitialization {
                cause: 2,
                after_parameter_change: true,
            },
        });
    }

    #[test]
    fn test_type_id_follows_time_tag() {
        let mut el = Element::single_point(false, QualityDescriptor::GOOD);
        assert_eq!(el.type_id(), TypeId::M_SP_NA_1);
        if let Element::SinglePoint { time, .. } = &mut el {
            *time = Some(Timestamp::Full(cp56()));
        }
        assert_eq!(el.type_id(), TypeId::M_SP_TB_1);
        assert_eq!(el.encoded_size(), 8);
    }

    #[test]
    fn test_decode_short_payload() {
        let err = Element::decode(TypeId::M_ME_NC_1, &[0, 0, 0]).unwrap_err();
        assert!(matches!(err, Iec60870Error::InvalidAsdu(_)));
        let err = Element::decode(TypeId(150), &[0]).unwrap_err();
        assert!(matches!(err, Iec60870Error::UnknownTypeId(150)));
    }

    #[test]
    fn test_private_encode() {
        let el = Element::Private {
            type_id: TypeId(140),
            payload: Bytes::from_static(&[1, 2, 3]),
        };
        let mut buf = BytesMut::new();
        el.encode(&mut buf);
        assert_eq!(&buf[..], &[1, 2, 3]);
        assert_eq!(el.encoded_size(), 3);
        assert_eq!(el.type_id(), TypeId(140));
    }
}
