//! Fixed-width value encodings used inside information objects.

use crate::error::{Iec60870Error, Result};

use super::QualityDescriptor;

/// Scaled value (SVA): 16-bit two's complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ScaledValue(pub i16);

impl ScaledValue {
    /// Create from a wider integer, clamped to [-32768, 32767].
    pub fn from_i32(value: i32) -> Self {
        Self(value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16)
    }

    /// Raw value.
    pub fn value(&self) -> i16 {
        self.0
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Self(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

/// Normalized value (NVA): fixed point fraction in [-1.0, 1.0 - 2^-15].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct NormalizedValue(pub i16);

impl NormalizedValue {
    /// Largest representable value, 32767/32768.
    pub const MAX: f32 = 32767.0 / 32768.0;

    /// Create from a float, clamped to [-1.0, 32767/32768].
    pub fn from_f32(value: f32) -> Self {
        if value.is_nan() {
            return Self(0);
        }
        let scaled = (value.clamp(-1.0, Self::MAX) * 32768.0).round();
        Self(scaled.clamp(-32768.0, 32767.0) as i16)
    }

    /// Value as float.
    pub fn to_f32(&self) -> f32 {
        f32::from(self.0) / 32768.0
    }

    /// Raw 16-bit representation.
    pub fn raw(&self) -> i16 {
        self.0
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Self(i16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn to_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

/// Short floating point (IEEE 754), always little-endian on the wire.
pub(crate) fn f32_from_bytes(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Double-point information value (DPI / DCS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DoublePointValue {
    /// Indeterminate or intermediate (00)
    #[default]
    Intermediate = 0,
    /// Determined OFF (01)
    Off = 1,
    /// Determined ON (10)
    On = 2,
    /// Indeterminate (11)
    Indeterminate = 3,
}

impl DoublePointValue {
    /// Parse from byte (lower 2 bits).
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Intermediate,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::Indeterminate,
        }
    }

    /// Encode to the lower 2 bits.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Step position with transient indication (VTI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct StepPositionValue {
    /// Position, -64..=63
    pub value: i8,
    /// Equipment is in transient state
    pub transient: bool,
}

impl StepPositionValue {
    /// Create a step position, clamping to -64..=63.
    pub fn new(value: i8, transient: bool) -> Self {
        Self {
            value: value.clamp(-64, 63),
            transient,
        }
    }

    pub(crate) fn from_u8(byte: u8) -> Self {
        // sign-extend the 7-bit field
        let value = ((byte << 1) as i8) >> 1;
        Self {
            value,
            transient: (byte & 0x80) != 0,
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        ((self.value as u8) & 0x7F) | if self.transient { 0x80 } else { 0 }
    }
}

/// Binary counter reading (BCR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BinaryCounterReading {
    /// Counter value
    pub value: i32,
    /// Sequence number (0-31)
    pub sequence_number: u8,
    /// Carry (CY): counter overflow in the integration period
    pub carry: bool,
    /// Counter adjusted (CA)
    pub adjusted: bool,
    /// Invalid (IV)
    pub invalid: bool,
}

impl BinaryCounterReading {
    /// Encoded size in bytes.
    pub const SIZE: usize = 5;

    /// Create a reading with only the counter value set.
    pub fn new(value: i32) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let flags = bytes[4];
        Self {
            value: i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            sequence_number: flags & 0x1F,
            carry: (flags & 0x20) != 0,
            adjusted: (flags & 0x40) != 0,
            invalid: (flags & 0x80) != 0,
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; 5] {
        let v = self.value.to_le_bytes();
        let flags = (self.sequence_number & 0x1F)
            | if self.carry { 0x20 } else { 0 }
            | if self.adjusted { 0x40 } else { 0 }
            | if self.invalid { 0x80 } else { 0 };
        [v[0], v[1], v[2], v[3], flags]
    }
}

/// Status and status change detection (SCD) for 16 packed single points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct StatusAndChangeDetection {
    /// Status bits (ST), one per point
    pub status: u16,
    /// Change detection bits (CD)
    pub change: u16,
}

impl StatusAndChangeDetection {
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            status: u16::from_le_bytes([bytes[0], bytes[1]]),
            change: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; 4] {
        let s = self.status.to_le_bytes();
        let c = self.change.to_le_bytes();
        [s[0], s[1], c[0], c[1]]
    }

    /// Status of point `index` (0-15).
    pub fn status_of(&self, index: u8) -> bool {
        index < 16 && (self.status >> index) & 1 == 1
    }

    /// Whether point `index` (0-15) changed.
    pub fn changed(&self, index: u8) -> bool {
        index < 16 && (self.change >> index) & 1 == 1
    }
}

/// Single-point information with quality (SIQ).
pub(crate) fn siq(value: bool, quality: QualityDescriptor) -> u8 {
    (quality.as_raw() & 0xF0) | u8::from(value)
}

/// Regulating step command state (RCS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum StepCommandValue {
    /// Not permitted (0)
    #[default]
    Invalid0 = 0,
    /// Next step lower (1)
    Lower = 1,
    /// Next step higher (2)
    Higher = 2,
    /// Not permitted (3)
    Invalid3 = 3,
}

impl StepCommandValue {
    /// Parse from byte (lower 2 bits).
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Invalid0,
            1 => Self::Lower,
            2 => Self::Higher,
            _ => Self::Invalid3,
        }
    }
}

/// Command qualifier shared by SCO/DCO/RCO: qualifier of command and select flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CommandQualifier {
    /// Qualifier of command (QU, 0-31): 0 none, 1 short pulse, 2 long pulse, 3 persistent
    pub qu: u8,
    /// Select (true) or execute (false)
    pub select: bool,
}

impl CommandQualifier {
    /// Execute command without additional definition.
    pub const EXECUTE: Self = Self {
        qu: 0,
        select: false,
    };

    /// Select command without additional definition.
    pub const SELECT: Self = Self {
        qu: 0,
        select: true,
    };

    pub(crate) fn from_u8(byte: u8) -> Self {
        Self {
            qu: (byte >> 2) & 0x1F,
            select: (byte & 0x80) != 0,
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        ((self.qu & 0x1F) << 2) | if self.select { 0x80 } else { 0 }
    }
}

/// Qualifier of set-point command (QOS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SetpointQualifier {
    /// Qualifier (QL, 0-127)
    pub ql: u8,
    /// Select (true) or execute (false)
    pub select: bool,
}

impl SetpointQualifier {
    pub(crate) fn from_u8(byte: u8) -> Self {
        Self {
            ql: byte & 0x7F,
            select: (byte & 0x80) != 0,
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        (self.ql & 0x7F) | if self.select { 0x80 } else { 0 }
    }
}

/// Qualifier of parameter of measured values (QPM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ParameterQualifier {
    /// Kind of parameter (KPA, 0-63): 1 threshold, 2 smoothing, 3 low limit, 4 high limit
    pub kind: u8,
    /// Local parameter change (LPC)
    pub local_change: bool,
    /// Parameter not in operation (POP)
    pub not_in_operation: bool,
}

impl ParameterQualifier {
    pub(crate) fn from_u8(byte: u8) -> Self {
        Self {
            kind: byte & 0x3F,
            local_change: (byte & 0x40) != 0,
            not_in_operation: (byte & 0x80) != 0,
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        (self.kind & 0x3F)
            | if self.local_change { 0x40 } else { 0 }
            | if self.not_in_operation { 0x80 } else { 0 }
    }
}

/// Cause of initialization (COI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CauseOfInitialization {
    /// Cause (0 local power on, 1 local manual reset, 2 remote reset)
    pub cause: u8,
    /// Initialization after change of local parameters
    pub after_parameter_change: bool,
}

impl CauseOfInitialization {
    pub(crate) fn from_u8(byte: u8) -> Self {
        Self {
            cause: byte & 0x7F,
            after_parameter_change: (byte & 0x80) != 0,
        }
    }

    pub(crate) fn as_u8(&self) -> u8 {
        (self.cause & 0x7F) | if self.after_parameter_change { 0x80 } else { 0 }
    }
}

/// Qualifier of interrogation: station interrogation.
pub const QOI_STATION: u8 = 20;

/// Qualifier of counter interrogation (QCC) request field: general request.
pub const QCC_RQT_GENERAL: u8 = 5;

/// Compose a QCC byte from request (RQT, 0-63) and freeze (FRZ, 0-3) fields.
pub const fn qcc(request: u8, freeze: u8) -> u8 {
    (request & 0x3F) | ((freeze & 0x03) << 6)
}

/// Read three little-endian bytes.
pub(crate) fn u24_from_bytes(bytes: &[u8]) -> u32 {
    u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16)
}

/// Write the lower three bytes of `value` little-endian.
pub(crate) fn u24_to_bytes(value: u32) -> [u8; 3] {
    let b = value.to_le_bytes();
    [b[0], b[1], b[2]]
}

/// Check a payload slice has at least `len` bytes.
pub(crate) fn need(bytes: &[u8], len: usize, what: &str) -> Result<()> {
    if bytes.len() < len {
        return Err(Iec60870Error::invalid_asdu(format!(
            "{}: need {} bytes, have {}",
            what,
            len,
            bytes.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaled_value_clamp() {
        assert_eq!(ScaledValue::from_i32(40_000).value(), 32767);
        assert_eq!(ScaledValue::from_i32(-40_000).value(), -32768);
        assert_eq!(ScaledValue::from_i32(-32768).value(), -32768);
        assert_eq!(ScaledValue::from_i32(123).value(), 123);
        let v = ScaledValue(-2);
        assert_eq!(v.to_bytes(), [0xFE, 0xFF]);
        assert_eq!(ScaledValue::from_bytes(&v.to_bytes()), v);
    }

    #[test]
    fn test_normalized_value_clamp() {
        assert_eq!(NormalizedValue::from_f32(1.5).raw(), 32767);
        assert_eq!(NormalizedValue::from_f32(-3.0).raw(), -32768);
        assert_eq!(NormalizedValue::from_f32(0.5).raw(), 16384);
        assert_eq!(NormalizedValue::from_f32(f32::NAN).raw(), 0);
        assert!((NormalizedValue(16384).to_f32() - 0.5).abs() < f32::EPSILON);
        assert!((NormalizedValue(32767).to_f32() - NormalizedValue::MAX).abs() < f32::EPSILON);
    }

    #[test]
    fn test_step_position_sign_extension() {
        for value in [-64i8, -1, 0, 1, 63] {
            for transient in [false, true] {
                let vti = StepPositionValue::new(value, transient);
                assert_eq!(StepPositionValue::from_u8(vti.as_u8()), vti);
            }
        }
        assert_eq!(StepPositionValue::from_u8(0x7F).value, -1);
        assert_eq!(StepPositionValue::new(100, false).value, 63);
    }

    #[test]
    fn test_bcr_layout() {
        let bcr = BinaryCounterReading {
            value: -5,
            sequence_number: 31,
            carry: true,
            adjusted: false,
            invalid: true,
        };
        let bytes = bcr.to_bytes();
        assert_eq!(bytes, [0xFB, 0xFF, 0xFF, 0xFF, 0xBF]);
        assert_eq!(BinaryCounterReading::from_bytes(&bytes), bcr);
    }

    #[test]
    fn test_command_qualifiers() {
        let q = CommandQualifier { qu: 1, select: true };
        assert_eq!(q.as_u8(), 0x84);
        assert_eq!(CommandQualifier::from_u8(0x85), q);

        let qos = SetpointQualifier { ql: 127, select: true };
        assert_eq!(qos.as_u8(), 0xFF);

        let qpm = ParameterQualifier {
            kind: 1,
            local_change: false,
            not_in_operation: true,
        };
        assert_eq!(ParameterQualifier::from_u8(qpm.as_u8()), qpm);
    }

    #[test]
    fn test_qcc_and_scd() {
        assert_eq!(qcc(QCC_RQT_GENERAL, 1), 0x45);
        let scd = StatusAndChangeDetection {
            status: 0b101,
            change: 0x8000,
        };
        assert!(scd.status_of(0));
        assert!(!scd.status_of(1));
        assert!(scd.changed(15));
        assert!(!scd.changed(16));
        assert_eq!(StatusAndChangeDetection::from_bytes(&scd.to_bytes()), scd);
    }

    #[test]
    fn test_siq_and_u24() {
        assert_eq!(siq(true, QualityDescriptor::INVALID), 0x81);
        assert_eq!(u24_from_bytes(&u24_to_bytes(0x123456)), 0x123456);
        assert!(need(&[0, 1], 3, "x").is_err());
    }
}
