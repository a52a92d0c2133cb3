//! Cause of Transmission (COT).
//!
//! The cause of transmission defines the reason for sending an ASDU. On the
//! wire it shares its first byte with the test (bit 7) and negative (bit 6)
//! flags; only the lower 6 bits are the cause itself.

macro_rules! causes {
    ($( $(#[$doc:meta])* $name:ident = $value:literal, $label:literal; )+) => {
        /// Cause of Transmission (COT).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        pub enum Cot {
            $( $(#[$doc])* $name, )+
            /// Value without an assigned meaning (0, 17..=19, 42, 43, 48..=63)
            Reserved(u8),
        }

        impl Cot {
            /// Create COT from raw byte value (lower 6 bits).
            #[inline]
            pub const fn from_u8(value: u8) -> Self {
                match value & 0x3F {
                    $( $value => Self::$name, )+
                    other => Self::Reserved(other),
                }
            }

            /// Convert to raw byte value.
            #[inline]
            pub const fn as_u8(self) -> u8 {
                match self {
                    $( Self::$name => $value, )+
                    Self::Reserved(value) => value & 0x3F,
                }
            }

            /// IEC mnemonic (e.g. "ACTIVATION_CON").
            pub const fn name(&self) -> &'static str {
                match self {
                    $( Self::$name => $label, )+
                    Self::Reserved(_) => "RESERVED",
                }
            }
        }
    };
}

causes! {
    /// Periodic, cyclic (1)
    Periodic = 1, "PERIODIC";
    /// Background scan (2)
    Background = 2, "BACKGROUND_SCAN";
    /// Spontaneous (3)
    Spontaneous = 3, "SPONTANEOUS";
    /// Initialized (4)
    Initialized = 4, "INITIALIZED";
    /// Request or requested (5)
    Request = 5, "REQUEST";
    /// Activation (6)
    Activation = 6, "ACTIVATION";
    /// Activation confirmation (7)
    ActivationConfirm = 7, "ACTIVATION_CON";
    /// Deactivation (8)
    Deactivation = 8, "DEACTIVATION";
    /// Deactivation confirmation (9)
    DeactivationConfirm = 9, "DEACTIVATION_CON";
    /// Activation termination (10)
    ActivationTermination = 10, "ACTIVATION_TERMINATION";
    /// Return information caused by a remote command (11)
    ReturnRemoteCommand = 11, "RETURN_INFO_REMOTE";
    /// Return information caused by a local command (12)
    ReturnLocalCommand = 12, "RETURN_INFO_LOCAL";
    /// File transfer (13)
    FileTransfer = 13, "FILE_TRANSFER";
    /// Authentication (14)
    Authentication = 14, "AUTHENTICATION";
    /// Maintenance of authentication session key (15)
    SessionKeyMaintenance = 15, "MAINTENANCE_OF_AUTH_SESSION_KEY";
    /// Maintenance of user role and update key (16)
    UserRoleMaintenance = 16, "MAINTENANCE_OF_USER_ROLE_AND_UPDATE_KEY";
    /// Interrogated by station interrogation (20)
    InterrogatedByStation = 20, "INTERROGATED_BY_STATION";
    /// Interrogated by group 1 interrogation (21)
    InterrogatedByGroup1 = 21, "INTERROGATED_BY_GROUP_1";
    /// Interrogated by group 2 interrogation (22)
    InterrogatedByGroup2 = 22, "INTERROGATED_BY_GROUP_2";
    /// Interrogated by group 3 interrogation (23)
    InterrogatedByGroup3 = 23, "INTERROGATED_BY_GROUP_3";
    /// Interrogated by group 4 interrogation (24)
    InterrogatedByGroup4 = 24, "INTERROGATED_BY_GROUP_4";
    /// Interrogated by group 5 interrogation (25)
    InterrogatedByGroup5 = 25, "INTERROGATED_BY_GROUP_5";
    /// Interrogated by group 6 interrogation (26)
    InterrogatedByGroup6 = 26, "INTERROGATED_BY_GROUP_6";
    /// Interrogated by group 7 interrogation (27)
    InterrogatedByGroup7 = 27, "INTERROGATED_BY_GROUP_7";
    /// Interrogated by group 8 interrogation (28)
    InterrogatedByGroup8 = 28, "INTERROGATED_BY_GROUP_8";
    /// Interrogated by group 9 interrogation (29)
    InterrogatedByGroup9 = 29, "INTERROGATED_BY_GROUP_9";
    /// Interrogated by group 10 interrogation (30)
    InterrogatedByGroup10 = 30, "INTERROGATED_BY_GROUP_10";
    /// Interrogated by group 11 interrogation (31)
    InterrogatedByGroup11 = 31, "INTERROGATED_BY_GROUP_11";
    /// Interrogated by group 12 interrogation (32)
    InterrogatedByGroup12 = 32, "INTERROGATED_BY_GROUP_12";
    /// Interrogated by group 13 interrogation (33)
    InterrogatedByGroup13 = 33, "INTERROGATED_BY_GROUP_13";
    /// Interrogated by group 14 interrogation (34)
    InterrogatedByGroup14 = 34, "INTERROGATED_BY_GROUP_14";
    /// Interrogated by group 15 interrogation (35)
    InterrogatedByGroup15 = 35, "INTERROGATED_BY_GROUP_15";
    /// Interrogated by group 16 interrogation (36)
    InterrogatedByGroup16 = 36, "INTERROGATED_BY_GROUP_16";
    /// Requested by general counter request (37)
    RequestedByGeneralCounter = 37, "REQUESTED_BY_GENERAL_COUNTER";
    /// Requested by group 1 counter request (38)
    RequestedByGroup1Counter = 38, "REQUESTED_BY_GROUP_1_COUNTER";
    /// Requested by group 2 counter request (39)
    RequestedByGroup2Counter = 39, "REQUESTED_BY_GROUP_2_COUNTER";
    /// Requested by group 3 counter request (40)
    RequestedByGroup3Counter = 40, "REQUESTED_BY_GROUP_3_COUNTER";
    /// Requested by group 4 counter request (41)
    RequestedByGroup4Counter = 41, "REQUESTED_BY_GROUP_4_COUNTER";
    /// Unknown type identification (44)
    UnknownTypeId = 44, "UNKNOWN_TYPE_ID";
    /// Unknown cause of transmission (45)
    UnknownCot = 45, "UNKNOWN_CAUSE_OF_TRANSMISSION";
    /// Unknown common address of ASDU (46)
    UnknownCommonAddress = 46, "UNKNOWN_COMMON_ADDRESS_OF_ASDU";
    /// Unknown information object address (47)
    UnknownIoa = 47, "UNKNOWN_INFORMATION_OBJECT_ADDRESS";
}

impl Cot {
    /// Response cause for a station (0) or group (1..=16) interrogation.
    pub fn interrogated_by(qoi: u8) -> Option<Self> {
        match qoi {
            20..=36 => Some(Self::from_u8(qoi)),
            _ => None,
        }
    }

    /// Check if this is a positive confirmation.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        matches!(
            self,
            Self::ActivationConfirm | Self::DeactivationConfirm | Self::ActivationTermination
        )
    }

    /// Check if this is one of the "unknown ..." rejection causes.
    #[inline]
    pub const fn is_negative(&self) -> bool {
        matches!(
            self,
            Self::UnknownTypeId | Self::UnknownCot | Self::UnknownCommonAddress | Self::UnknownIoa
        )
    }

    /// Check if the value has no assigned meaning.
    #[inline]
    pub const fn is_reserved(&self) -> bool {
        matches!(self, Self::Reserved(_))
    }

    /// Check if this COT indicates an interrogation response.
    #[inline]
    pub const fn is_interrogation_response(&self) -> bool {
        matches!(self.as_u8(), 20..=36)
    }

    /// Check if this COT indicates a counter request response.
    #[inline]
    pub const fn is_counter_response(&self) -> bool {
        matches!(self.as_u8(), 37..=41)
    }
}

impl From<u8> for Cot {
    fn from(value: u8) -> Self {
        Self::from_u8(value)
    }
}

impl std::fmt::Display for Cot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reserved(value) => write!(f, "RESERVED_{}", value),
            _ => f.write_str(self.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cot_from_u8() {
        assert_eq!(Cot::from_u8(1), Cot::Periodic);
        assert_eq!(Cot::from_u8(3), Cot::Spontaneous);
        assert_eq!(Cot::from_u8(6), Cot::Activation);
        assert_eq!(Cot::from_u8(7), Cot::ActivationConfirm);
        assert_eq!(Cot::from_u8(13), Cot::FileTransfer);
        assert_eq!(Cot::from_u8(20), Cot::InterrogatedByStation);
        assert_eq!(Cot::from_u8(47), Cot::UnknownIoa);
    }

    #[test]
    fn test_cot_all_values_roundtrip() {
        let valid_values = (1..=16).chain(20..=41).chain(44..=47);
        for val in valid_values {
            let cot = Cot::from_u8(val);
            assert_eq!(cot.as_u8(), val, "Roundtrip failed for value {}", val);
        }
    }

    #[test]
    fn test_cot_reserved_values() {
        for val in [0, 17, 18, 19, 42, 43, 48, 50, 63] {
            let cot = Cot::from_u8(val);
            assert_eq!(cot, Cot::Reserved(val));
            assert!(cot.is_reserved());
            assert_eq!(cot.as_u8(), val);
        }
        // flags are not part of the cause
        assert_eq!(Cot::from_u8(0xEA), Cot::Reserved(42));
        assert_eq!(Cot::Reserved(42).to_string(), "RESERVED_42");
        assert!(!Cot::Spontaneous.is_reserved());
    }

    #[test]
    fn test_cot_upper_bits_masked() {
        // test and negative flags live in bits 7 and 6
        assert_eq!(Cot::from_u8(0x43), Cot::Spontaneous);
        assert_eq!(Cot::from_u8(0x86), Cot::Activation);
        assert_eq!(Cot::from_u8(0xC7), Cot::ActivationConfirm);
    }

    #[test]
    fn test_interrogated_by() {
        assert_eq!(Cot::interrogated_by(20), Some(Cot::InterrogatedByStation));
        assert_eq!(Cot::interrogated_by(36), Some(Cot::InterrogatedByGroup16));
        assert_eq!(Cot::interrogated_by(19), None);
        assert_eq!(Cot::interrogated_by(37), None);
    }

    #[test]
    fn test_cot_classification() {
        assert!(Cot::ActivationConfirm.is_positive());
        assert!(Cot::ActivationTermination.is_positive());
        assert!(!Cot::Activation.is_positive());

        assert!(Cot::UnknownTypeId.is_negative());
        assert!(Cot::UnknownIoa.is_negative());
        assert!(!Cot::Spontaneous.is_negative());

        assert!(Cot::InterrogatedByGroup4.is_interrogation_response());
        assert!(Cot::RequestedByGroup2Counter.is_counter_response());
        assert!(!Cot::Spontaneous.is_counter_response());
    }

    #[test]
    fn test_cot_display() {
        assert_eq!(Cot::ActivationConfirm.to_string(), "ACTIVATION_CON");
        assert_eq!(Cot::UnknownCot.to_string(), "UNKNOWN_CAUSE_OF_TRANSMISSION");
        assert_eq!(Cot::InterrogatedByGroup12.to_string(), "INTERROGATED_BY_GROUP_12");
    }
}
