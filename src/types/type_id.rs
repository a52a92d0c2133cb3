//! IEC 60870-5-101/104 Type Identification.
//!
//! Type identification defines the structure and meaning of information
//! objects. The value space is a full byte: identifiers 1..=127 are assigned by
//! the standard, 128..=255 are left for private (vendor) use.

/// Type identification.
///
/// Kept as a transparent byte so private type identifiers survive decoding;
/// the standard identifiers are available as associated constants named after
/// the IEC mnemonic (`TypeId::M_SP_NA_1`, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(transparent)]
pub struct TypeId(pub u8);

macro_rules! type_ids {
    ($( $(#[$doc:meta])* $name:ident = $value:literal; )+) => {
        impl TypeId {
            $(
                $(#[$doc])*
                pub const $name: TypeId = TypeId($value);
            )+

            /// Get the IEC mnemonic (e.g. "M_SP_NA_1") for standard identifiers.
            pub const fn standard_name(&self) -> Option<&'static str> {
                match self.0 {
                    $( $value => Some(stringify!($name)), )+
                    _ => None,
                }
            }

            /// All identifiers defined by IEC 60870-5-101/104.
            pub const ALL_STANDARD: &'static [TypeId] = &[$( TypeId($value), )+];
        }
    };
}

type_ids! {
    /// Single-point information
    M_SP_NA_1 = 1;
    /// Single-point information with time tag CP24Time2a
    M_SP_TA_1 = 2;
    /// Double-point information
    M_DP_NA_1 = 3;
    /// Double-point information with time tag CP24Time2a
    M_DP_TA_1 = 4;
    /// Step position information
    M_ST_NA_1 = 5;
    /// Step position information with time tag CP24Time2a
    M_ST_TA_1 = 6;
    /// Bitstring of 32 bit
    M_BO_NA_1 = 7;
    /// Bitstring of 32 bit with time tag CP24Time2a
    M_BO_TA_1 = 8;
    /// Measured value, normalized
    M_ME_NA_1 = 9;
    /// Measured value, normalized with time tag CP24Time2a
    M_ME_TA_1 = 10;
    /// Measured value, scaled
    M_ME_NB_1 = 11;
    /// Measured value, scaled with time tag CP24Time2a
    M_ME_TB_1 = 12;
    /// Measured value, short floating point
    M_ME_NC_1 = 13;
    /// Measured value, short floating point with time tag CP24Time2a
    M_ME_TC_1 = 14;
    /// Integrated totals
    M_IT_NA_1 = 15;
    /// Integrated totals with time tag CP24Time2a
    M_IT_TA_1 = 16;
    /// Event of protection equipment with time tag CP24Time2a
    M_EP_TA_1 = 17;
    /// Packed start events of protection equipment with time tag CP24Time2a
    M_EP_TB_1 = 18;
    /// Packed output circuit information of protection equipment with time tag CP24Time2a
    M_EP_TC_1 = 19;
    /// Packed single-point information with status change detection
    M_PS_NA_1 = 20;
    /// Measured value, normalized without quality descriptor
    M_ME_ND_1 = 21;
    /// Single-point information with time tag CP56Time2a
    M_SP_TB_1 = 30;
    /// Double-point information with time tag CP56Time2a
    M_DP_TB_1 = 31;
    /// Step position information with time tag CP56Time2a
    M_ST_TB_1 = 32;
    /// Bitstring of 32 bit with time tag CP56Time2a
    M_BO_TB_1 = 33;
    /// Measured value, normalized with time tag CP56Time2a
    M_ME_TD_1 = 34;
    /// Measured value, scaled with time tag CP56Time2a
    M_ME_TE_1 = 35;
    /// Measured value, short floating point with time tag CP56Time2a
    M_ME_TF_1 = 36;
    /// Integrated totals with time tag CP56Time2a
    M_IT_TB_1 = 37;
    /// Event of protection equipment with time tag CP56Time2a
    M_EP_TD_1 = 38;
    /// Packed start events of protection equipment with time tag CP56Time2a
    M_EP_TE_1 = 39;
    /// Packed output circuit information of protection equipment with time tag CP56Time2a
    M_EP_TF_1 = 40;
    /// Single command
    C_SC_NA_1 = 45;
    /// Double command
    C_DC_NA_1 = 46;
    /// Regulating step command
    C_RC_NA_1 = 47;
    /// Set-point command, normalized value
    C_SE_NA_1 = 48;
    /// Set-point command, scaled value
    C_SE_NB_1 = 49;
    /// Set-point command, short floating point value
    C_SE_NC_1 = 50;
    /// Bitstring of 32 bit command
    C_BO_NA_1 = 51;
    /// Single command with time tag CP56Time2a
    C_SC_TA_1 = 58;
    /// Double command with time tag CP56Time2a
    C_DC_TA_1 = 59;
    /// Regulating step command with time tag CP56Time2a
    C_RC_TA_1 = 60;
    /// Set-point command, normalized value with time tag CP56Time2a
    C_SE_TA_1 = 61;
    /// Set-point command, scaled value with time tag CP56Time2a
    C_SE_TB_1 = 62;
    /// Set-point command, short floating point value with time tag CP56Time2a
    C_SE_TC_1 = 63;
    /// Bitstring of 32 bit command with time tag CP56Time2a
    C_BO_TA_1 = 64;
    /// End of initialization
    M_EI_NA_1 = 70;
    /// Interrogation command
    C_IC_NA_1 = 100;
    /// Counter interrogation command
    C_CI_NA_1 = 101;
    /// Read command
    C_RD_NA_1 = 102;
    /// Clock synchronization command
    C_CS_NA_1 = 103;
    /// Test command
    C_TS_NA_1 = 104;
    /// Reset process command
    C_RP_NA_1 = 105;
    /// Delay acquisition command
    C_CD_NA_1 = 106;
    /// Test command with time tag CP56Time2a
    C_TS_TA_1 = 107;
    /// Parameter of measured value, normalized value
    P_ME_NA_1 = 110;
    /// Parameter of measured value, scaled value
    P_ME_NB_1 = 111;
    /// Parameter of measured value, short floating point value
    P_ME_NC_1 = 112;
    /// Parameter activation
    P_AC_NA_1 = 113;
    /// File ready
    F_FR_NA_1 = 120;
    /// Section ready
    F_SR_NA_1 = 121;
    /// Call directory, select file, call file, call section
    F_SC_NA_1 = 122;
    /// Last section, last segment
    F_LS_NA_1 = 123;
    /// Ack file, ack section
    F_AF_NA_1 = 124;
    /// Segment
    F_SG_NA_1 = 125;
    /// Directory
    F_DR_TA_1 = 126;
}

impl TypeId {
    /// Create TypeId from raw byte value.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self(value)
    }

    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Check if this identifier is assigned by the standard.
    #[inline]
    pub const fn is_standard(&self) -> bool {
        self.standard_name().is_some()
    }

    /// Check if this identifier lies in the private range (128..=255).
    #[inline]
    pub const fn is_private(&self) -> bool {
        self.0 >= 128
    }

    /// Check if this type is in the monitoring direction (from RTU to master).
    #[inline]
    pub const fn is_monitoring(&self) -> bool {
        matches!(self.0, 1..=44 | 70)
    }

    /// Check if this type is in the control direction (from master to RTU).
    #[inline]
    pub const fn is_control(&self) -> bool {
        matches!(self.0, 45..=69 | 100..=109)
    }

    /// Check if this type belongs to the file transfer service.
    #[inline]
    pub const fn is_file_service(&self) -> bool {
        matches!(self.0, 120..=127)
    }

    /// Check if this type carries a CP24Time2a or CP56Time2a time tag.
    #[inline]
    pub const fn has_time_tag(&self) -> bool {
        matches!(
            self.0,
            2 | 4 | 6 | 8 | 10 | 12 | 14 | 16..=19 | 30..=40 | 58..=64 | 107 | 126
        )
    }
}

impl From<u8> for TypeId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<TypeId> for u8 {
    fn from(value: TypeId) -> Self {
        value.0
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.standard_name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "PRIVATE_{}", self.0),
        }
    }
}

impl std::fmt::Debug for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeId({}={})", self.0, self)
    }
}
