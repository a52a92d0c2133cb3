//! File transfer elements (types 120..=126) and their qualifiers.

use bytes::{BufMut, Bytes, BytesMut};

use super::Element;
use crate::error::{Iec60870Error, Result};
use crate::types::{u24_from_bytes, u24_to_bytes, Cp56Time2a, TypeId};

/// NOF + NOS + LOS in front of segment data.
pub(crate) const SEGMENT_HEADER_SIZE: usize = 4;

/// Status of file: last file of the directory (LFD).
pub const SOF_LFD: u8 = 0x20;
/// Status of file: name defines a subdirectory (FOR).
pub const SOF_FOR: u8 = 0x40;
/// Status of file: file transfer is active (FA).
pub const SOF_FA: u8 = 0x80;

/// Name of file (NOF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NameOfFile(pub u16);

impl NameOfFile {
    /// Default (matches any file in a selection)
    pub const DEFAULT: Self = Self(0);
    /// Transparent file
    pub const TRANSPARENT_FILE: Self = Self(1);
    /// Disturbance data of protection equipment
    pub const DISTURBANCE_DATA: Self = Self(2);
    /// Sequences of events
    pub const SEQUENCES_OF_EVENTS: Self = Self(3);
    /// Sequences of recorded analogue values
    pub const SEQUENCES_OF_ANALOGUE_VALUES: Self = Self(4);
}

impl std::fmt::Display for NameOfFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! nibble_enum {
    (
        $(#[$meta:meta])* $name:ident {
            $(#[$fdoc:meta])* $first:ident = $fvalue:literal,
            $( $(#[$doc:meta])* $variant:ident = $value:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(u8)]
        pub enum $name {
            $(#[$fdoc])*
            #[default]
            $first = $fvalue,
            $( $(#[$doc])* $variant = $value, )+
        }

        impl $name {
            /// Decode from the lower nibble; unassigned values map to the default.
            pub const fn from_u8(value: u8) -> Self {
                match value & 0x0F {
                    $( $value => Self::$variant, )+
                    _ => Self::$first,
                }
            }

            /// Raw value.
            pub const fn as_u8(self) -> u8 {
                self as u8
            }
        }
    };
}

nibble_enum! {
    /// Select and call qualifier (SCQ), lower nibble.
    SelectAndCallQualifier {
        /// Default
        Default = 0,
        /// Select file
        SelectFile = 1,
        /// Request (call) file
        RequestFile = 2,
        /// Deactivate file
        DeactivateFile = 3,
        /// Delete file
        DeleteFile = 4,
        /// Select section
        SelectSection = 5,
        /// Request (call) section
        RequestSection = 6,
        /// Deactivate section
        DeactivateSection = 7,
    }
}

nibble_enum! {
    /// Last section or segment qualifier (LSQ).
    LastSectionQualifier {
        /// Not used
        NotUsed = 0,
        /// File transfer without deactivation
        FileTransferWithoutDeact = 1,
        /// File transfer with deactivation (abort)
        FileTransferWithDeact = 2,
        /// Section transfer without deactivation
        SectionTransferWithoutDeact = 3,
        /// Section transfer with deactivation
        SectionTransferWithDeact = 4,
    }
}

nibble_enum! {
    /// Acknowledge file or section qualifier (AFQ), lower nibble.
    AckQualifier {
        /// Not used
        NotUsed = 0,
        /// Positive acknowledge of file transfer
        PosAckFile = 1,
        /// Negative acknowledge of file transfer
        NegAckFile = 2,
        /// Positive acknowledge of section transfer
        PosAckSection = 3,
        /// Negative acknowledge of section transfer
        NegAckSection = 4,
    }
}

nibble_enum! {
    /// File error carried in the upper nibble of SCQ and AFQ.
    FileError {
        /// No error
        Default = 0,
        /// Requested memory space not available
        NoMemory = 1,
        /// Checksum failed
        ChecksumFailed = 2,
        /// Unexpected communication service
        UnexpectedService = 3,
        /// Unexpected name of file
        UnexpectedNof = 4,
        /// Unexpected name of section
        UnexpectedNos = 5,
    }
}

/// FRQ/SRQ bit 7: negative confirmation / section not ready.
const NOT_READY: u8 = 0x80;

fn nof(b: &[u8]) -> NameOfFile {
    NameOfFile(u16::from_le_bytes([b[0], b[1]]))
}

pub(super) fn decode(type_id: TypeId, b: &[u8]) -> Result<Element> {
    Ok(match type_id.as_u8() {
        120 => Element::FileReady {
            nof: nof(b),
            length: u24_from_bytes(&b[2..]),
            ready: b[5] & NOT_READY == 0,
        },
        121 => Element::SectionReady {
            nof: nof(b),
            nos: b[2],
            length: u24_from_bytes(&b[3..]),
            ready: b[6] & NOT_READY == 0,
        },
        122 => Element::CallOrSelect {
            nof: nof(b),
            nos: b[2],
            qualifier: SelectAndCallQualifier::from_u8(b[3]),
            error: FileError::from_u8(b[3] >> 4),
        },
        123 => Element::LastSegmentOrSection {
            nof: nof(b),
            nos: b[2],
            qualifier: LastSectionQualifier::from_u8(b[3]),
            checksum: b[4],
        },
        124 => Element::AckFileOrSection {
            nof: nof(b),
            nos: b[2],
            qualifier: AckQualifier::from_u8(b[3]),
            error: FileError::from_u8(b[3] >> 4),
        },
        125 => {
            let los = usize::from(b[3]);
            let end = SEGMENT_HEADER_SIZE + los;
            if b.len() < end {
                return Err(Iec60870Error::invalid_asdu(format!(
                    "segment: length {} exceeds payload {}",
                    los,
                    b.len() - SEGMENT_HEADER_SIZE
                )));
            }
            Element::Segment {
                nof: nof(b),
                nos: b[2],
                data: Bytes::copy_from_slice(&b[SEGMENT_HEADER_SIZE..end]),
            }
        }
        _ => Element::Directory {
            nof: nof(b),
            length: u24_from_bytes(&b[2..]),
            status: b[5],
            time: Cp56Time2a::from_bytes(&b[6..])?,
        },
    })
}

pub(super) fn encode(element: &Element, buf: &mut BytesMut) -> bool {
    match element {
        Element::FileReady { nof, length, ready } => {
            buf.put_u16_le(nof.0);
            buf.put_slice(&u24_to_bytes(*length));
            buf.put_u8(if *ready { 0 } else { NOT_READY });
        }
        Element::SectionReady {
            nof,
            nos,
            length,
            ready,
        } => {
            buf.put_u16_le(nof.0);
            buf.put_u8(*nos);
            buf.put_slice(&u24_to_bytes(*length));
            buf.put_u8(if *ready { 0 } else { NOT_READY });
        }
        Element::CallOrSelect {
            nof,
            nos,
            qualifier,
            error,
        } => {
            buf.put_u16_le(nof.0);
            buf.put_u8(*nos);
            buf.put_u8(qualifier.as_u8() | (error.as_u8() << 4));
        }
        Element::LastSegmentOrSection {
            nof,
            nos,
            qualifier,
            checksum,
        } => {
            buf.put_u16_le(nof.0);
            buf.put_u8(*nos);
            buf.put_u8(qualifier.as_u8());
            buf.put_u8(*checksum);
        }
        Element::AckFileOrSection {
            nof,
            nos,
            qualifier,
            error,
        } => {
            buf.put_u16_le(nof.0);
            buf.put_u8(*nos);
            buf.put_u8(qualifier.as_u8() | (error.as_u8() << 4));
        }
        Element::Segment { nof, nos, data } => {
            buf.put_u16_le(nof.0);
            buf.put_u8(*nos);
            buf.put_u8(data.len().min(255) as u8);
            buf.put_slice(&data[..data.len().min(255)]);
        }
        Element::Directory {
            nof,
            length,
            status,
            time,
        } => {
            buf.put_u16_le(nof.0);
            buf.put_slice(&u24_to_bytes(*length));
            buf.put_u8(*status);
            buf.put_slice(&time.to_bytes());
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
        assert_eq!(buf.len(), element.encoded_size(), "{:?}", element);
        assert_eq!(decode(element.type_id(), &buf).unwrap(), element);
    }

    #[test]
    fn test_file_objects_roundtrip() {
        let nof = NameOfFile::TRANSPARENT_FILE;
        roundtrip(Element::FileReady {
            nof,
            length: 0xFF_FFFF,
            ready: true,
        });
        roundtrip(Element::FileReady {
            nof,
            length: 0,
            ready: false,
        });
        roundtrip(Element::SectionReady {
            nof,
            nos: 3,
            length: 1000,
            ready: false,
        });
        roundtrip(Element::CallOrSelect {
            nof,
            nos: 1,
            qualifier: SelectAndCallQualifier::RequestSection,
            error: FileError::UnexpectedNos,
        });
        roundtrip(Element::LastSegmentOrSection {
            nof,
            nos: 2,
            qualifier: LastSectionQualifier::SectionTransferWithoutDeact,
            checksum: 0xAB,
        });
        roundtrip(Element::AckFileOrSection {
            nof,
            nos: 2,
            qualifier: AckQualifier::NegAckSection,
            error: FileError::ChecksumFailed,
        });
        roundtrip(Element::Segment {
            nof,
            nos: 1,
            data: Bytes::from_static(b"hello"),
        });
        roundtrip(Element::Directory {
            nof,
            length: 4096,
            status: SOF_LFD | SOF_FA,
            time: Cp56Time2a::default(),
        });
    }

    #[test]
    fn test_qualifier_nibbles() {
        let mut buf = BytesMut::new();
        encode(
            &Element::AckFileOrSection {
                nof: NameOfFile(1),
                nos: 0,
                qualifier: AckQualifier::NegAckSection,
                error: FileError::ChecksumFailed,
            },
            &mut buf,
        );
        assert_eq!(buf[3], 0x24);
        assert_eq!(SelectAndCallQualifier::from_u8(0x0F), SelectAndCallQualifier::Default);
        assert_eq!(AckQualifier::from_u8(0x13), AckQualifier::PosAckSection);
    }

    #[test]
    fn test_segment_length_exceeds_payload() {
        let bytes = [0x01, 0x00, 0x01, 0x10, 0xAA];
        assert!(decode(TypeId::F_SG_NA_1, &bytes).is_err());
    }
}
