//! ASDU (Application Service Data Unit).
//!
//! Outgoing ASDUs are assembled with [`AsduBuilder`]; received ASDUs are
//! [`Asdu`] views over the raw payload that decode information objects by
//! index on demand. Both share the [`AsduHeader`].

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Iec60870Error, Result};
use crate::object::{descriptor, supports_sequence, Element, InformationObject, TypeDescriptor};
use crate::types::{ApplicationLayerParameters, Cot, TypeId};

/// Maximum number of information objects in one ASDU.
pub const MAX_OBJECTS: u8 = 127;

/// Variable Structure Qualifier (VSQ).
///
/// Defines the structure of information objects in an ASDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Vsq {
    /// Number of information objects (0-127)
    pub count: u8,
    /// If true, addresses are sequential (SQ=1)
    pub sequence: bool,
}

impl Vsq {
    /// Create a new VSQ.
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self { count, sequence }
    }

    /// Parse VSQ from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & 0x7F,
            sequence: (value & 0x80) != 0,
        }
    }

    /// Encode VSQ to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.count & 0x7F) | if self.sequence { 0x80 } else { 0 }
    }
}

/// ASDU header (data unit identifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsduHeader {
    /// Type identification
    pub type_id: TypeId,
    /// Variable structure qualifier
    pub vsq: Vsq,
    /// Cause of transmission
    pub cot: Cot,
    /// Test flag (T)
    pub test: bool,
    /// Negative confirmation flag (P/N)
    pub negative: bool,
    /// Originator address (only on the wire when COT is 2 bytes)
    pub originator: u8,
    /// Common address of ASDU (station address)
    pub common_address: u16,
}

impl AsduHeader {
    /// Parse the header with the configured field widths.
    pub fn decode(data: &[u8], params: &ApplicationLayerParameters) -> Result<Self> {
        let len = params.header_len();
        if data.len() < len {
            return Err(Iec60870Error::invalid_asdu(format!(
                "ASDU header too short: {} < {}",
                data.len(),
                len
            )));
        }

        let cot_byte = data[2];
        let mut pos = 3;
        let originator = if params.size_of_cot == 2 {
            pos += 1;
            data[3]
        } else {
            0
        };
        let common_address = if params.size_of_ca == 2 {
            u16::from_le_bytes([data[pos], data[pos + 1]])
        } else {
            u16::from(data[pos])
        };

        Ok(Self {
            type_id: TypeId::from_u8(data[0]),
            vsq: Vsq::from_u8(data[1]),
            cot: Cot::from_u8(cot_byte),
            test: (cot_byte & 0x80) != 0,
            negative: (cot_byte & 0x40) != 0,
            originator,
            common_address,
        })
    }

    /// Encode the header with the configured field widths.
    pub fn encode(&self, buf: &mut BytesMut, params: &ApplicationLayerParameters) {
        buf.put_u8(self.type_id.as_u8());
        buf.put_u8(self.vsq.as_u8());

        let mut cot_byte = self.cot.as_u8();
        if self.test {
            cot_byte |= 0x80;
        }
        if self.negative {
            cot_byte |= 0x40;
        }
        buf.put_u8(cot_byte);
        if params.size_of_cot == 2 {
            buf.put_u8(self.originator);
        }
        if params.size_of_ca == 2 {
            buf.put_u16_le(self.common_address);
        } else {
            buf.put_u8(self.common_address as u8);
        }
    }
}

/// Layout of a non-standard (private range) type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrivateTypeInfo {
    /// Encoded element size without the IOA
    pub payload_size: usize,
    /// Whether SQ=1 encoding is allowed
    pub sequence: bool,
}

/// Registry of private type identifiers.
///
/// Elements of a registered type decode to [`Element::Private`] carrying the
/// raw payload; unregistered non-standard types fail with `UnknownTypeId`.
#[derive(Debug, Clone, Default)]
pub struct PrivateTypeRegistry {
    types: HashMap<TypeId, PrivateTypeInfo>,
}

impl PrivateTypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a private type. Standard identifiers cannot be overridden.
    pub fn register(&mut self, type_id: TypeId, info: PrivateTypeInfo) -> Result<()> {
        if type_id.is_standard() {
            return Err(Iec60870Error::invalid_parameter(format!(
                "{} is a standard type",
                type_id
            )));
        }
        self.types.insert(type_id, info);
        Ok(())
    }

    /// Look up a registered type.
    pub fn get(&self, type_id: TypeId) -> Option<&PrivateTypeInfo> {
        self.types.get(&type_id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Check if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// How elements of the ASDU type are laid out.
enum Layout {
    Standard(TypeDescriptor),
    Private(PrivateTypeInfo),
}

/// Received (or finished) ASDU: header plus raw information object bytes.
#[derive(Debug, Clone)]
pub struct Asdu {
    header: AsduHeader,
    payload: Bytes,
    params: ApplicationLayerParameters,
    registry: Option<Arc<PrivateTypeRegistry>>,
}

impl PartialEq for Asdu {
    fn eq(&self, other: &Self) -> bool {
        self.header == other.header && self.payload == other.payload
    }
}

impl Asdu {
    /// Decode an ASDU.
    ///
    /// Fails when the buffer is shorter than the header or than the declared
    /// number of elements of a known type. Unknown types still decode so the
    /// receiver can answer with `UNKNOWN_TYPE_ID`; [`Asdu::element`] then
    /// fails with `UnknownTypeId`.
    pub fn decode(
        data: Bytes,
        params: &ApplicationLayerParameters,
        registry: Option<Arc<PrivateTypeRegistry>>,
    ) -> Result<Self> {
        let header = AsduHeader::decode(&data, params)?;
        let payload = data.slice(params.header_len()..);
        let asdu = Self {
            header,
            payload,
            params: *params,
            registry,
        };
        asdu.check_length()?;
        Ok(asdu)
    }

    /// Convenience: single-object ASDU.
    pub fn with_object(
        params: &ApplicationLayerParameters,
        cot: Cot,
        common_address: u16,
        object: InformationObject,
    ) -> Result<Self> {
        let mut builder = AsduBuilder::new(params, cot, common_address);
        if !builder.add_information_object(&object) {
            return Err(Iec60870Error::invalid_asdu(format!(
                "{} at IOA {} does not fit",
                object.type_id(),
                object.ioa
            )));
        }
        builder.build()
    }

    fn layout(&self) -> Option<Layout> {
        if let Some(desc) = descriptor(self.header.type_id) {
            return Some(Layout::Standard(desc));
        }
        self.registry
            .as_ref()
            .and_then(|r| r.get(self.header.type_id).copied())
            .map(Layout::Private)
    }

    fn check_length(&self) -> Result<()> {
        let size = match self.layout() {
            Some(Layout::Standard(desc)) if !desc.variable => desc.size,
            Some(Layout::Private(info)) => info.payload_size,
            _ => return Ok(()),
        };
        let count = usize::from(self.header.vsq.count);
        let ioa = self.params.size_of_ioa;
        let needed = match (count, self.header.vsq.sequence) {
            (0, _) => 0,
            (_, true) => ioa + count * size,
            (_, false) => count * (ioa + size),
        };
        if self.payload.len() < needed {
            return Err(Iec60870Error::invalid_asdu(format!(
                "{}: {} elements need {} bytes, have {}",
                self.header.type_id,
                count,
                needed,
                self.payload.len()
            )));
        }
        Ok(())
    }

    fn read_ioa(&self, offset: usize) -> Result<u32> {
        let n = self.params.size_of_ioa;
        let bytes = self
            .payload
            .get(offset..offset + n)
            .ok_or_else(|| Iec60870Error::invalid_asdu("IOA beyond end of ASDU"))?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u32, |acc, b| (acc << 8) | u32::from(*b)))
    }

    /// Decode the information object at `index`.
    pub fn element(&self, index: usize) -> Result<InformationObject> {
        if index >= self.count() {
            return Err(Iec60870Error::invalid_asdu(format!(
                "element index {} out of range ({})",
                index,
                self.count()
            )));
        }
        let type_id = self.header.type_id;
        let ioa_len = self.params.size_of_ioa;
        let sequence = self.header.vsq.sequence;

        let (size, private) = match self.layout() {
            Some(Layout::Standard(desc)) if desc.variable => return self.variable_element(index),
            Some(Layout::Standard(desc)) => (desc.size, false),
            Some(Layout::Private(info)) => (info.payload_size, true),
            None => return Err(Iec60870Error::UnknownTypeId(type_id.as_u8())),
        };

        let (ioa, start) = if sequence {
            (self.read_ioa(0)? + index as u32, ioa_len + index * size)
        } else {
            let offset = index * (ioa_len + size);
            (self.read_ioa(offset)?, offset + ioa_len)
        };

        let element = if private {
            let bytes = self
                .payload
                .get(start..start + size)
                .ok_or_else(|| Iec60870Error::invalid_asdu("element beyond end of ASDU"))?;
            Element::Private {
                type_id,
                payload: self.payload.slice_ref(bytes),
            }
        } else {
            let bytes = self
                .payload
                .get(start..)
                .ok_or_else(|| Iec60870Error::invalid_asdu("element beyond end of ASDU"))?;
            Element::decode(type_id, bytes)?
        };
        Ok(InformationObject::new(ioa, element))
    }

    /// Walk variable-length elements (file segments) up to `index`.
    fn variable_element(&self, index: usize) -> Result<InformationObject> {
        let ioa_len = self.params.size_of_ioa;
        let mut offset = 0;
        for i in 0..=index {
            let ioa = self.read_ioa(offset)?;
            let start = offset + ioa_len;
            let bytes = self
                .payload
                .get(start..)
                .ok_or_else(|| Iec60870Error::invalid_asdu("element beyond end of ASDU"))?;
            let element = Element::decode(self.header.type_id, bytes)?;
            if i == index {
                return Ok(InformationObject::new(ioa, element));
            }
            offset = start + element.encoded_size();
        }
        Err(Iec60870Error::invalid_asdu("element index out of range"))
    }

    /// Decode all information objects.
    pub fn objects(&self) -> Result<Vec<InformationObject>> {
        (0..self.count()).map(|i| self.element(i)).collect()
    }

    /// ASDU header.
    #[inline]
    pub fn header(&self) -> &AsduHeader {
        &self.header
    }

    /// Type identification.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.header.type_id
    }

    /// Cause of transmission.
    #[inline]
    pub fn cot(&self) -> Cot {
        self.header.cot
    }

    /// Common address.
    #[inline]
    pub fn common_address(&self) -> u16 {
        self.header.common_address
    }

    /// Originator address.
    #[inline]
    pub fn originator(&self) -> u8 {
        self.header.originator
    }

    /// Number of information objects.
    #[inline]
    pub fn count(&self) -> usize {
        usize::from(self.header.vsq.count)
    }

    /// SQ flag.
    #[inline]
    pub fn is_sequence(&self) -> bool {
        self.header.vsq.sequence
    }

    /// Test flag.
    #[inline]
    pub fn is_test(&self) -> bool {
        self.header.test
    }

    /// Negative confirmation flag.
    #[inline]
    pub fn is_negative(&self) -> bool {
        self.header.negative
    }

    /// Raw information object bytes.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Parameters the ASDU was decoded or built with.
    #[inline]
    pub fn params(&self) -> &ApplicationLayerParameters {
        &self.params
    }

    /// Rewrite the cause of transmission.
    pub fn set_cot(&mut self, cot: Cot) {
        self.header.cot = cot;
    }

    /// Set or clear the negative flag.
    pub fn set_negative(&mut self, negative: bool) {
        self.header.negative = negative;
    }

    /// Set or clear the test flag.
    pub fn set_test(&mut self, test: bool) {
        self.header.test = test;
    }

    /// Copy of this ASDU with a new cause and negative flag, as used for
    /// confirmations that mirror the request.
    pub fn mirror(&self, cot: Cot, negative: bool) -> Self {
        let mut asdu = self.clone();
        asdu.header.cot = cot;
        asdu.header.negative = negative;
        asdu
    }

    /// Encoded length in bytes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.params.header_len() + self.payload.len()
    }

    /// Append the encoded ASDU to `buf`.
    pub fn encode_to(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        self.header.encode(buf, &self.params);
        buf.put_slice(&self.payload);
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf.freeze()
    }
}

impl std::fmt::Display for Asdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}{} CA={} n={}",
            self.header.type_id,
            self.header.cot,
            if self.header.negative { " NEG" } else { "" },
            self.header.common_address,
            self.header.vsq.count
        )
    }
}

/// Builder for outgoing ASDUs.
///
/// The type identifier is taken from the first added object; all further
/// objects must have the same type.
#[derive(Debug, Clone)]
pub struct AsduBuilder {
    params: ApplicationLayerParameters,
    header: AsduHeader,
    type_id: Option<TypeId>,
    first_ioa: u32,
    payload: BytesMut,
}

impl AsduBuilder {
    /// Start an ASDU.
    pub fn new(params: &ApplicationLayerParameters, cot: Cot, common_address: u16) -> Self {
        Self {
            params: *params,
            header: AsduHeader {
                type_id: TypeId(0),
                vsq: Vsq::default(),
                cot,
                test: false,
                negative: false,
                originator: params.originator_address,
                common_address,
            },
            type_id: None,
            first_ioa: 0,
            payload: BytesMut::new(),
        }
    }

    /// Use SQ=1 (consecutive addresses, IOA sent once).
    pub fn sequence(mut self, sequence: bool) -> Self {
        self.header.vsq.sequence = sequence;
        self
    }

    /// Set the test flag.
    pub fn test(mut self, test: bool) -> Self {
        self.header.test = test;
        self
    }

    /// Set the negative flag.
    pub fn negative(mut self, negative: bool) -> Self {
        self.header.negative = negative;
        self
    }

    /// Override the originator address.
    pub fn originator(mut self, originator: u8) -> Self {
        self.header.originator = originator;
        self
    }

    /// Number of objects added so far.
    pub fn count(&self) -> usize {
        usize::from(self.header.vsq.count)
    }

    fn max_ioa(&self) -> u32 {
        match self.params.size_of_ioa {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0xFF_FFFF,
        }
    }

    /// Append an information object.
    ///
    /// Returns `false` (and leaves the builder unchanged) when the object
    /// does not fit into the remaining space, has a different type than the
    /// objects already added, or breaks the consecutive addressing of a
    /// sequence ASDU.
    pub fn add_information_object(&mut self, object: &InformationObject) -> bool {
        let type_id = object.type_id();
        let count = self.header.vsq.count;
        if count >= MAX_OBJECTS || object.ioa > self.max_ioa() {
            return false;
        }
        if let Some(existing) = self.type_id {
            if existing != type_id {
                return false;
            }
        }

        let sequence = self.header.vsq.sequence;
        if sequence {
            if !supports_sequence(type_id) {
                return false;
            }
            if count > 0 && object.ioa != self.first_ioa.wrapping_add(u32::from(count)) {
                return false;
            }
        }

        let ioa_len = if sequence && count > 0 {
            0
        } else {
            self.params.size_of_ioa
        };
        let size = ioa_len + object.element.encoded_size();
        if self.params.header_len() + self.payload.len() + size > self.params.max_asdu_length {
            return false;
        }

        if ioa_len > 0 {
            let bytes = object.ioa.to_le_bytes();
            self.payload.put_slice(&bytes[..ioa_len]);
        }
        object.element.encode(&mut self.payload);

        if count == 0 {
            self.type_id = Some(type_id);
            self.header.type_id = type_id;
            self.first_ioa = object.ioa;
        }
        self.header.vsq.count = count + 1;
        true
    }

    /// Finish the ASDU.
    pub fn build(self) -> Result<Asdu> {
        if self.type_id.is_none() {
            return Err(Iec60870Error::invalid_asdu("ASDU without information objects"));
        }
        Ok(Asdu {
            header: self.header,
            payload: self.payload.freeze(),
            params: self.params,
            registry: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cp56Time2a, QualityDescriptor};

    fn sp(ioa: u32, value: bool) -> InformationObject {
        InformationObject::new(ioa, Element::single_point(value, QualityDescriptor::GOOD))
    }

    #[test]
    fn test_vsq() {
        assert_eq!(Vsq::new(10, false).as_u8(), 10);
        assert_eq!(Vsq::new(10, true).as_u8(), 0x8A);

        let vsq = Vsq::from_u8(0x8A);
        assert_eq!(vsq.count, 10);
        assert!(vsq.sequence);
    }

    #[test]
    fn test_interrogation_wire_bytes() {
        let params = ApplicationLayerParameters::iec104();
        let asdu = Asdu::with_object(
            &params,
            Cot::Activation,
            1,
            InformationObject::new(0, Element::Interrogation { qoi: 20 }),
        )
        .unwrap();
        assert_eq!(
            &asdu.to_bytes()[..],
            &[0x64, 0x01, 0x06, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x14]
        );
    }

    #[test]
    fn test_header_field_widths() {
        let params = ApplicationLayerParameters::iec101();
        let asdu = Asdu::with_object(&params, Cot::Spontaneous, 0x12, sp(0x0304, true)).unwrap();
        let bytes = asdu.to_bytes();
        assert_eq!(&bytes[..], &[0x01, 0x01, 0x03, 0x12, 0x04, 0x03, 0x01]);

        let decoded = Asdu::decode(bytes, &params, None).unwrap();
        assert_eq!(decoded, asdu);
        assert_eq!(decoded.element(0).unwrap(), sp(0x0304, true));
    }

    #[test]
    fn test_header_flags_and_originator() {
        let params = ApplicationLayerParameters::iec104().originator_address(7);
        let asdu = AsduBuilder::new(&params, Cot::ActivationConfirm, 0xABCD);
        let mut asdu = asdu.test(true).negative(true);
        assert!(asdu.add_information_object(&InformationObject::new(0, Element::Read)));
        let asdu = asdu.build().unwrap();
        let bytes = asdu.to_bytes();
        assert_eq!(&bytes[..6], &[102, 0x01, 0xC7, 0x07, 0xCD, 0xAB]);

        let decoded = Asdu::decode(bytes, &params, None).unwrap();
        assert!(decoded.is_test());
        assert!(decoded.is_negative());
        assert_eq!(decoded.originator(), 7);
        assert_eq!(decoded.cot(), Cot::ActivationConfirm);
    }

    #[test]
    fn test_add_rejects_type_mismatch() {
        let params = ApplicationLayerParameters::iec104();
        let mut builder = AsduBuilder::new(&params, Cot::Spontaneous, 1);
        assert!(builder.add_information_object(&sp(1, true)));
        let float = InformationObject::new(2, Element::measured_float(1.0, QualityDescriptor::GOOD));
        assert!(!builder.add_information_object(&float));
        assert_eq!(builder.count(), 1);
    }

    #[test]
    fn test_sequence_mode_addresses() {
        let params = ApplicationLayerParameters::iec104();
        let mut builder = AsduBuilder::new(&params, Cot::InterrogatedByStation, 1).sequence(true);
        assert!(builder.add_information_object(&sp(100, true)));
        assert!(builder.add_information_object(&sp(101, false)));
        assert!(!builder.add_information_object(&sp(103, true)));
        assert!(builder.add_information_object(&sp(102, true)));
        let asdu = builder.build().unwrap();
        // header + one IOA + three SIQ bytes
        assert_eq!(asdu.encoded_len(), 6 + 3 + 3);

        let decoded = Asdu::decode(asdu.to_bytes(), &params, None).unwrap();
        let objects = decoded.objects().unwrap();
        assert_eq!(objects, vec![sp(100, true), sp(101, false), sp(102, true)]);
    }

    #[test]
    fn test_sequence_rejected_for_timed_types() {
        let params = ApplicationLayerParameters::iec104();
        let mut builder = AsduBuilder::new(&params, Cot::Spontaneous, 1).sequence(true);
        let timed = InformationObject::new(
            1,
            Element::SinglePoint {
                value: true,
                quality: QualityDescriptor::GOOD,
                time: Some(Cp56Time2a::default().into()),
            },
        );
        assert!(!builder.add_information_object(&timed));
    }

    #[test]
    fn test_add_stops_at_max_length() {
        let params = ApplicationLayerParameters::iec104();
        let mut builder = AsduBuilder::new(&params, Cot::Spontaneous, 1);
        let mut added = 0;
        while builder.add_information_object(&InformationObject::new(
            added,
            Element::measured_float(0.0, QualityDescriptor::GOOD),
        )) {
            added += 1;
        }
        // (249 - 6) / (3 + 5)
        assert_eq!(added, 30);
        assert!(builder.build().unwrap().encoded_len() <= params.max_asdu_length);
    }

    #[test]
    fn test_add_stops_at_127_objects() {
        let params = ApplicationLayerParameters::iec104();
        let mut builder = AsduBuilder::new(&params, Cot::Spontaneous, 1).sequence(true);
        for ioa in 0..127 {
            assert!(builder.add_information_object(&sp(ioa, true)));
        }
        assert!(!builder.add_information_object(&sp(127, true)));
    }

    #[test]
    fn test_decode_truncated() {
        let params = ApplicationLayerParameters::iec104();
        assert!(Asdu::decode(Bytes::from_static(&[0x01, 0x01, 0x03]), &params, None).is_err());
        // declares 2 objects, carries one
        let bytes = Bytes::from_static(&[0x01, 0x02, 0x03, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x01]);
        assert!(Asdu::decode(bytes, &params, None).is_err());
    }

    #[test]
    fn test_unknown_type_decodes_header_only() {
        let params = ApplicationLayerParameters::iec104();
        let bytes = Bytes::from_static(&[200, 0x01, 0x06, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0xAA]);
        let asdu = Asdu::decode(bytes.clone(), &params, None).unwrap();
        assert_eq!(asdu.type_id(), TypeId(200));
        assert!(matches!(asdu.element(0), Err(Iec60870Error::UnknownTypeId(200))));

        let mut registry = PrivateTypeRegistry::new();
        registry
            .register(
                TypeId(200),
                PrivateTypeInfo {
                    payload_size: 1,
                    sequence: false,
                },
            )
            .unwrap();
        let asdu = Asdu::decode(bytes, &params, Some(Arc::new(registry))).unwrap();
        let io = asdu.element(0).unwrap();
        assert_eq!(io.ioa, 1);
        assert_eq!(
            io.element,
            Element::Private {
                type_id: TypeId(200),
                payload: Bytes::from_static(&[0xAA]),
            }
        );
    }

    #[test]
    fn test_registry_rejects_standard_type() {
        let mut registry = PrivateTypeRegistry::new();
        let info = PrivateTypeInfo {
            payload_size: 1,
            sequence: false,
        };
        assert!(registry.register(TypeId::M_SP_NA_1, info).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_segment_element() {
        let params = ApplicationLayerParameters::iec104();
        let segment = InformationObject::new(
            5,
            Element::Segment {
                nof: crate::object::NameOfFile::TRANSPARENT_FILE,
                nos: 1,
                data: Bytes::from_static(&[1, 2, 3, 4]),
            },
        );
        let asdu = Asdu::with_object(&params, Cot::FileTransfer, 1, segment.clone()).unwrap();
        let decoded = Asdu::decode(asdu.to_bytes(), &params, None).unwrap();
        assert_eq!(decoded.element(0).unwrap(), segment);
    }

    #[test]
    fn test_mirror() {
        let params = ApplicationLayerParameters::iec104();
        let asdu = Asdu::with_object(
            &params,
            Cot::Activation,
            3,
            InformationObject::new(0, Element::Interrogation { qoi: 20 }),
        )
        .unwrap();
        let con = asdu.mirror(Cot::ActivationConfirm, true);
        assert_eq!(con.cot(), Cot::ActivationConfirm);
        assert!(con.is_negative());
        assert_eq!(con.payload(), asdu.payload());
        assert_eq!(con.to_string(), "C_IC_NA_1 ACTIVATION_CON NEG CA=3 n=1");
    }
}
