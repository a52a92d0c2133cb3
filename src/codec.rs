//! IEC 60870-5-104 codec for tokio.
//!
//! This module provides a codec implementation for encoding and decoding
//! IEC 104 APDUs using the tokio-util codec framework.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Iec60870Error;
use crate::types::{
    Apci, ApplicationLayerParameters, Asdu, PrivateTypeRegistry, UFunction, MAX_APDU_LENGTH,
    MIN_APDU_LENGTH, START_BYTE,
};

/// An IEC 104 APDU (Application Protocol Data Unit).
///
/// Contains the APCI header and optionally an ASDU (for I-frames).
#[derive(Debug, Clone, PartialEq)]
pub struct Apdu {
    /// APCI (Application Protocol Control Information)
    pub apci: Apci,
    /// ASDU (Application Service Data Unit) - only present in I-frames
    pub asdu: Option<Asdu>,
}

impl Apdu {
    /// Create a new I-frame APDU with ASDU.
    pub fn i_frame(send_seq: u16, recv_seq: u16, asdu: Asdu) -> Self {
        Self {
            apci: Apci::i_frame(send_seq, recv_seq),
            asdu: Some(asdu),
        }
    }

    /// Create a new S-frame APDU.
    pub fn s_frame(recv_seq: u16) -> Self {
        Self {
            apci: Apci::s_frame(recv_seq),
            asdu: None,
        }
    }

    /// Create a new U-frame APDU.
    pub fn u_frame(function: UFunction) -> Self {
        Self {
            apci: Apci::u_frame(function),
            asdu: None,
        }
    }

    /// Check if this is an I-frame.
    pub fn is_i_frame(&self) -> bool {
        self.apci.is_i_frame()
    }

    /// Check if this is an S-frame.
    pub fn is_s_frame(&self) -> bool {
        self.apci.is_s_frame()
    }

    /// Check if this is a U-frame.
    pub fn is_u_frame(&self) -> bool {
        self.apci.is_u_frame()
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if let Some(asdu) = &self.asdu {
            write!(f, " [{}]", asdu)?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 codec.
///
/// Frames APDUs and decodes the ASDU of I-frames with the configured
/// application layer parameters. Bytes in front of a start byte are skipped;
/// an I-frame whose ASDU cannot be decoded is a decode error, which ends the
/// connection.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use voltage_iec60870::codec::Iec104Codec;
///
/// let stream = TcpStream::connect("192.168.1.100:2404").await?;
/// let mut framed = Framed::new(stream, Iec104Codec::default());
///
/// // Send U-frame
/// framed.send(Apdu::u_frame(UFunction::StartDtAct)).await?;
///
/// // Receive response
/// while let Some(apdu) = framed.next().await {
///     println!("Received: {}", apdu?);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Iec104Codec {
    params: ApplicationLayerParameters,
    registry: Option<Arc<PrivateTypeRegistry>>,
    // State for handling partial frames
    state: DecodeState,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::enum_variant_names)]
enum DecodeState {
    #[default]
    WaitingForStart,
    WaitingForLength,
    WaitingForData {
        length: usize,
    },
}

impl Iec104Codec {
    /// Create a codec for the given application layer parameters.
    pub fn new(params: ApplicationLayerParameters) -> Self {
        Self {
            params,
            registry: None,
            state: DecodeState::WaitingForStart,
        }
    }

    /// Decode registered private types.
    pub fn with_registry(mut self, registry: Option<Arc<PrivateTypeRegistry>>) -> Self {
        self.registry = registry;
        self
    }
}

impl Decoder for Iec104Codec {
    type Item = Apdu;
    type Error = Iec60870Error;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        loop {
            match &self.state {
                DecodeState::WaitingForStart => {
                    if src.is_empty() {
                        return Ok(None);
                    }

                    // Skip bytes until we find the start byte
                    let skip = src.iter().position(|b| *b == START_BYTE).unwrap_or(src.len());
                    if skip > 0 {
                        tracing::trace!(skipped = skip, "discarding bytes before start byte");
                        src.advance(skip);
                    }

                    if src.is_empty() {
                        return Ok(None);
                    }

                    self.state = DecodeState::WaitingForLength;
                }

                DecodeState::WaitingForLength => {
                    // Need at least 2 bytes (start + length)
                    if src.len() < 2 {
                        return Ok(None);
                    }

                    let length = src[1] as usize;

                    if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
                        // Invalid length, skip start byte and restart
                        tracing::trace!(length, "invalid APDU length");
                        src.advance(1);
                        self.state = DecodeState::WaitingForStart;
                        continue;
                    }

                    self.state = DecodeState::WaitingForData { length };
                }

                DecodeState::WaitingForData { length } => {
                    let total_length = 2 + length; // start + length byte + APDU content

                    if src.len() < total_length {
                        src.reserve(total_length - src.len());
                        return Ok(None);
                    }

                    // We have a complete frame
                    let frame = src.split_to(total_length).freeze();
                    self.state = DecodeState::WaitingForStart;

                    // [0x68] [length] [control1..4] [ASDU...]
                    let apci = Apci::parse(&frame[2..6])?;

                    let asdu = match apci {
                        Apci::IFrame { .. } => {
                            if frame.len() <= 6 {
                                return Err(Iec60870Error::invalid_frame("I-frame without ASDU"));
                            }
                            Some(Asdu::decode(
                                frame.slice(6..),
                                &self.params,
                                self.registry.clone(),
                            )?)
                        }
                        _ => None,
                    };

                    return Ok(Some(Apdu { apci, asdu }));
                }
            }
        }
    }
}

impl Encoder<Apdu> for Iec104Codec {
    type Error = Iec60870Error;

    fn encode(&mut self, item: Apdu, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        // Calculate ASDU length without encoding yet
        let asdu_len = item.asdu.as_ref().map_or(0, Asdu::encoded_len);

        if asdu_len > MAX_APDU_LENGTH - MIN_APDU_LENGTH {
            return Err(Iec60870Error::Codec(format!("ASDU too large: {}", asdu_len)));
        }

        // Reserve capacity for the entire frame
        dst.reserve(6 + asdu_len);
        dst.extend_from_slice(&item.apci.encode_header(asdu_len));

        if let Some(asdu) = &item.asdu {
            asdu.encode_to(dst);
        }

        Ok(())
    }
}
