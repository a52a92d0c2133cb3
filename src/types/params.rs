//! Protocol parameters shared by codec and connection layers.

use std::time::Duration;

use crate::error::{Iec60870Error, Result};

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Default IEC 104 port when secured with TLS.
pub const DEFAULT_TLS_PORT: u16 = 19998;

/// Default T0 timeout (connection establishment) in seconds.
pub const DEFAULT_T0_TIMEOUT: u64 = 10;

/// Default T1 timeout (send confirmation) in seconds.
pub const DEFAULT_T1_TIMEOUT: u64 = 15;

/// Default T2 timeout (acknowledge received I-frames) in seconds.
pub const DEFAULT_T2_TIMEOUT: u64 = 10;

/// Default T3 timeout (idle test frame) in seconds.
pub const DEFAULT_T3_TIMEOUT: u64 = 20;

/// Default K parameter (max unconfirmed I-frames).
pub const DEFAULT_K: u16 = 12;

/// Default W parameter (max unconfirmed receives before sending S-frame).
pub const DEFAULT_W: u16 = 8;

/// Field widths of the application layer.
///
/// IEC 104 fixes COT=2, CA=2, IOA=3; IEC 101 leaves them to the
/// installation. Read-only once handed to a codec or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApplicationLayerParameters {
    /// Size of type identification (always 1)
    pub size_of_type_id: usize,
    /// Size of variable structure qualifier (always 1)
    pub size_of_vsq: usize,
    /// Size of cause of transmission: 1 or 2 (2 includes originator address)
    pub size_of_cot: usize,
    /// Originator address used for outgoing ASDUs (only with COT size 2)
    pub originator_address: u8,
    /// Size of common address: 1 or 2
    pub size_of_ca: usize,
    /// Size of information object address: 1, 2 or 3
    pub size_of_ioa: usize,
    /// Maximum encoded ASDU length
    pub max_asdu_length: usize,
}

impl Default for ApplicationLayerParameters {
    fn default() -> Self {
        Self::iec104()
    }
}

impl ApplicationLayerParameters {
    /// Fixed IEC 104 layout.
    pub const fn iec104() -> Self {
        Self {
            size_of_type_id: 1,
            size_of_vsq: 1,
            size_of_cot: 2,
            originator_address: 0,
            size_of_ca: 2,
            size_of_ioa: 3,
            max_asdu_length: 249,
        }
    }

    /// Common IEC 101 layout (COT=1, CA=1, IOA=2).
    pub const fn iec101() -> Self {
        Self {
            size_of_type_id: 1,
            size_of_vsq: 1,
            size_of_cot: 1,
            originator_address: 0,
            size_of_ca: 1,
            size_of_ioa: 2,
            max_asdu_length: 249,
        }
    }

    /// Set size of cause of transmission.
    pub fn size_of_cot(mut self, size: usize) -> Self {
        self.size_of_cot = size;
        self
    }

    /// Set originator address.
    pub fn originator_address(mut self, address: u8) -> Self {
        self.originator_address = address;
        self
    }

    /// Set size of common address.
    pub fn size_of_ca(mut self, size: usize) -> Self {
        self.size_of_ca = size;
        self
    }

    /// Set size of information object address.
    pub fn size_of_ioa(mut self, size: usize) -> Self {
        self.size_of_ioa = size;
        self
    }

    /// Set maximum ASDU length.
    pub fn max_asdu_length(mut self, length: usize) -> Self {
        self.max_asdu_length = length;
        self
    }

    /// Length of the ASDU header (type id, VSQ, COT, CA).
    #[inline]
    pub const fn header_len(&self) -> usize {
        self.size_of_type_id + self.size_of_vsq + self.size_of_cot + self.size_of_ca
    }

    /// Largest common address representable with the configured width.
    #[inline]
    pub const fn max_common_address(&self) -> u16 {
        if self.size_of_ca == 1 {
            0xFF
        } else {
            0xFFFF
        }
    }

    /// Check field widths.
    pub fn validate(&self) -> Result<()> {
        if self.size_of_type_id != 1 || self.size_of_vsq != 1 {
            return Err(Iec60870Error::invalid_parameter(
                "type id and VSQ size must be 1",
            ));
        }
        if !(1..=2).contains(&self.size_of_cot) {
            return Err(Iec60870Error::invalid_parameter("COT size must be 1 or 2"));
        }
        if !(1..=2).contains(&self.size_of_ca) {
            return Err(Iec60870Error::invalid_parameter("CA size must be 1 or 2"));
        }
        if !(1..=3).contains(&self.size_of_ioa) {
            return Err(Iec60870Error::invalid_parameter("IOA size must be 1..=3"));
        }
        if self.max_asdu_length < self.header_len() + self.size_of_ioa || self.max_asdu_length > 253
        {
            return Err(Iec60870Error::invalid_parameter(format!(
                "max ASDU length {} out of range",
                self.max_asdu_length
            )));
        }
        Ok(())
    }
}

/// APCI parameters of a CS104 connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ApciParameters {
    /// K: max unconfirmed sent I-frames
    pub k: u16,
    /// W: max unconfirmed received I-frames before an S-frame is forced
    pub w: u16,
    /// T0: connection establishment timeout
    pub t0: Duration,
    /// T1: timeout for confirmation of sent APDUs
    pub t1: Duration,
    /// T2: timeout for acknowledging received I-frames (T2 < T1)
    pub t2: Duration,
    /// T3: idle timeout before a test frame is sent
    pub t3: Duration,
}

impl Default for ApciParameters {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            w: DEFAULT_W,
            t0: Duration::from_secs(DEFAULT_T0_TIMEOUT),
            t1: Duration::from_secs(DEFAULT_T1_TIMEOUT),
            t2: Duration::from_secs(DEFAULT_T2_TIMEOUT),
            t3: Duration::from_secs(DEFAULT_T3_TIMEOUT),
        }
    }
}

impl ApciParameters {
    /// Set K.
    pub fn k(mut self, k: u16) -> Self {
        self.k = k;
        self
    }

    /// Set W.
    pub fn w(mut self, w: u16) -> Self {
        self.w = w;
        self
    }

    /// Set T0 timeout.
    pub fn t0(mut self, timeout: Duration) -> Self {
        self.t0 = timeout;
        self
    }

    /// Set T1 timeout.
    pub fn t1(mut self, timeout: Duration) -> Self {
        self.t1 = timeout;
        self
    }

    /// Set T2 timeout.
    pub fn t2(mut self, timeout: Duration) -> Self {
        self.t2 = timeout;
        self
    }

    /// Set T3 timeout.
    pub fn t3(mut self, timeout: Duration) -> Self {
        self.t3 = timeout;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 || self.k > 32767 {
            return Err(Iec60870Error::invalid_parameter("K must be 1..=32767"));
        }
        if self.w == 0 || self.w > self.k {
            return Err(Iec60870Error::invalid_parameter("W must be 1..=K"));
        }
        if [self.t0, self.t1, self.t2, self.t3].iter().any(Duration::is_zero) {
            return Err(Iec60870Error::invalid_parameter("timeouts must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_params_presets() {
        let p = ApplicationLayerParameters::iec104();
        assert_eq!(p.header_len(), 6);
        assert!(p.validate().is_ok());

        let p = ApplicationLayerParameters::iec101();
        assert_eq!(p.header_len(), 4);
        assert_eq!(p.max_common_address(), 0xFF);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_app_params_validate() {
        let p = ApplicationLayerParameters::iec104().size_of_ioa(4);
        assert!(p.validate().is_err());
        let p = ApplicationLayerParameters::iec104().size_of_cot(3);
        assert!(p.validate().is_err());
        let p = ApplicationLayerParameters::iec104().max_asdu_length(300);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_apci_defaults() {
        let p = ApciParameters::default();
        assert_eq!(p.k, 12);
        assert_eq!(p.w, 8);
        assert_eq!(p.t1, Duration::from_secs(15));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_apci_validate() {
        assert!(ApciParameters::default().w(13).validate().is_err());
        assert!(ApciParameters::default().k(0).validate().is_err());
        assert!(ApciParameters::default()
            .t3(Duration::ZERO)
            .validate()
            .is_err());
    }
}
