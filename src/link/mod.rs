//! IEC 60870-5-101 link layer.
//!
//! FT1.2 framing ([`Ft12Codec`]) and the link procedures of IEC 60870-5-2.
//! The procedures are sans-IO: frames go in, frames and events come out,
//! and timers are driven by the caller with explicit instants.
//!
//! Two axes combine into four roles:
//!
//! - **balanced**: both stations are primary and secondary at once
//! - **unbalanced**: the master is the only primary and polls its slaves
//!
//! A primary station initiates an exchange (reset, user data, class
//! request); a secondary station answers it.

mod ft12;
mod primary;
mod secondary;

use std::fmt;
use std::time::Duration;

use crate::error::{Iec60870Error, Result};

pub use ft12::{Ft12Codec, Ft12Frame};
pub(crate) use primary::{DataClass, LinkOutput, PrimaryEvent, PrimaryLink, UnbalancedPrimary, MAX_PENDING_USER_DATA};
pub(crate) use secondary::{SecondaryApplication, SecondaryLink};

/// Default time to wait for a confirmation before repeating a frame.
pub const DEFAULT_TIMEOUT_FOR_ACK: Duration = Duration::from_millis(1000);

/// Default time after which a repeated request is given up.
pub const DEFAULT_TIMEOUT_REPEAT: Duration = Duration::from_millis(1000);

/// Parameters of the FT1.2 link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkLayerParameters {
    /// Link address octets: 0 (balanced only), 1 or 2
    pub address_length: usize,
    /// Wait for ACK before repeating
    pub timeout_for_ack: Duration,
    /// Give up a request after this long
    pub timeout_repeat: Duration,
    /// Answer with `0xE5` instead of a fixed ACK frame
    pub use_single_char_ack: bool,
}

impl Default for LinkLayerParameters {
    fn default() -> Self {
        Self {
            address_length: 1,
            timeout_for_ack: DEFAULT_TIMEOUT_FOR_ACK,
            timeout_repeat: DEFAULT_TIMEOUT_REPEAT,
            use_single_char_ack: true,
        }
    }
}

impl LinkLayerParameters {
    pub fn address_length(mut self, length: usize) -> Self {
        self.address_length = length;
        self
    }

    pub fn timeout_for_ack(mut self, timeout: Duration) -> Self {
        self.timeout_for_ack = timeout;
        self
    }

    pub fn timeout_repeat(mut self, timeout: Duration) -> Self {
        self.timeout_repeat = timeout;
        self
    }

    pub fn use_single_char_ack(mut self, enabled: bool) -> Self {
        self.use_single_char_ack = enabled;
        self
    }

    /// Address reaching every slave: 255 or 65535.
    pub fn broadcast_address(&self) -> u16 {
        match self.address_length {
            1 => 0xFF,
            2 => 0xFFFF,
            _ => 0,
        }
    }

    /// Largest address that fits the configured field.
    pub fn max_address(&self) -> u16 {
        match self.address_length {
            0 => 0,
            1 => 0xFF,
            _ => 0xFFFF,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.address_length > 2 {
            return Err(Iec60870Error::invalid_parameter(format!(
                "link address length {} not in 0..=2",
                self.address_length
            )));
        }
        if self.timeout_for_ack.is_zero() {
            return Err(Iec60870Error::invalid_parameter("timeout for ACK must be non-zero"));
        }
        if self.timeout_repeat < self.timeout_for_ack {
            return Err(Iec60870Error::invalid_parameter(
                "repeat timeout must not be shorter than the ACK timeout",
            ));
        }
        Ok(())
    }
}

/// Transmission procedure of a serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkLayerMode {
    /// Point-to-point, both sides may initiate
    #[default]
    Balanced,
    /// Master polls one or more slaves
    Unbalanced,
}

/// State of the link towards one remote station, as seen by its primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LinkLayerState {
    #[default]
    Idle,
    /// No answer or an unexpected one; the link is re-established
    Error,
    /// The secondary signalled data flow control or NACK
    Busy,
    /// Reset done, user data can be exchanged
    Available,
}

impl fmt::Display for LinkLayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Error => "error",
            Self::Busy => "busy",
            Self::Available => "available",
        };
        f.write_str(name)
    }
}

macro_rules! function_codes {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl $name {
            pub const fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            #[inline]
            pub const fn as_u8(self) -> u8 {
                self as u8
            }
        }
    };
}

function_codes! {
    /// Function codes of frames sent by a primary station (PRM = 1).
    PrimaryFunction {
        ResetRemoteLink = 0,
        ResetUserProcess = 1,
        TestFunctionForLink = 2,
        UserDataConfirmed = 3,
        UserDataNoReply = 4,
        ResetFcb = 7,
        RequestForAccessDemand = 8,
        RequestLinkStatus = 9,
        RequestUserDataClass1 = 10,
        RequestUserDataClass2 = 11,
    }
}

function_codes! {
    /// Function codes of frames sent by a secondary station (PRM = 0).
    SecondaryFunction {
        Ack = 0,
        Nack = 1,
        RespUserData = 8,
        RespNackNoData = 9,
        StatusOfLinkOrAccessDemand = 11,
        LinkServiceNotFunctioning = 14,
        LinkServiceNotImplemented = 15,
    }
}

const DIR: u8 = 0x80;
const PRM: u8 = 0x40;
const FCB: u8 = 0x20;
const FCV: u8 = 0x10;

/// Link control field.
///
/// ```text
///  bit   7     6     5       4       3..0
///       DIR   PRM   FCB/ACD FCV/DFC  function
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Control(pub u8);

impl Control {
    pub const fn primary(function: PrimaryFunction, dir: bool, fcb: bool, fcv: bool) -> Self {
        let mut c = PRM | function.as_u8();
        if dir {
            c |= DIR;
        }
        if fcb {
            c |= FCB;
        }
        if fcv {
            c |= FCV;
        }
        Self(c)
    }

    pub const fn secondary(function: SecondaryFunction, dir: bool, acd: bool, dfc: bool) -> Self {
        let mut c = function.as_u8();
        if dir {
            c |= DIR;
        }
        if acd {
            c |= FCB;
        }
        if dfc {
            c |= FCV;
        }
        Self(c)
    }

    #[inline]
    pub const fn function_code(self) -> u8 {
        self.0 & 0x0F
    }

    #[inline]
    pub const fn dir(self) -> bool {
        self.0 & DIR != 0
    }

    #[inline]
    pub const fn prm(self) -> bool {
        self.0 & PRM != 0
    }

    #[inline]
    pub const fn fcb(self) -> bool {
        self.0 & FCB != 0
    }

    #[inline]
    pub const fn fcv(self) -> bool {
        self.0 & FCV != 0
    }

    /// Access demand: the secondary has class 1 data.
    #[inline]
    pub const fn acd(self) -> bool {
        self.fcb()
    }

    /// Data flow control: the secondary cannot take more user data.
    #[inline]
    pub const fn dfc(self) -> bool {
        self.fcv()
    }

    pub const fn primary_function(self) -> Option<PrimaryFunction> {
        PrimaryFunction::from_u8(self.function_code())
    }

    pub const fn secondary_function(self) -> Option<SecondaryFunction> {
        SecondaryFunction::from_u8(self.function_code())
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Control");
        s.field("dir", &self.dir());
        if self.prm() {
            s.field("fcb", &self.fcb()).field("fcv", &self.fcv());
            match self.primary_function() {
                Some(function) => s.field("function", &function),
                None => s.field("function", &self.function_code()),
            };
        } else {
            s.field("acd", &self.acd()).field("dfc", &self.dfc());
            match self.secondary_function() {
                Some(function) => s.field("function", &function),
                None => s.field("function", &self.function_code()),
            };
        }
        s.finish()
    }
}
