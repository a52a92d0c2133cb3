//! IEC 60870-5 wire-level type definitions.
//!
//! - `TypeId` - Type identification (M_SP_NA_1, etc.)
//! - `Cot` - Cause of transmission
//! - `Apci` - CS104 Application Protocol Control Information
//! - `Asdu` / `AsduBuilder` - Application Service Data Unit
//! - time formats, quality descriptors and value encodings
//! - `ApplicationLayerParameters` / `ApciParameters`

mod apci;
mod asdu;
mod cot;
mod params;
mod quality;
mod time;
mod type_id;
mod values;

pub use apci::*;
pub use asdu::*;
pub use cot::*;
pub use params::*;
pub use quality::*;
pub use time::*;
pub use type_id::*;
pub use values::*;
