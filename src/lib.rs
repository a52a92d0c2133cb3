//! # voltage_iec60870
//!
//! IEC 60870-5-101 and IEC 60870-5-104 protocol implementation for Rust.
//!
//! The crate covers the application layer shared by both companion
//! standards (ASDUs, information objects, time tags, file transfer) and
//! the two transports:
//!
//! - **CS104**: APCI over TCP, with a master ([`Iec104Client`]) and a slave
//!   ([`Iec104Server`]) supporting redundancy groups
//! - **CS101**: FT1.2 framing over a serial line, with balanced and
//!   unbalanced link procedures ([`Cs101Master`], [`Cs101Slave`])
//!
//! Protocol state machines are sans-IO; the async tasks in [`connection`]
//! and [`cs101`] only move bytes and run timers.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_iec60870::{Asdu, ClientConfig, Cot, Handling, Iec104Client};
//!
//! #[tokio::main]
//! async fn main() -> voltage_iec60870::Result<()> {
//!     let config = ClientConfig::new("192.168.1.100:2404");
//!     let mut client = Iec104Client::new(config, |ca: u16, asdu: &Asdu| {
//!         println!("CA {ca}: {asdu:?}");
//!         Handling::Handled
//!     });
//!
//!     client.connect().await?;
//!     client.start_dt().await?;
//!     client.interrogation(Cot::Activation, 1, 20).await?;
//!
//!     let mut events = client.subscribe().expect("first subscriber");
//!     while let Some(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Frame Overview
//!
//! ```text
//! CS104 APCI (6 bytes):
//! +--------+--------+--------+--------+--------+--------+
//! | 0x68   | Length | Control Field (4 bytes)           |
//! +--------+--------+--------+--------+--------+--------+
//!
//! CS101 FT1.2 variable frame:
//! +------+---+---+------+---------+---------+------+----+------+
//! | 0x68 | L | L | 0x68 | Control | Address | ASDU | CS | 0x16 |
//! +------+---+---+------+---------+---------+------+----+------+
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod client;
pub mod codec;
pub mod connection;
pub mod cs101;
pub mod error;
pub mod file;
pub mod handler;
pub mod link;
pub mod object;
pub mod queue;
pub mod server;
pub mod session;
pub mod types;
pub mod window;

// Re-export main types
pub use client::{ClientConfig, ConnectionEvent, Iec104Client};
pub use codec::{Apdu, Iec104Codec};
pub use connection::ConnectionId;
pub use cs101::{Cs101Event, Cs101Master, Cs101MasterConfig, Cs101Slave, Cs101SlaveConfig};
pub use error::{Iec60870Error, Result};
pub use file::{AvailableFiles, FileErrorCode, FileProvider, FileReadyHandler, FileReceiver, TransparentFile};
pub use handler::{
    AsduHandler, ConnectionRequestHandler, Handling, MasterConnection, ServerHandler,
    SystemCommandOptions,
};
pub use link::{Ft12Codec, Ft12Frame, LinkLayerMode, LinkLayerParameters, LinkLayerState};
pub use object::{Element, InformationObject};
pub use queue::EnqueueMode;
pub use server::{Iec104Server, RedundancyGroup, ServerConfig, ServerEvent, ServerHandlers, ServerMode};
pub use session::ConnectionStatistics;
pub use types::*;
