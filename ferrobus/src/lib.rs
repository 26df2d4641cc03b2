//! An implementation of the [Modbus](http://modbus.org/) protocol using
//! [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Panic-free parsing, every malformed frame or PDU is a typed error
//! * Master with per-attempt response timeout, retries and transaction id matching
//! * Slave that runs one task per connection over a shared, observable [`DataStore`]
//! * Configurable logging of the application, frame and physical layers via `tracing`
//!
//! # Supported modes
//!
//! * TCP master and slave (MBAP encapsulation)
//! * RTU and ASCII master and slave over any byte stream, e.g. a serial port adapter
//!
//! # Supported Functions
//!
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//! * Write Multiple Coils
//! * Write Multiple Registers
//! * Read/Write Multiple Registers
//!
//! # Example
//!
//! A master that polls some holding registers
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ferrobus::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let master = Master::connect_tcp(
//!         "127.0.0.1:502".parse()?,
//!         UnitId::new(1),
//!         MasterSettings::default().response_timeout(Duration::from_millis(500)),
//!     )
//!     .await?;
//!
//!     loop {
//!         match master.read_holding_registers(AddressRange::try_from(0, 5)?).await {
//!             Ok(values) => {
//!                 for x in values {
//!                     println!("index: {} value: {}", x.index, x.value)
//!                 }
//!             }
//!             Err(err) => println!("error: {err}"),
//!         }
//!
//!         tokio::time::sleep(Duration::from_secs(3)).await
//!     }
//! }
//! ```

pub use crate::client::*;
pub use crate::common::phys::AsyncStream;
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::serial::SerialMode;
pub use crate::server::*;
pub use crate::types::*;

pub mod pdu;

mod client;
mod common;
mod constants;
mod decode;
mod error;
mod exception;
mod serial;
mod server;
mod tcp;
mod types;
