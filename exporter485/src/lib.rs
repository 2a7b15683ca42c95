//! Polls RS-485 devices over Modbus RTU and renders the readings as plain-text
//! metrics, using [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Device classes loaded from YAML, each a named list of metrics
//! * Holding and input register reads over Modbus RTU
//! * The TBB inverter framed sub-protocol, with fields read at byte offsets
//! * Panic-free parsing with CRC-16/MODBUS validation
//! * Atomic collections: every metric decodes or the whole collection fails
//! * A simulation mode that never touches a serial port
//!
//! # Supported encodings
//!
//! * int16, uint16, int32, uint32
//! * float16 and float32, which are signed integer readings exposed as floats
//!
//! # Example
//!
//! Poll one device class from unit 1 and print the exposition
//!
//! ```no_run
//!use exporter485::*;
//!
//!#[tokio::main]
//!async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!    let modules = Modules::load("config.yaml")?;
//!    let link = RtuLink::open(
//!        "/dev/ttyUSB0",
//!        SerialSettings::default(),
//!        Timeouts::default(),
//!        PhysDecodeLevel::Nothing,
//!    )?;
//!    let mut collector = Collector::new(link);
//!
//!    let class = modules.get("sdm120").ok_or("unknown module")?;
//!    let values = collector.collect(class, UnitId::new(1)).await?;
//!    print!("{}", render(class, &values));
//!    Ok(())
//!}
//! ```

/// CRC-16/MODBUS checksum
pub mod checksum;
/// device class configuration
pub mod config;
/// TBB inverter vendor frames
pub mod frame;

mod collect;
mod decode;
mod error;
mod exception;
mod link;
mod render;
mod serial;
mod types;

pub use crate::collect::*;
pub use crate::config::{DeviceClass, InputType, MetricDescriptor, MetricType, Modules, Protocol};
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::link::*;
pub use crate::render::*;
pub use crate::serial::rtu::RtuLink;
pub use crate::serial::*;
pub use crate::types::*;
