//! Device class definitions loaded from YAML
//!
//! ```yaml
//! modules:
//!   - name: sdm120
//!     metrics:
//!       - name: voltage
//!         metricType: gauge
//!         inputType: inputRegister
//!         dataType: float32
//!         address: 0
//!         factor: 0.1
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::checksum::CRC_LENGTH;
use crate::decode::{Encoding, WordOrder};
use crate::error::ConfigError;
use crate::types::AddressRange;

/// Smallest vendor frame that can hold a byte of payload and its CRC
const MIN_FRAME_LENGTH: usize = CRC_LENGTH + 1;

/// Width in bytes of a field read from a vendor frame
const PAYLOAD_FIELD_WIDTH: usize = 2;

/// Registry of every device class known to the process
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Modules {
    /// device classes in file order
    pub modules: Vec<DeviceClass>,
}

impl Modules {
    /// Read and parse a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let modules: Modules =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        modules.check_unique_names()?;
        Ok(modules)
    }

    /// Parse a configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let modules: Modules = serde_yaml::from_str(text).map_err(ConfigError::Syntax)?;
        modules.check_unique_names()?;
        Ok(modules)
    }

    /// Render the configuration back to YAML
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(ConfigError::Serialize)
    }

    /// Look up a device class by name
    pub fn get(&self, name: &str) -> Option<&DeviceClass> {
        self.modules.iter().find(|x| x.name == name)
    }

    /// Validate every device class, returning the first failure
    pub fn check(&self) -> Result<(), ConfigError> {
        self.modules.iter().try_for_each(DeviceClass::check)
    }

    fn check_unique_names(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for module in &self.modules {
            if !seen.insert(module.name.as_str()) {
                return Err(ConfigError::DuplicateModule(module.name.clone()));
            }
        }
        Ok(())
    }
}

/// Protocol family a device class is polled with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Protocol {
    /// one Modbus RTU register read per metric
    #[default]
    Modbus,
    /// one vendor frame per collection, metrics read at byte offsets
    TbbInverter,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Modbus => f.write_str("modbus"),
            Protocol::TbbInverter => f.write_str("tbbInverter"),
        }
    }
}

/// Where the raw words of a metric come from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputType {
    /// Modbus holding register table
    HoldingRegister,
    /// Modbus input register table
    InputRegister,
    /// byte offset into the vendor frame
    PayloadOffset,
}

impl std::fmt::Display for InputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputType::HoldingRegister => f.write_str("holdingRegister"),
            InputType::InputRegister => f.write_str("inputRegister"),
            InputType::PayloadOffset => f.write_str("payloadOffset"),
        }
    }
}

/// Exposition type of a metric
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    /// no declared semantics
    Untyped,
    /// monotonically increasing value
    Counter,
    /// value that goes up and down
    Gauge,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricType::Untyped => f.write_str("untyped"),
            MetricType::Counter => f.write_str("counter"),
            MetricType::Gauge => f.write_str("gauge"),
        }
    }
}

/// A named, ordered list of metrics polled together
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceClass {
    /// name used in the `module` selector and as the exposition prefix
    pub name: String,
    /// protocol family
    #[serde(default)]
    pub protocol: Protocol,
    /// total vendor frame length including the CRC trailer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_length: Option<usize>,
    /// metrics in collection order
    pub metrics: Vec<MetricDescriptor>,
}

impl DeviceClass {
    /// Verify the class can be collected with its protocol family
    pub fn check(&self) -> Result<(), ConfigError> {
        let frame_length = match self.protocol {
            Protocol::Modbus => None,
            Protocol::TbbInverter => Some(self.checked_frame_length()?),
        };

        for metric in &self.metrics {
            metric.check(self.protocol, frame_length)?;
        }

        Ok(())
    }

    fn checked_frame_length(&self) -> Result<usize, ConfigError> {
        let length = self
            .frame_length
            .ok_or_else(|| ConfigError::MissingFrameLength {
                module: self.name.clone(),
                protocol: self.protocol,
            })?;

        if length < MIN_FRAME_LENGTH {
            return Err(ConfigError::FrameTooShort {
                module: self.name.clone(),
                length,
            });
        }

        Ok(length)
    }
}

/// Static description of one metric
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDescriptor {
    /// metric name, prefixed with the class name when rendered
    pub name: String,
    /// optional help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    /// exposition type
    pub metric_type: MetricType,
    /// source of the raw words
    pub input_type: InputType,
    /// encoding of the raw words
    pub data_type: Encoding,
    /// word order of 32-bit encodings
    #[serde(default)]
    pub word_order: WordOrder,
    /// register address or byte offset, depending on `input_type`
    pub address: u16,
    /// optional multiplier, zero means unscaled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f32>,
}

impl MetricDescriptor {
    /// Register range covered by a register sourced metric
    pub fn register_range(&self) -> Result<AddressRange, ConfigError> {
        AddressRange::try_from(self.address, self.data_type.word_count()).map_err(|source| {
            ConfigError::AddressOverflow {
                metric: self.name.clone(),
                source,
            }
        })
    }

    fn check(&self, protocol: Protocol, frame_length: Option<usize>) -> Result<(), ConfigError> {
        match (protocol, self.input_type, frame_length) {
            (Protocol::Modbus, InputType::HoldingRegister | InputType::InputRegister, _) => {
                self.register_range().map(|_| ())
            }
            (Protocol::TbbInverter, InputType::PayloadOffset, Some(length)) => {
                self.check_payload_offset(length)
            }
            _ => Err(ConfigError::UnsupportedSource {
                metric: self.name.clone(),
                input: self.input_type,
                protocol,
            }),
        }
    }

    fn check_payload_offset(&self, frame_length: usize) -> Result<(), ConfigError> {
        if !self.data_type.is_16_bit() {
            return Err(ConfigError::UnsupportedEncoding {
                metric: self.name.clone(),
                encoding: self.data_type,
                input: self.input_type,
            });
        }

        // the field must end before the CRC trailer
        let end = usize::from(self.address) + PAYLOAD_FIELD_WIDTH;
        if end > frame_length - CRC_LENGTH {
            return Err(ConfigError::OffsetOutOfRange {
                metric: self.name.clone(),
                offset: self.address,
                frame_length,
            });
        }

        Ok(())
    }
}
