use std::path::PathBuf;

use crate::config::{InputType, Protocol};
use crate::decode::Encoding;
use crate::exception::ExceptionCode;

/// Errors that result from an invalid address range
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRange {
    /// Count is zero
    #[error("range contains count == 0")]
    CountOfZero,
    /// Start and count would overflow the u16 address space
    #[error("start == {0} and count = {1} would overflow the representation of u16")]
    AddressOverflow(u16, u16),
    /// Count exceeds what a single request may carry
    #[error("the request count of {0} exceeds maximum allowed count of {1} for this type")]
    CountTooLargeForType(u16, u16),
}

/// Errors that occur while parsing an RTU response off the serial line
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameParseError {
    /// Response ended before all of its fields could be read
    #[error("response is too short to be valid")]
    Truncated,
    /// Received CRC did not match the calculated one
    #[error("received crc {received:#06X} but calculated {calculated:#06X}")]
    CrcMismatch {
        /// CRC found in the frame trailer
        received: u16,
        /// CRC calculated over the frame
        calculated: u16,
    },
    /// Response came from a unit other than the one addressed
    #[error("response from unit {received:#04X} while addressing {expected:#04X}")]
    UnexpectedUnit {
        /// addressed unit
        expected: u8,
        /// unit in the response
        received: u8,
    },
    /// Response function code does not belong to the request
    #[error("received function code {received:#04X} in response to {expected:#04X}")]
    UnexpectedFunction {
        /// function code of the request
        expected: u8,
        /// function code in the response
        received: u8,
    },
    /// Byte count doesn't match the number of requested registers
    #[error("byte count ({received}) doesn't match what is expected based on request ({expected})")]
    ByteCountMismatch {
        /// bytes implied by the request
        expected: usize,
        /// byte count in the response
        received: usize,
    },
}

/// Errors raised by the serial link
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The underlying stream failed
    #[error("I/O error: {0}")]
    Io(std::io::ErrorKind),
    /// No data arrived within the response or inter-byte timeout
    #[error("timeout after receiving {received} of {expected} bytes")]
    Timeout {
        /// bytes received before the timeout
        received: usize,
        /// bytes that were expected
        expected: usize,
    },
    /// The stream was closed part way through a read
    #[error("link closed after receiving {received} of {expected} bytes")]
    ShortRead {
        /// bytes received before the stream closed
        received: usize,
        /// bytes that were expected
        expected: usize,
    },
    /// The device answered with a Modbus exception
    #[error("Modbus exception: {0}")]
    Exception(ExceptionCode),
    /// The response could not be parsed
    #[error("bad frame: {0}")]
    BadFrame(#[from] FrameParseError),
    /// The request parameters cannot be encoded
    #[error("invalid request: {0}")]
    BadRequest(#[from] InvalidRange),
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Io(err.kind())
    }
}

/// Reasons the vendor frame could not be obtained
///
/// All variants mean the same thing to a collection: the frame is unavailable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Writing the request failed
    #[error("failed to write vendor request: {0}")]
    Write(LinkError),
    /// Reading the response failed or timed out
    #[error("failed to read vendor frame: {0}")]
    Read(LinkError),
    /// Response is too short to carry a checksum trailer
    #[error("vendor frame of {length} bytes cannot hold a checksum")]
    Truncated {
        /// number of bytes in the frame
        length: usize,
    },
    /// Response arrived complete but its checksum is wrong
    #[error("vendor frame crc mismatch: received {received:#06X}, calculated {calculated:#06X}")]
    Checksum {
        /// CRC found in the frame trailer
        received: u16,
        /// CRC calculated over the frame
        calculated: u16,
    },
}

impl FrameError {
    /// True if the frame arrived but its content is corrupted, false if the link failed
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            FrameError::Checksum { .. } | FrameError::Truncated { .. }
        )
    }
}

/// Errors in the device class definitions
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("{path}: {source}")]
    Read {
        /// path of the file
        path: PathBuf,
        /// underlying error
        source: std::io::Error,
    },
    /// The configuration file is not valid
    #[error("{path}: {source}")]
    Parse {
        /// path of the file
        path: PathBuf,
        /// underlying error
        source: serde_yaml::Error,
    },
    /// Configuration text is not valid
    #[error("invalid configuration: {0}")]
    Syntax(#[source] serde_yaml::Error),
    /// Configuration could not be rendered back to text
    #[error("unable to serialize configuration: {0}")]
    Serialize(#[source] serde_yaml::Error),
    /// Two modules share a name
    #[error("duplicate module name: {0}")]
    DuplicateModule(String),
    /// A vendor framed module lacks its frame length
    #[error("module {module} uses the {protocol} protocol but has no frameLength")]
    MissingFrameLength {
        /// module name
        module: String,
        /// protocol of the module
        protocol: Protocol,
    },
    /// A vendor frame length that cannot hold any payload
    #[error("module {module} has frameLength {length}, which leaves no room for a payload")]
    FrameTooShort {
        /// module name
        module: String,
        /// configured length
        length: usize,
    },
    /// The metric's input type cannot be used with the module's protocol
    #[error("metric {metric}: input type {input} is not supported by the {protocol} protocol")]
    UnsupportedSource {
        /// metric name
        metric: String,
        /// configured input type
        input: InputType,
        /// protocol of the module
        protocol: Protocol,
    },
    /// The metric's data type cannot be read from its input type
    #[error("metric {metric}: data type {encoding} is not supported for input type {input}")]
    UnsupportedEncoding {
        /// metric name
        metric: String,
        /// configured data type
        encoding: Encoding,
        /// configured input type
        input: InputType,
    },
    /// A payload offset outside of the vendor frame payload
    #[error("metric {metric}: offset {offset} does not fit in a {frame_length} byte frame")]
    OffsetOutOfRange {
        /// metric name
        metric: String,
        /// configured byte offset
        offset: u16,
        /// configured frame length
        frame_length: usize,
    },
    /// A register address whose words do not fit in the address space
    #[error("metric {metric}: {source}")]
    AddressOverflow {
        /// metric name
        metric: String,
        /// underlying error
        source: InvalidRange,
    },
}

/// Coarse classification of a failed collection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The device class definition is wrong, retrying will not help
    Configuration,
    /// The link or the device failed, a later retry may succeed
    Transport,
    /// Data arrived but failed its integrity check
    Integrity,
}

/// Errors that abort a collection
#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    /// The device class cannot be collected as defined
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A register read failed
    #[error("failed to read metric {metric} at address {address}: {source}")]
    Transport {
        /// metric name
        metric: String,
        /// register address
        address: u16,
        /// underlying error
        source: LinkError,
    },
    /// The vendor frame could not be obtained
    #[error("vendor frame unavailable: {0}")]
    Frame(#[from] FrameError),
}

impl CollectError {
    /// Classify the error for diagnostics and for the serving layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectError::Config(_) => ErrorKind::Configuration,
            CollectError::Transport { .. } => ErrorKind::Transport,
            CollectError::Frame(err) if err.is_corruption() => ErrorKind::Integrity,
            CollectError::Frame(_) => ErrorKind::Transport,
        }
    }
}
