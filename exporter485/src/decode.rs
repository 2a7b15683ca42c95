use serde::{Deserialize, Serialize};

/// Binary encoding of a metric's raw register data
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// 16-bit two's complement integer
    Int16,
    /// 32-bit two's complement integer spread over two words
    Int32,
    /// 16-bit unsigned integer
    Uint16,
    /// 32-bit unsigned integer spread over two words
    Uint32,
    /// 16-bit signed integer reading exposed as a float
    ///
    /// This is *not* IEEE-754 half precision.
    Float16,
    /// 32-bit signed integer reading exposed as a float
    ///
    /// This is *not* IEEE-754 single precision.
    Float32,
}

impl Encoding {
    /// Number of 16-bit words occupied by the encoding
    pub fn word_count(self) -> u16 {
        match self {
            Encoding::Int16 | Encoding::Uint16 | Encoding::Float16 => 1,
            Encoding::Int32 | Encoding::Uint32 | Encoding::Float32 => 2,
        }
    }

    /// True for the single word encodings
    pub fn is_16_bit(self) -> bool {
        self.word_count() == 1
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Encoding::Int16 => "int16",
            Encoding::Int32 => "int32",
            Encoding::Uint16 => "uint16",
            Encoding::Uint32 => "uint32",
            Encoding::Float16 => "float16",
            Encoding::Float32 => "float32",
        };
        f.write_str(name)
    }
}

/// Order of the two words of a 32-bit value
///
/// The configuration labels are kept from the deployed file format: `big` selects
/// low word first and `little` selects high word first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WordOrder {
    /// first word read holds the low 16 bits
    #[default]
    #[serde(rename = "big")]
    LowHigh,
    /// first word read holds the high 16 bits
    #[serde(rename = "little")]
    HighLow,
}

impl WordOrder {
    /// positions of the (low, high) words in a two word read
    fn positions(self) -> (usize, usize) {
        match self {
            WordOrder::LowHigh => (0, 1),
            WordOrder::HighLow => (1, 0),
        }
    }
}

/// A decoded measurement
///
/// The variant is fixed by the encoding of the metric that produced it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DecodedValue {
    /// result of `int16` and `int32`
    Signed(i32),
    /// result of `uint16` and `uint32`
    Unsigned(u32),
    /// result of `float16` and `float32`
    Float(f32),
}

impl std::fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodedValue::Signed(x) => write!(f, "{x}"),
            DecodedValue::Unsigned(x) => write!(f, "{x}"),
            DecodedValue::Float(x) => write!(f, "{x:.6}"),
        }
    }
}

/// Decode one or two raw words into a typed value and apply the scale factor
///
/// Single word encodings only look at `words[0]` and ignore `order`. A factor
/// of zero or `None` leaves the value unscaled. Scaled integers are truncated
/// toward zero.
pub fn decode(
    encoding: Encoding,
    order: WordOrder,
    words: [u16; 2],
    factor: Option<f32>,
) -> DecodedValue {
    let (low, high) = order.positions();
    let combined = (u32::from(words[high]) << 16) | u32::from(words[low]);
    let single = words[0];

    let value = match encoding {
        Encoding::Int16 => DecodedValue::Signed(i32::from(single as i16)),
        Encoding::Uint16 => DecodedValue::Unsigned(u32::from(single)),
        Encoding::Int32 => DecodedValue::Signed(combined as i32),
        Encoding::Uint32 => DecodedValue::Unsigned(combined),
        Encoding::Float16 => DecodedValue::Float(f32::from(single as i16)),
        Encoding::Float32 => DecodedValue::Float(combined as i32 as f32),
    };

    match factor {
        Some(factor) if factor != 0.0 => scale(value, factor),
        _ => value,
    }
}

fn scale(value: DecodedValue, factor: f32) -> DecodedValue {
    // integers are widened so that products stay exact before truncation
    let wide = f64::from(factor);
    match value {
        DecodedValue::Signed(x) => DecodedValue::Signed((f64::from(x) * wide) as i32),
        DecodedValue::Unsigned(x) => DecodedValue::Unsigned((f64::from(x) * wide) as u32),
        DecodedValue::Float(x) => DecodedValue::Float(x * factor),
    }
}
