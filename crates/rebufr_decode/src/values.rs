use std::borrow::Cow;
use std::fmt;

use rebufr_tables::{CodeFlagDefinition, Descriptor, ElementDefinition};

use crate::Error;

/// The bits one element occupied in the data section, right-aligned
/// big-endian in `ceil(width / 8)` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBits {
    bytes: Vec<u8>,
    width: u16,
}

impl RawBits {
    pub fn new(bytes: Vec<u8>, width: u16) -> Self {
        debug_assert_eq!(bytes.len(), (width as usize).div_ceil(8));
        Self { bytes, width }
    }

    pub const fn width(&self) -> u16 {
        self.width
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The low 64 bits as a big-endian unsigned integer.
    pub fn as_u64(&self) -> u64 {
        self.bytes
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64)
    }

    /// All-ones sentinel meaning "no data".
    pub fn is_missing(&self) -> bool {
        rebufr_io::is_missing(&self.bytes, self.width)
    }
}

/// A decoded number, integral when the element's scale is zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericData {
    Int(i64),
    Float(f64),
}

impl NumericData {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    pub const fn as_i64(self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(v),
            Self::Float(_) => None,
        }
    }
}

impl fmt::Display for NumericData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
        }
    }
}

/// A plain numeric value: `(reference + raw) × 10^-scale`.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericValue<'t> {
    pub element: &'t ElementDefinition,
    raw: RawBits,
}

impl<'t> NumericValue<'t> {
    pub(crate) fn new(element: &'t ElementDefinition, raw: RawBits) -> Self {
        Self { element, raw }
    }

    pub const fn raw(&self) -> &RawBits {
        &self.raw
    }

    pub fn data(&self) -> NumericData {
        let base = self.element.reference_value as i64 + self.raw.as_u64() as i64;
        if self.element.scale == 0 {
            NumericData::Int(base)
        } else {
            NumericData::Float(base as f64 * 10f64.powi(-i32::from(self.element.scale)))
        }
    }
}

/// CCITT IA5 character data.
#[derive(Debug, Clone, PartialEq)]
pub struct StringValue<'t> {
    pub element: &'t ElementDefinition,
    raw: RawBits,
}

impl<'t> StringValue<'t> {
    pub(crate) fn new(element: &'t ElementDefinition, raw: RawBits) -> Self {
        Self { element, raw }
    }

    pub const fn raw(&self) -> &RawBits {
        &self.raw
    }

    /// The character content up to the first NUL.
    pub fn data(&self) -> Cow<'_, str> {
        let bytes = self.raw.bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        String::from_utf8_lossy(&bytes[..end])
    }
}

/// A value whose unit is `Code table`: the number is a key into the attached
/// code-meaning rows.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeValue<'t> {
    pub element: &'t ElementDefinition,
    raw: RawBits,
    table: Option<&'t CodeFlagDefinition>,
}

impl<'t> CodeValue<'t> {
    pub(crate) fn new(
        element: &'t ElementDefinition,
        raw: RawBits,
        table: Option<&'t CodeFlagDefinition>,
    ) -> Self {
        Self {
            element,
            raw,
            table,
        }
    }

    pub const fn raw(&self) -> &RawBits {
        &self.raw
    }

    /// The reference-biased code number.
    pub fn code(&self) -> i64 {
        self.element.reference_value as i64 + self.raw.as_u64() as i64
    }

    /// The meaning of [CodeValue::code], if the active rows define it.
    pub fn data(&self) -> Option<&'t str> {
        let code = u32::try_from(self.code()).ok()?;
        self.table?.meaning(code)
    }
}

/// A value whose unit is `Flag table`: each set bit maps to a meaning.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagValue<'t> {
    pub element: &'t ElementDefinition,
    raw: RawBits,
    table: Option<&'t CodeFlagDefinition>,
}

impl<'t> FlagValue<'t> {
    pub(crate) fn new(
        element: &'t ElementDefinition,
        raw: RawBits,
        table: Option<&'t CodeFlagDefinition>,
    ) -> Self {
        Self {
            element,
            raw,
            table,
        }
    }

    pub const fn raw(&self) -> &RawBits {
        &self.raw
    }

    pub fn bits(&self) -> u64 {
        self.raw.as_u64()
    }

    /// 1-based positions of the set bits, counted from the most significant
    /// bit of the element's width.
    pub fn active_bits(&self) -> Vec<u16> {
        let width = self.element.bit_width;
        let value = self.raw.as_u64();
        (1..=width)
            .filter(|position| value & (1u64 << (width - position)) != 0)
            .collect()
    }

    /// The meanings of the set bits, in bit order. Bits without a defined
    /// meaning are omitted.
    pub fn data(&self) -> Vec<&'t str> {
        let Some(table) = self.table else {
            return Vec::new();
        };
        self.active_bits()
            .into_iter()
            .filter_map(|position| table.meaning(u32::from(position)))
            .collect()
    }
}

/// The all-ones sentinel; carries no data.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingValue<'t> {
    pub element: &'t ElementDefinition,
}

/// One decoded element occurrence.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'t> {
    Numeric(NumericValue<'t>),
    String(StringValue<'t>),
    CodeLookup(CodeValue<'t>),
    FlagLookup(FlagValue<'t>),
    Missing(MissingValue<'t>),
}

impl<'t> Value<'t> {
    pub const fn element(&self) -> &'t ElementDefinition {
        match self {
            Self::Numeric(v) => v.element,
            Self::String(v) => v.element,
            Self::CodeLookup(v) => v.element,
            Self::FlagLookup(v) => v.element,
            Self::Missing(v) => v.element,
        }
    }

    pub const fn descriptor(&self) -> Descriptor {
        self.element().descriptor
    }

    pub fn mnemonic(&self) -> Option<&'t str> {
        self.element().mnemonic.as_deref()
    }

    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing(_))
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(v) => write!(f, "{}", v.data()),
            Self::String(v) => write!(f, "{:?}", v.data()),
            Self::CodeLookup(v) => match v.data() {
                Some(meaning) => write!(f, "{} ({meaning})", v.code()),
                None => write!(f, "{}", v.code()),
            },
            Self::FlagLookup(v) => {
                let meanings = v.data();
                if meanings.is_empty() {
                    write!(f, "{:#b}", v.bits())
                } else {
                    write!(f, "{}", meanings.join(" | "))
                }
            }
            Self::Missing(_) => f.write_str("missing"),
        }
    }
}

/// Pack a data value back into the raw form [NumericValue::data] decodes,
/// inverting the scale and reference bias.
pub fn encode_numeric(element: &ElementDefinition, data: NumericData) -> Result<RawBits, Error> {
    let width = element.bit_width;
    if width > 64 {
        return Err(Error::InvalidValue {
            descriptor: element.descriptor,
            reason: format!("{width}-bit elements have no numeric encoding"),
        });
    }

    let scaled = match (data, element.scale) {
        (NumericData::Int(v), 0) => v as f64,
        (data, scale) => (data.as_f64() * 10f64.powi(i32::from(scale))).round(),
    };
    let raw = scaled - element.reference_value as f64;

    let out_of_range = raw < 0.0 || (width < 64 && raw >= (1u64 << width) as f64);
    if out_of_range {
        return Err(Error::InvalidValue {
            descriptor: element.descriptor,
            reason: format!("{data} maps to raw {raw} outside {width} bits"),
        });
    }

    Ok(raw_from_u64(raw as u64, width))
}

/// Pack character data into the element's capacity of `ceil(bit_width / 8)`
/// bytes, space-padded on the right.
pub fn encode_string(element: &ElementDefinition, data: &str) -> Result<RawBits, Error> {
    let capacity = (element.bit_width as usize).div_ceil(8);
    if !data.is_ascii() {
        return Err(Error::InvalidValue {
            descriptor: element.descriptor,
            reason: format!("{data:?} is not ASCII"),
        });
    }
    if data.len() > capacity {
        return Err(Error::InvalidValue {
            descriptor: element.descriptor,
            reason: format!("{data:?} exceeds the {capacity}-character capacity"),
        });
    }

    let mut bytes = data.as_bytes().to_vec();
    bytes.resize(capacity, b' ');
    Ok(RawBits::new(bytes, element.bit_width))
}

pub(crate) fn raw_from_u64(value: u64, width: u16) -> RawBits {
    let len = (width as usize).div_ceil(8);
    let bytes = value.to_be_bytes()[8 - len..].to_vec();
    RawBits::new(bytes, width)
}
