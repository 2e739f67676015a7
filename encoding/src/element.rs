//! Data element and value types.

use crate::dataset::Dataset;
use crate::header::{Tag, VR};

/// Separator between the values of a multi-valued string.
pub const VALUE_DELIMITER: u8 = b'\\';

/// The value of a data element.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The raw bytes of a primitive value,
    /// with binary numbers in little endian byte order.
    Primitive(Vec<u8>),
    /// A sequence of items, each one a nested data set.
    Sequence(Vec<Dataset>),
}

/// A data element: a tag, its value representation and its value.
///
/// Primitive values are always kept at an even length,
/// padded according to the value representation.
#[derive(Debug, Clone, PartialEq)]
pub struct DataElement {
    tag: Tag,
    vr: VR,
    value: Value,
}

impl DataElement {
    /// Create a data element from its parts.
    ///
    /// Odd-length primitive values are padded,
    /// and sequence values always take the `SQ` representation.
    pub fn new(tag: Tag, vr: VR, value: Value) -> Self {
        match value {
            Value::Primitive(bytes) => DataElement::from_bytes(tag, vr, bytes),
            Value::Sequence(items) => DataElement::sequence(tag, items),
        }
    }

    /// Create a primitive data element from raw value bytes.
    pub fn from_bytes(tag: Tag, vr: VR, bytes: impl Into<Vec<u8>>) -> Self {
        let mut bytes = bytes.into();
        if bytes.len() % 2 == 1 {
            bytes.push(vr.padding());
        }
        DataElement {
            tag,
            vr,
            value: Value::Primitive(bytes),
        }
    }

    /// Create a textual data element.
    pub fn from_text(tag: Tag, vr: VR, text: &str) -> Self {
        DataElement::from_bytes(tag, vr, text.as_bytes())
    }

    /// Create a multi-valued textual data element,
    /// joining the values with a backslash.
    pub fn from_texts<'a, I>(tag: Tag, vr: VR, values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut bytes = Vec::new();
        for (i, value) in values.into_iter().enumerate() {
            if i > 0 {
                bytes.push(VALUE_DELIMITER);
            }
            bytes.extend_from_slice(value.as_bytes());
        }
        DataElement::from_bytes(tag, vr, bytes)
    }

    /// Create an unsigned short (`US`) data element.
    pub fn from_u16(tag: Tag, value: u16) -> Self {
        DataElement::from_bytes(tag, VR::US, value.to_le_bytes())
    }

    /// Create an unsigned long (`UL`) data element.
    pub fn from_u32(tag: Tag, value: u32) -> Self {
        DataElement::from_bytes(tag, VR::UL, value.to_le_bytes())
    }

    /// Create a sequence (`SQ`) data element.
    pub fn sequence(tag: Tag, items: Vec<Dataset>) -> Self {
        DataElement {
            tag,
            vr: VR::SQ,
            value: Value::Sequence(items),
        }
    }

    /// Create an element with no value,
    /// as used for return keys in queries.
    pub fn empty(tag: Tag, vr: VR) -> Self {
        if vr == VR::SQ {
            DataElement::sequence(tag, Vec::new())
        } else {
            DataElement::from_bytes(tag, vr, Vec::new())
        }
    }

    #[inline]
    pub fn tag(&self) -> Tag {
        self.tag
    }

    #[inline]
    pub fn vr(&self) -> VR {
        self.vr
    }

    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// The length of the primitive value in bytes,
    /// or `None` for sequences.
    pub fn length(&self) -> Option<usize> {
        match &self.value {
            Value::Primitive(bytes) => Some(bytes.len()),
            Value::Sequence(_) => None,
        }
    }

    /// The raw bytes of a primitive value.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Value::Primitive(bytes) => Some(bytes),
            Value::Sequence(_) => None,
        }
    }

    /// The items of a sequence value.
    pub fn items(&self) -> Option<&[Dataset]> {
        match &self.value {
            Value::Primitive(_) => None,
            Value::Sequence(items) => Some(items),
        }
    }

    /// The full string value, with value delimiters kept in place
    /// and trailing padding removed.
    ///
    /// Numeric strings such as `IS` and `DS` are returned as text.
    pub fn to_str(&self) -> Option<String> {
        let bytes = self.bytes()?;
        let text = String::from_utf8_lossy(bytes);
        Some(text.trim_end_matches([' ', '\0']).to_string())
    }

    /// The individual values of a multi-valued string,
    /// with surrounding padding removed from each value.
    ///
    /// An empty value yields an empty list,
    /// whereas empty positions between delimiters are kept as empty strings.
    /// Text VRs which cannot be multi-valued (`LT`, `ST`, `UT`, `UR`)
    /// yield a single value even if they contain a backslash.
    pub fn to_multi_str(&self) -> Option<Vec<String>> {
        let bytes = self.bytes()?;
        if bytes.iter().all(|b| *b == b' ' || *b == 0) {
            return Some(Vec::new());
        }
        if !self.vr.is_multi_valued_text() {
            return self.to_str().map(|s| vec![s]);
        }
        let values = bytes
            .split(|b| *b == VALUE_DELIMITER)
            .map(|part| {
                String::from_utf8_lossy(part)
                    .trim_matches([' ', '\0'])
                    .to_string()
            })
            .collect();
        Some(values)
    }

    /// Read an unsigned short value (`US`).
    pub fn to_u16(&self) -> Option<u16> {
        let bytes = self.bytes()?;
        let raw: [u8; 2] = bytes.get(0..2)?.try_into().ok()?;
        Some(u16::from_le_bytes(raw))
    }

    /// Read an unsigned long value (`UL`).
    pub fn to_u32(&self) -> Option<u32> {
        let bytes = self.bytes()?;
        let raw: [u8; 4] = bytes.get(0..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(raw))
    }
}
