//! In-memory data sets.

use crate::dictionary::StandardDictionary;
use crate::element::DataElement;
use crate::header::{Tag, VR};
use std::collections::BTreeMap;

/// A flat collection of data elements, ordered by tag.
///
/// Query identifiers, query results and command sets are all data sets.
/// Putting an element with a tag already present replaces the old element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    elements: BTreeMap<Tag, DataElement>,
}

impl Dataset {
    /// Create an empty data set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a data element,
    /// returning the element previously recorded under the same tag.
    pub fn put(&mut self, element: DataElement) -> Option<DataElement> {
        self.elements.insert(element.tag(), element)
    }

    /// Insert a textual element,
    /// taking the value representation from the dictionary
    /// (`LO` for attributes it does not know).
    pub fn put_str(&mut self, tag: Tag, value: &str) -> Option<DataElement> {
        let vr = StandardDictionary.vr_of(tag).unwrap_or(VR::LO);
        self.put(DataElement::from_text(tag, vr, value))
    }

    /// Insert an element with no value,
    /// requesting it as a return key in a query.
    pub fn put_empty(&mut self, tag: Tag) -> Option<DataElement> {
        let vr = StandardDictionary.vr_of(tag).unwrap_or(VR::LO);
        self.put(DataElement::empty(tag, vr))
    }

    /// Insert an unsigned short (`US`) element.
    pub fn put_u16(&mut self, tag: Tag, value: u16) -> Option<DataElement> {
        self.put(DataElement::from_u16(tag, value))
    }

    /// Insert an unsigned long (`UL`) element.
    pub fn put_u32(&mut self, tag: Tag, value: u32) -> Option<DataElement> {
        self.put(DataElement::from_u32(tag, value))
    }

    pub fn get(&self, tag: Tag) -> Option<&DataElement> {
        self.elements.get(&tag)
    }

    pub fn remove(&mut self, tag: Tag) -> Option<DataElement> {
        self.elements.remove(&tag)
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    /// The string value of an element, see [`DataElement::to_str`].
    pub fn str(&self, tag: Tag) -> Option<String> {
        self.get(tag).and_then(DataElement::to_str)
    }

    /// The string value of an element, or `None` if it is absent or empty.
    pub fn non_empty_str(&self, tag: Tag) -> Option<String> {
        self.str(tag).filter(|s| !s.is_empty())
    }

    /// The values of a multi-valued string element,
    /// see [`DataElement::to_multi_str`].
    pub fn multi_str(&self, tag: Tag) -> Option<Vec<String>> {
        self.get(tag).and_then(DataElement::to_multi_str)
    }

    pub fn u16(&self, tag: Tag) -> Option<u16> {
        self.get(tag).and_then(DataElement::to_u16)
    }

    pub fn u32(&self, tag: Tag) -> Option<u32> {
        self.get(tag).and_then(DataElement::to_u32)
    }

    /// Iterate over the elements in ascending tag order.
    pub fn iter(&self) -> impl Iterator<Item = &DataElement> {
        self.elements.values()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl FromIterator<DataElement> for Dataset {
    fn from_iter<T: IntoIterator<Item = DataElement>>(iter: T) -> Self {
        let mut dataset = Dataset::new();
        dataset.extend(iter);
        dataset
    }
}

impl Extend<DataElement> for Dataset {
    fn extend<T: IntoIterator<Item = DataElement>>(&mut self, iter: T) {
        for element in iter {
            self.put(element);
        }
    }
}

impl IntoIterator for Dataset {
    type Item = DataElement;
    type IntoIter = std::collections::btree_map::IntoValues<Tag, DataElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_values()
    }
}
