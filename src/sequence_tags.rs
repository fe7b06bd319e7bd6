//! Attributes whose value representation is always SQ.
//!
//! Implicit VR streams carry no VR on the wire, so the standard data
//! dictionary is the only way to tell a sequence from an opaque value.
//! Repeating groups such as 50xx resolve through the dictionary's ranges.

use dicom::core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom::core::{Tag, VR};
use dicom_dictionary_std::StandardDataDictionary;

/// Reports whether `tag` always introduces a sequence.
pub fn is_sequence_tag(tag: Tag) -> bool {
    StandardDataDictionary
        .by_tag(tag)
        .is_some_and(|entry| entry.vr().exact() == Some(VR::SQ))
}
