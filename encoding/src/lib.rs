//! DICOM data element and data set codec.
//!
//! This crate provides the data structures and the encoding rules
//! needed to build and read the data sets exchanged over a DICOM association:
//! query identifiers, query results and DIMSE command sets.
//!
//! - The [`header`] module defines [`Tag`] and [`VR`].
//! - [`DataElement`] and [`Dataset`] hold element values in memory.
//! - [`encode_dataset`] and [`decode_dataset`] convert data sets
//!   to and from bytes in one of the supported [`TransferSyntax`]es:
//!   implicit VR little endian, explicit VR little endian
//!   and explicit VR big endian.
//! - [`tags`], [`uids`] and [`dictionary`] hold the attribute and UID
//!   constants known to this crate.
//!
//! # Example
//!
//! ```
//! use dicomlink_encoding::{decode_dataset, encode_dataset, tags, Dataset, TransferSyntax};
//!
//! let mut query = Dataset::new();
//! query.put_str(tags::QUERY_RETRIEVE_LEVEL, "STUDY");
//! query.put_str(tags::PATIENT_ID, "12345");
//! query.put_empty(tags::STUDY_INSTANCE_UID);
//!
//! let bytes = encode_dataset(&query, TransferSyntax::ExplicitVrLittleEndian)?;
//! let decoded = decode_dataset(&bytes, TransferSyntax::ExplicitVrLittleEndian)?;
//! assert_eq!(decoded, query);
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```

pub mod dataset;
pub mod decode;
pub mod dictionary;
pub mod element;
pub mod encode;
pub mod header;
pub mod tags;
pub mod transfer_syntax;
pub mod uids;

pub use dataset::Dataset;
pub use decode::decode_dataset;
pub use dictionary::StandardDictionary;
pub use element::{DataElement, Value};
pub use encode::encode_dataset;
pub use header::{Tag, VR};
pub use transfer_syntax::TransferSyntax;
