//! Unique identifiers of the SOP classes and transfer syntaxes
//! used by the network engine.

/// SOP Class: Verification SOP Class
#[rustfmt::skip]
pub const VERIFICATION: &str = "1.2.840.10008.1.1";
/// Transfer Syntax: Implicit VR Little Endian: Default Transfer Syntax for DICOM
#[rustfmt::skip]
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
/// Transfer Syntax: Explicit VR Little Endian
#[rustfmt::skip]
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
/// Transfer Syntax: Explicit VR Big Endian (Retired)
#[rustfmt::skip]
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";
/// SOP Class: Patient Root Query/Retrieve Information Model - FIND
#[rustfmt::skip]
pub const PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";
/// SOP Class: Patient Root Query/Retrieve Information Model - MOVE
#[rustfmt::skip]
pub const PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE: &str = "1.2.840.10008.5.1.4.1.2.1.2";
/// SOP Class: Patient Root Query/Retrieve Information Model - GET
#[rustfmt::skip]
pub const PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";
/// SOP Class: Study Root Query/Retrieve Information Model - FIND
#[rustfmt::skip]
pub const STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND: &str = "1.2.840.10008.5.1.4.1.2.2.1";
/// SOP Class: Study Root Query/Retrieve Information Model - MOVE
#[rustfmt::skip]
pub const STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE: &str = "1.2.840.10008.5.1.4.1.2.2.2";
/// SOP Class: Study Root Query/Retrieve Information Model - GET
#[rustfmt::skip]
pub const STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_GET: &str = "1.2.840.10008.5.1.4.1.2.2.3";
