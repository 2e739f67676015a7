//! A compact attribute dictionary.
//!
//! Only the command group and the attributes involved in
//! patient, study, series and instance level queries are covered.
//! It resolves value representations when reading implicit VR data
//! and maps attribute keywords to tags for textual query terms.

use crate::header::{Tag, VR};
use crate::tags;

/// An entry of the attribute dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DictionaryEntry {
    /// the attribute tag
    pub tag: Tag,
    /// the attribute keyword
    pub alias: &'static str,
    /// the attribute's value representation
    pub vr: VR,
}

const fn e(tag: Tag, alias: &'static str, vr: VR) -> DictionaryEntry {
    DictionaryEntry { tag, alias, vr }
}

/// Generic Group Length dictionary entry.
static GROUP_LENGTH_ENTRY: DictionaryEntry = e(Tag(0x0000, 0x0000), "GenericGroupLength", VR::UL);

/// Generic Private Creator dictionary entry.
static PRIVATE_CREATOR_ENTRY: DictionaryEntry = e(Tag(0x0009, 0x0010), "PrivateCreator", VR::LO);

// sorted by tag
static ENTRIES: &[DictionaryEntry] = &[
    e(tags::COMMAND_GROUP_LENGTH, "CommandGroupLength", VR::UL),
    e(tags::AFFECTED_SOP_CLASS_UID, "AffectedSOPClassUID", VR::UI),
    e(tags::REQUESTED_SOP_CLASS_UID, "RequestedSOPClassUID", VR::UI),
    e(tags::COMMAND_FIELD, "CommandField", VR::US),
    e(tags::MESSAGE_ID, "MessageID", VR::US),
    e(tags::MESSAGE_ID_BEING_RESPONDED_TO, "MessageIDBeingRespondedTo", VR::US),
    e(tags::MOVE_DESTINATION, "MoveDestination", VR::AE),
    e(tags::PRIORITY, "Priority", VR::US),
    e(tags::COMMAND_DATA_SET_TYPE, "CommandDataSetType", VR::US),
    e(tags::STATUS, "Status", VR::US),
    e(tags::OFFENDING_ELEMENT, "OffendingElement", VR::AT),
    e(tags::ERROR_COMMENT, "ErrorComment", VR::LO),
    e(tags::ERROR_ID, "ErrorID", VR::US),
    e(tags::AFFECTED_SOP_INSTANCE_UID, "AffectedSOPInstanceUID", VR::UI),
    e(tags::NUMBER_OF_REMAINING_SUBOPERATIONS, "NumberOfRemainingSuboperations", VR::US),
    e(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, "NumberOfCompletedSuboperations", VR::US),
    e(tags::NUMBER_OF_FAILED_SUBOPERATIONS, "NumberOfFailedSuboperations", VR::US),
    e(tags::NUMBER_OF_WARNING_SUBOPERATIONS, "NumberOfWarningSuboperations", VR::US),
    e(tags::SPECIFIC_CHARACTER_SET, "SpecificCharacterSet", VR::CS),
    e(tags::SOP_CLASS_UID, "SOPClassUID", VR::UI),
    e(tags::SOP_INSTANCE_UID, "SOPInstanceUID", VR::UI),
    e(tags::STUDY_DATE, "StudyDate", VR::DA),
    e(tags::SERIES_DATE, "SeriesDate", VR::DA),
    e(tags::STUDY_TIME, "StudyTime", VR::TM),
    e(tags::SERIES_TIME, "SeriesTime", VR::TM),
    e(tags::ACCESSION_NUMBER, "AccessionNumber", VR::SH),
    e(tags::QUERY_RETRIEVE_LEVEL, "QueryRetrieveLevel", VR::CS),
    e(tags::RETRIEVE_AE_TITLE, "RetrieveAETitle", VR::AE),
    e(tags::INSTANCE_AVAILABILITY, "InstanceAvailability", VR::CS),
    e(tags::MODALITY, "Modality", VR::CS),
    e(tags::MODALITIES_IN_STUDY, "ModalitiesInStudy", VR::CS),
    e(tags::SOP_CLASSES_IN_STUDY, "SOPClassesInStudy", VR::UI),
    e(tags::INSTITUTION_NAME, "InstitutionName", VR::LO),
    e(tags::REFERRING_PHYSICIAN_NAME, "ReferringPhysicianName", VR::PN),
    e(tags::STUDY_DESCRIPTION, "StudyDescription", VR::LO),
    e(tags::SERIES_DESCRIPTION, "SeriesDescription", VR::LO),
    e(tags::NAME_OF_PHYSICIANS_READING_STUDY, "NameOfPhysiciansReadingStudy", VR::PN),
    e(tags::REFERENCED_STUDY_SEQUENCE, "ReferencedStudySequence", VR::SQ),
    e(tags::REFERENCED_SERIES_SEQUENCE, "ReferencedSeriesSequence", VR::SQ),
    e(tags::REFERENCED_SOP_CLASS_UID, "ReferencedSOPClassUID", VR::UI),
    e(tags::REFERENCED_SOP_INSTANCE_UID, "ReferencedSOPInstanceUID", VR::UI),
    e(tags::PATIENT_NAME, "PatientName", VR::PN),
    e(tags::PATIENT_ID, "PatientID", VR::LO),
    e(tags::PATIENT_BIRTH_DATE, "PatientBirthDate", VR::DA),
    e(tags::PATIENT_SEX, "PatientSex", VR::CS),
    e(tags::PATIENT_AGE, "PatientAge", VR::AS),
    e(tags::BODY_PART_EXAMINED, "BodyPartExamined", VR::CS),
    e(tags::STUDY_INSTANCE_UID, "StudyInstanceUID", VR::UI),
    e(tags::SERIES_INSTANCE_UID, "SeriesInstanceUID", VR::UI),
    e(tags::STUDY_ID, "StudyID", VR::SH),
    e(tags::SERIES_NUMBER, "SeriesNumber", VR::IS),
    e(tags::INSTANCE_NUMBER, "InstanceNumber", VR::IS),
    e(tags::NUMBER_OF_PATIENT_RELATED_STUDIES, "NumberOfPatientRelatedStudies", VR::IS),
    e(tags::NUMBER_OF_STUDY_RELATED_SERIES, "NumberOfStudyRelatedSeries", VR::IS),
    e(tags::NUMBER_OF_STUDY_RELATED_INSTANCES, "NumberOfStudyRelatedInstances", VR::IS),
    e(tags::NUMBER_OF_SERIES_RELATED_INSTANCES, "NumberOfSeriesRelatedInstances", VR::IS),
    e(tags::ROWS, "Rows", VR::US),
    e(tags::COLUMNS, "Columns", VR::US),
    e(tags::REQUESTING_PHYSICIAN, "RequestingPhysician", VR::PN),
    e(tags::REQUEST_ATTRIBUTES_SEQUENCE, "RequestAttributesSequence", VR::SQ),
];

/// The attribute dictionary used by the codec.
///
/// This is a unit type: all lookups consult the same static table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StandardDictionary;

impl StandardDictionary {
    /// Fetch the entry for the given tag.
    ///
    /// Group length and private creator elements
    /// resolve to generic entries.
    pub fn by_tag(&self, tag: Tag) -> Option<&'static DictionaryEntry> {
        if let Ok(i) = ENTRIES.binary_search_by_key(&tag, |entry| entry.tag) {
            return Some(&ENTRIES[i]);
        }
        if tag.is_group_length() {
            return Some(&GROUP_LENGTH_ENTRY);
        }
        if tag.is_private() && (0x0010..=0x00FF).contains(&tag.element()) {
            return Some(&PRIVATE_CREATOR_ENTRY);
        }
        None
    }

    /// Fetch the entry with the given keyword, such as `PatientName`.
    pub fn by_name(&self, name: &str) -> Option<&'static DictionaryEntry> {
        ENTRIES.iter().find(|entry| entry.alias == name)
    }

    /// Resolve the value representation of an attribute,
    /// if it is known.
    pub fn vr_of(&self, tag: Tag) -> Option<VR> {
        self.by_tag(tag).map(|entry| entry.vr)
    }

    /// Iterate over all specific entries of the dictionary.
    pub fn entries(&self) -> impl Iterator<Item = &'static DictionaryEntry> {
        ENTRIES.iter()
    }
}
