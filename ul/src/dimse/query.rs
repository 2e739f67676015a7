//! Query identifiers and result records
//! for the study, series and instance levels
//! of the query/retrieve information models.
//!
//! The typed queries produce the identifier sent in a C-FIND request,
//! with every supported return key present
//! (empty unless a matching value was given).
//! The records read those keys back from each pending response.
use std::fmt;
use std::str::FromStr;

use dicomlink_encoding::{tags, Dataset, Tag};

/// The value of Query/Retrieve Level (0008,0052).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum QueryLevel {
    Patient,
    Study,
    Series,
    Image,
}

impl QueryLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryLevel::Patient => "PATIENT",
            QueryLevel::Study => "STUDY",
            QueryLevel::Series => "SERIES",
            QueryLevel::Image => "IMAGE",
        }
    }
}

impl fmt::Display for QueryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryLevel {
    type Err = UnknownQueryLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PATIENT" => Ok(QueryLevel::Patient),
            "STUDY" => Ok(QueryLevel::Study),
            "SERIES" => Ok(QueryLevel::Series),
            "IMAGE" | "INSTANCE" => Ok(QueryLevel::Image),
            _ => Err(UnknownQueryLevel(s.to_string())),
        }
    }
}

/// A string which is not a query/retrieve level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownQueryLevel(pub String);

impl fmt::Display for UnknownQueryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown query/retrieve level {:?}", self.0)
    }
}

impl std::error::Error for UnknownQueryLevel {}

/// Put a matching key, or an empty return key if no value was given.
fn put_key(dataset: &mut Dataset, tag: Tag, value: Option<&str>) {
    match value {
        Some(value) if !value.is_empty() => {
            dataset.put_str(tag, value);
        }
        _ => {
            dataset.put_empty(tag);
        }
    }
}

fn put_return_keys(dataset: &mut Dataset, keys: &[Tag]) {
    for &tag in keys {
        if !dataset.contains(tag) {
            dataset.put_empty(tag);
        }
    }
}

/// Parse an IS value, treating anything absent or unparseable as unknown.
fn integer(dataset: &Dataset, tag: Tag) -> Option<i32> {
    dataset.non_empty_str(tag)?.trim().parse().ok()
}

fn text(dataset: &Dataset, tag: Tag) -> String {
    dataset.str(tag).unwrap_or_default()
}

/// Study level query (Study Root information model).
///
/// Dates may be single dates (`20240131`) or ranges (`20240101-20240131`),
/// names may carry `*` and `?` wildcards, as the peer supports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyQuery {
    pub patient_id: Option<String>,
    pub patient_name: Option<String>,
    pub study_date: Option<String>,
    pub study_time: Option<String>,
    pub accession_number: Option<String>,
    /// matched against Modalities in Study
    pub modality: Option<String>,
    pub study_description: Option<String>,
    pub study_instance_uid: Option<String>,
}

impl StudyQuery {
    const RETURN_KEYS: &'static [Tag] = &[
        tags::STUDY_TIME,
        tags::REFERRING_PHYSICIAN_NAME,
        tags::PATIENT_BIRTH_DATE,
        tags::PATIENT_SEX,
        tags::STUDY_ID,
        tags::STUDY_DESCRIPTION,
        tags::NUMBER_OF_STUDY_RELATED_SERIES,
        tags::NUMBER_OF_STUDY_RELATED_INSTANCES,
    ];

    pub fn to_dataset(&self) -> Dataset {
        let mut dataset = Dataset::new();
        dataset.put_str(tags::QUERY_RETRIEVE_LEVEL, QueryLevel::Study.as_str());
        put_key(&mut dataset, tags::PATIENT_ID, self.patient_id.as_deref());
        put_key(&mut dataset, tags::PATIENT_NAME, self.patient_name.as_deref());
        put_key(&mut dataset, tags::STUDY_DATE, self.study_date.as_deref());
        put_key(&mut dataset, tags::STUDY_TIME, self.study_time.as_deref());
        put_key(
            &mut dataset,
            tags::ACCESSION_NUMBER,
            self.accession_number.as_deref(),
        );
        put_key(&mut dataset, tags::MODALITIES_IN_STUDY, self.modality.as_deref());
        put_key(
            &mut dataset,
            tags::STUDY_DESCRIPTION,
            self.study_description.as_deref(),
        );
        put_key(
            &mut dataset,
            tags::STUDY_INSTANCE_UID,
            self.study_instance_uid.as_deref(),
        );
        put_return_keys(&mut dataset, Self::RETURN_KEYS);
        dataset
    }
}

/// Series level query within one study.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesQuery {
    pub study_instance_uid: String,
    pub modality: Option<String>,
    pub series_instance_uid: Option<String>,
}

impl SeriesQuery {
    const RETURN_KEYS: &'static [Tag] = &[
        tags::SERIES_NUMBER,
        tags::SERIES_DESCRIPTION,
        tags::SERIES_DATE,
        tags::SERIES_TIME,
        tags::BODY_PART_EXAMINED,
        tags::NUMBER_OF_SERIES_RELATED_INSTANCES,
    ];

    pub fn new(study_instance_uid: impl Into<String>) -> Self {
        SeriesQuery {
            study_instance_uid: study_instance_uid.into(),
            ..Default::default()
        }
    }

    pub fn to_dataset(&self) -> Dataset {
        let mut dataset = Dataset::new();
        dataset.put_str(tags::QUERY_RETRIEVE_LEVEL, QueryLevel::Series.as_str());
        dataset.put_str(tags::STUDY_INSTANCE_UID, &self.study_instance_uid);
        put_key(&mut dataset, tags::MODALITY, self.modality.as_deref());
        put_key(
            &mut dataset,
            tags::SERIES_INSTANCE_UID,
            self.series_instance_uid.as_deref(),
        );
        put_return_keys(&mut dataset, Self::RETURN_KEYS);
        dataset
    }
}

/// Instance level query within one series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceQuery {
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: Option<String>,
}

impl InstanceQuery {
    const RETURN_KEYS: &'static [Tag] = &[
        tags::SOP_CLASS_UID,
        tags::INSTANCE_NUMBER,
        tags::ROWS,
        tags::COLUMNS,
    ];

    pub fn new(
        study_instance_uid: impl Into<String>,
        series_instance_uid: impl Into<String>,
    ) -> Self {
        InstanceQuery {
            study_instance_uid: study_instance_uid.into(),
            series_instance_uid: series_instance_uid.into(),
            sop_instance_uid: None,
        }
    }

    pub fn to_dataset(&self) -> Dataset {
        let mut dataset = Dataset::new();
        dataset.put_str(tags::QUERY_RETRIEVE_LEVEL, QueryLevel::Image.as_str());
        dataset.put_str(tags::STUDY_INSTANCE_UID, &self.study_instance_uid);
        dataset.put_str(tags::SERIES_INSTANCE_UID, &self.series_instance_uid);
        put_key(
            &mut dataset,
            tags::SOP_INSTANCE_UID,
            self.sop_instance_uid.as_deref(),
        );
        put_return_keys(&mut dataset, Self::RETURN_KEYS);
        dataset
    }
}

/// One study matched by a study level C-FIND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudyRecord {
    pub study_instance_uid: String,
    pub patient_id: String,
    pub patient_name: String,
    pub patient_birth_date: String,
    pub patient_sex: String,
    pub study_date: String,
    pub study_time: String,
    pub study_description: String,
    pub study_id: String,
    pub accession_number: String,
    pub referring_physician_name: String,
    pub modalities_in_study: Vec<String>,
    pub number_of_series: Option<i32>,
    pub number_of_instances: Option<i32>,
}

impl StudyRecord {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        StudyRecord {
            study_instance_uid: text(dataset, tags::STUDY_INSTANCE_UID),
            patient_id: text(dataset, tags::PATIENT_ID),
            patient_name: text(dataset, tags::PATIENT_NAME),
            patient_birth_date: text(dataset, tags::PATIENT_BIRTH_DATE),
            patient_sex: text(dataset, tags::PATIENT_SEX),
            study_date: text(dataset, tags::STUDY_DATE),
            study_time: text(dataset, tags::STUDY_TIME),
            study_description: text(dataset, tags::STUDY_DESCRIPTION),
            study_id: text(dataset, tags::STUDY_ID),
            accession_number: text(dataset, tags::ACCESSION_NUMBER),
            referring_physician_name: text(dataset, tags::REFERRING_PHYSICIAN_NAME),
            modalities_in_study: dataset
                .multi_str(tags::MODALITIES_IN_STUDY)
                .unwrap_or_default()
                .into_iter()
                .filter(|m| !m.is_empty())
                .collect(),
            number_of_series: integer(dataset, tags::NUMBER_OF_STUDY_RELATED_SERIES),
            number_of_instances: integer(dataset, tags::NUMBER_OF_STUDY_RELATED_INSTANCES),
        }
    }
}

/// One series matched by a series level C-FIND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesRecord {
    pub series_instance_uid: String,
    pub series_number: Option<i32>,
    pub modality: String,
    pub series_description: String,
    pub series_date: String,
    pub series_time: String,
    pub body_part_examined: String,
    pub number_of_instances: Option<i32>,
}

impl SeriesRecord {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        SeriesRecord {
            series_instance_uid: text(dataset, tags::SERIES_INSTANCE_UID),
            series_number: integer(dataset, tags::SERIES_NUMBER),
            modality: text(dataset, tags::MODALITY),
            series_description: text(dataset, tags::SERIES_DESCRIPTION),
            series_date: text(dataset, tags::SERIES_DATE),
            series_time: text(dataset, tags::SERIES_TIME),
            body_part_examined: text(dataset, tags::BODY_PART_EXAMINED),
            number_of_instances: integer(dataset, tags::NUMBER_OF_SERIES_RELATED_INSTANCES),
        }
    }
}

/// One instance matched by an instance level C-FIND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceRecord {
    pub sop_instance_uid: String,
    pub sop_class_uid: String,
    pub instance_number: Option<i32>,
    pub rows: Option<u16>,
    pub columns: Option<u16>,
}

impl InstanceRecord {
    pub fn from_dataset(dataset: &Dataset) -> Self {
        InstanceRecord {
            sop_instance_uid: text(dataset, tags::SOP_INSTANCE_UID),
            sop_class_uid: text(dataset, tags::SOP_CLASS_UID),
            instance_number: integer(dataset, tags::INSTANCE_NUMBER),
            rows: dataset.u16(tags::ROWS),
            columns: dataset.u16(tags::COLUMNS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicomlink_encoding::DataElement;
    use dicomlink_encoding::VR;

    #[test]
    fn query_levels() {
        assert_eq!(QueryLevel::Series.to_string(), "SERIES");
        assert_eq!("image".parse::<QueryLevel>(), Ok(QueryLevel::Image));
        assert_eq!("INSTANCE".parse::<QueryLevel>(), Ok(QueryLevel::Image));
        assert!("WORKLIST".parse::<QueryLevel>().is_err());
    }

    #[test]
    fn study_query_has_matching_and_return_keys() {
        let query = StudyQuery {
            patient_id: Some("12345".to_string()),
            study_date: Some("20240101-20240131".to_string()),
            ..Default::default()
        };
        let dataset = query.to_dataset();
        assert_eq!(dataset.str(tags::QUERY_RETRIEVE_LEVEL).as_deref(), Some("STUDY"));
        assert_eq!(dataset.str(tags::PATIENT_ID).as_deref(), Some("12345"));
        assert_eq!(
            dataset.str(tags::STUDY_DATE).as_deref(),
            Some("20240101-20240131")
        );
        // universal matching
        assert_eq!(dataset.str(tags::PATIENT_NAME).as_deref(), Some(""));
        assert!(dataset.contains(tags::STUDY_INSTANCE_UID));
        assert!(dataset.contains(tags::NUMBER_OF_STUDY_RELATED_INSTANCES));
        assert!(!dataset.contains(tags::SERIES_INSTANCE_UID));
    }

    #[test]
    fn instance_query_is_scoped_to_series() {
        let dataset = InstanceQuery::new("1.2.3", "1.2.3.4").to_dataset();
        assert_eq!(dataset.str(tags::QUERY_RETRIEVE_LEVEL).as_deref(), Some("IMAGE"));
        assert_eq!(dataset.str(tags::STUDY_INSTANCE_UID).as_deref(), Some("1.2.3"));
        assert_eq!(dataset.str(tags::SERIES_INSTANCE_UID).as_deref(), Some("1.2.3.4"));
        assert!(dataset.contains(tags::SOP_INSTANCE_UID));
        assert!(dataset.contains(tags::ROWS));
    }

    #[test]
    fn study_record_from_result() {
        let mut dataset = Dataset::new();
        dataset.put_str(tags::STUDY_INSTANCE_UID, "1.2.840.113619.2.1");
        dataset.put_str(tags::PATIENT_NAME, "Doe^John");
        dataset.put(DataElement::from_texts(
            tags::MODALITIES_IN_STUDY,
            VR::CS,
            ["CT", "", "PT"],
        ));
        dataset.put_str(tags::NUMBER_OF_STUDY_RELATED_SERIES, "3 ");
        dataset.put_str(tags::NUMBER_OF_STUDY_RELATED_INSTANCES, "many");

        let record = StudyRecord::from_dataset(&dataset);
        assert_eq!(record.study_instance_uid, "1.2.840.113619.2.1");
        assert_eq!(record.patient_name, "Doe^John");
        assert_eq!(record.patient_id, "");
        assert_eq!(record.modalities_in_study, vec!["CT", "PT"]);
        assert_eq!(record.number_of_series, Some(3));
        assert_eq!(record.number_of_instances, None);
    }

    #[test]
    fn instance_record_from_result() {
        let mut dataset = Dataset::new();
        dataset.put_str(tags::SOP_INSTANCE_UID, "1.2.3.4.5");
        dataset.put_str(tags::INSTANCE_NUMBER, "12");
        dataset.put_u16(tags::ROWS, 512);
        dataset.put_u16(tags::COLUMNS, 256);

        let record = InstanceRecord::from_dataset(&dataset);
        assert_eq!(record.sop_instance_uid, "1.2.3.4.5");
        assert_eq!(record.instance_number, Some(12));
        assert_eq!(record.rows, Some(512));
        assert_eq!(record.columns, Some(256));
    }
}
