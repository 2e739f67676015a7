//! Module for parsing query text pieces into DICOM queries.

use std::str::FromStr;

use dicomlink_encoding::{DataElement, Dataset, StandardDictionary, Tag, VR};
use snafu::{whatever, OptionExt, ResultExt, Whatever};

#[derive(Debug, Clone, Eq, Hash, PartialEq)]
struct TermQuery {
    field: Tag,
    match_value: String,
}

/// Term queries can be parsed with the syntax `«tag»=«value»`,
/// where `«tag»` is either a DICOM tag group-element pair
/// (`0010,0020` or `(0010,0020)`) or the respective tag keyword,
/// and `=«value»` is optional.
impl FromStr for TermQuery {
    type Err = Whatever;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag_part, value_part) = s.split_once('=').unwrap_or((s, ""));
        let tag_part = tag_part.trim();

        let field = match parse_tag(tag_part) {
            Some(tag) => tag,
            None => {
                StandardDictionary
                    .by_name(tag_part)
                    .with_whatever_context(|| {
                        format!("could not resolve query field name {:?}", tag_part)
                    })?
                    .tag
            }
        };

        Ok(TermQuery {
            field,
            match_value: value_part.to_owned(),
        })
    }
}

fn parse_tag(text: &str) -> Option<Tag> {
    let text = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .unwrap_or(text);
    let (group, element) = text.split_once(',')?;
    let group = u16::from_str_radix(group.trim(), 16).ok()?;
    let element = u16::from_str_radix(element.trim(), 16).ok()?;
    Some(Tag(group, element))
}

/// Add the given query terms to a query data set,
/// later terms replacing earlier ones on the same attribute.
pub fn parse_queries<T>(mut obj: Dataset, qs: &[T]) -> Result<Dataset, Whatever>
where
    T: AsRef<str>,
{
    for q in qs {
        let term_query: TermQuery = q.as_ref().parse()?;
        obj.put(term_to_element(term_query.field, &term_query.match_value)?);
    }
    Ok(obj)
}

fn term_to_element(tag: Tag, txt_value: &str) -> Result<DataElement, Whatever> {
    let vr = StandardDictionary.vr_of(tag).unwrap_or(VR::LO);
    if txt_value.is_empty() {
        return Ok(DataElement::empty(tag, vr));
    }
    let element = match vr {
        vr if vr.is_text() => DataElement::from_text(tag, vr, txt_value),
        VR::US => {
            let us: u16 = txt_value
                .parse()
                .whatever_context("Failed to parse value as US")?;
            DataElement::from_u16(tag, us)
        }
        VR::UL => {
            let ul: u32 = txt_value
                .parse()
                .whatever_context("Failed to parse value as UL")?;
            DataElement::from_u32(tag, ul)
        }
        VR::SQ => whatever!("Unsupported sequence-based query"),
        vr => whatever!("Unsupported VR {}", vr),
    };
    Ok(element)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dicomlink_encoding::tags;

    #[test]
    fn parse_keyword_and_tag_terms() {
        let obj = parse_queries(
            Dataset::new(),
            &[
                "PatientID=12345",
                "(0008,0020)=20240101-20240131",
                "0020,000D",
                "Rows=512",
            ],
        )
        .unwrap();

        assert_eq!(obj.str(tags::PATIENT_ID).as_deref(), Some("12345"));
        assert_eq!(
            obj.str(tags::STUDY_DATE).as_deref(),
            Some("20240101-20240131")
        );
        let uid = obj.get(tags::STUDY_INSTANCE_UID).unwrap();
        assert_eq!(uid.vr(), VR::UI);
        assert_eq!(uid.length(), Some(0));
        assert_eq!(obj.u16(tags::ROWS), Some(512));
    }

    #[test]
    fn later_terms_win() {
        let obj = parse_queries(Dataset::new(), &["PatientName=DOE^J*", "PatientName=ROE^R*"])
            .unwrap();
        assert_eq!(obj.len(), 1);
        assert_eq!(obj.str(tags::PATIENT_NAME).as_deref(), Some("ROE^R*"));
    }

    #[test]
    fn bad_terms() {
        assert!(parse_queries(Dataset::new(), &["NotAnAttribute=1"]).is_err());
        assert!(parse_queries(Dataset::new(), &["Rows=many"]).is_err());
        assert!(parse_queries(Dataset::new(), &["ReferencedStudySequence=1"]).is_err());
    }
}
