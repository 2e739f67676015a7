//! DIMSE command sets.
use dicomlink_encoding::{decode_dataset, encode_dataset, tags, Dataset, Tag, TransferSyntax};
use snafu::{OptionExt, ResultExt};

use super::{
    CommandField, DataSetType, DecodeCommandSnafu, EncodeCommandSnafu,
    InvalidCommandElementSnafu, MissingCommandElementSnafu, Priority, Result,
    UnknownCommandFieldSnafu,
};

/// A DIMSE command, requests and responses alike.
///
/// Only the command elements used by the composite services
/// (C-ECHO, C-FIND, C-MOVE, C-GET, C-STORE and C-CANCEL) are represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_field: CommandField,
    pub affected_sop_class_uid: Option<String>,
    pub message_id: Option<u16>,
    pub message_id_being_responded_to: Option<u16>,
    pub priority: Option<Priority>,
    pub data_set_type: DataSetType,
    /// present only on responses
    pub status: Option<u16>,
    pub move_destination: Option<String>,
    pub error_comment: Option<String>,
    pub remaining_suboperations: Option<u16>,
    pub completed_suboperations: Option<u16>,
    pub failed_suboperations: Option<u16>,
    pub warning_suboperations: Option<u16>,
}

impl Command {
    fn request(
        command_field: CommandField,
        message_id: u16,
        affected_sop_class_uid: &str,
        priority: Option<Priority>,
        data_set_type: DataSetType,
    ) -> Self {
        Command {
            command_field,
            affected_sop_class_uid: Some(affected_sop_class_uid.to_string()),
            message_id: Some(message_id),
            message_id_being_responded_to: None,
            priority,
            data_set_type,
            status: None,
            move_destination: None,
            error_comment: None,
            remaining_suboperations: None,
            completed_suboperations: None,
            failed_suboperations: None,
            warning_suboperations: None,
        }
    }

    /// A C-ECHO-RQ on the verification SOP class.
    pub fn echo_rq(message_id: u16) -> Self {
        Command::request(
            CommandField::C_ECHO_RQ,
            message_id,
            dicomlink_encoding::uids::VERIFICATION,
            None,
            DataSetType::Absent,
        )
    }

    /// A C-FIND-RQ, to be followed by the query identifier.
    pub fn find_rq(message_id: u16, affected_sop_class_uid: &str, priority: Priority) -> Self {
        Command::request(
            CommandField::C_FIND_RQ,
            message_id,
            affected_sop_class_uid,
            Some(priority),
            DataSetType::Present,
        )
    }

    /// A C-MOVE-RQ, to be followed by the identifier of what to move.
    pub fn move_rq(
        message_id: u16,
        affected_sop_class_uid: &str,
        priority: Priority,
        move_destination: &str,
    ) -> Self {
        Command {
            move_destination: Some(move_destination.to_string()),
            ..Command::request(
                CommandField::C_MOVE_RQ,
                message_id,
                affected_sop_class_uid,
                Some(priority),
                DataSetType::Present,
            )
        }
    }

    /// A C-CANCEL-RQ for the operation started by the given message.
    pub fn cancel_rq(message_id_being_responded_to: u16) -> Self {
        Command {
            command_field: CommandField::C_CANCEL_RQ,
            affected_sop_class_uid: None,
            message_id: None,
            message_id_being_responded_to: Some(message_id_being_responded_to),
            priority: None,
            data_set_type: DataSetType::Absent,
            status: None,
            move_destination: None,
            error_comment: None,
            remaining_suboperations: None,
            completed_suboperations: None,
            failed_suboperations: None,
            warning_suboperations: None,
        }
    }

    /// A response to the given request.
    pub fn response(
        command_field: CommandField,
        request: &Command,
        status: u16,
        data_set_type: DataSetType,
    ) -> Self {
        Command {
            command_field,
            affected_sop_class_uid: request.affected_sop_class_uid.clone(),
            message_id: None,
            message_id_being_responded_to: request.message_id,
            priority: None,
            data_set_type,
            status: Some(status),
            move_destination: None,
            error_comment: None,
            remaining_suboperations: None,
            completed_suboperations: None,
            failed_suboperations: None,
            warning_suboperations: None,
        }
    }

    /// Whether a data set follows this command.
    pub fn has_data_set(&self) -> bool {
        self.data_set_type == DataSetType::Present
    }

    /// Build the command set, including the command group length.
    pub fn to_dataset(&self) -> Result<Dataset> {
        let mut dataset = Dataset::new();
        if let Some(uid) = &self.affected_sop_class_uid {
            dataset.put_str(tags::AFFECTED_SOP_CLASS_UID, uid);
        }
        dataset.put_u16(tags::COMMAND_FIELD, self.command_field as u16);
        if let Some(id) = self.message_id {
            dataset.put_u16(tags::MESSAGE_ID, id);
        }
        if let Some(id) = self.message_id_being_responded_to {
            dataset.put_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, id);
        }
        if let Some(ae_title) = &self.move_destination {
            dataset.put_str(tags::MOVE_DESTINATION, ae_title);
        }
        if let Some(priority) = self.priority {
            dataset.put_u16(tags::PRIORITY, priority as u16);
        }
        dataset.put_u16(tags::COMMAND_DATA_SET_TYPE, self.data_set_type as u16);
        if let Some(status) = self.status {
            dataset.put_u16(tags::STATUS, status);
        }
        if let Some(comment) = &self.error_comment {
            dataset.put_str(tags::ERROR_COMMENT, comment);
        }
        for (tag, count) in [
            (tags::NUMBER_OF_REMAINING_SUBOPERATIONS, self.remaining_suboperations),
            (tags::NUMBER_OF_COMPLETED_SUBOPERATIONS, self.completed_suboperations),
            (tags::NUMBER_OF_FAILED_SUBOPERATIONS, self.failed_suboperations),
            (tags::NUMBER_OF_WARNING_SUBOPERATIONS, self.warning_suboperations),
        ] {
            if let Some(count) = count {
                dataset.put_u16(tag, count);
            }
        }

        // the group length covers all of the elements after it
        let length = encode_dataset(&dataset, TransferSyntax::ImplicitVrLittleEndian)
            .context(EncodeCommandSnafu)?
            .len();
        dataset.put_u32(tags::COMMAND_GROUP_LENGTH, length as u32);
        Ok(dataset)
    }

    /// Encode the command set in _Implicit VR Little Endian_.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let dataset = self.to_dataset()?;
        encode_dataset(&dataset, TransferSyntax::ImplicitVrLittleEndian).context(EncodeCommandSnafu)
    }

    /// Read a command from its command set.
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let command_field = required_u16(dataset, tags::COMMAND_FIELD)?;
        let command_field = CommandField::from_u16(command_field)
            .context(UnknownCommandFieldSnafu { command_field })?;
        let data_set_type =
            DataSetType::from_u16(required_u16(dataset, tags::COMMAND_DATA_SET_TYPE)?);
        let priority = match dataset.u16(tags::PRIORITY) {
            None => None,
            Some(0x0000) => Some(Priority::Medium),
            Some(0x0001) => Some(Priority::High),
            Some(0x0002) => Some(Priority::Low),
            Some(_) => return InvalidCommandElementSnafu { tag: tags::PRIORITY }.fail(),
        };

        Ok(Command {
            command_field,
            affected_sop_class_uid: dataset.non_empty_str(tags::AFFECTED_SOP_CLASS_UID),
            message_id: dataset.u16(tags::MESSAGE_ID),
            message_id_being_responded_to: dataset.u16(tags::MESSAGE_ID_BEING_RESPONDED_TO),
            priority,
            data_set_type,
            status: dataset.u16(tags::STATUS),
            move_destination: dataset.non_empty_str(tags::MOVE_DESTINATION),
            error_comment: dataset.non_empty_str(tags::ERROR_COMMENT),
            remaining_suboperations: dataset.u16(tags::NUMBER_OF_REMAINING_SUBOPERATIONS),
            completed_suboperations: dataset.u16(tags::NUMBER_OF_COMPLETED_SUBOPERATIONS),
            failed_suboperations: dataset.u16(tags::NUMBER_OF_FAILED_SUBOPERATIONS),
            warning_suboperations: dataset.u16(tags::NUMBER_OF_WARNING_SUBOPERATIONS),
        })
    }

    /// Decode a command set in _Implicit VR Little Endian_.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let dataset = decode_dataset(bytes, TransferSyntax::ImplicitVrLittleEndian)
            .context(DecodeCommandSnafu)?;
        Command::from_dataset(&dataset)
    }
}

fn required_u16(dataset: &Dataset, tag: Tag) -> Result<u16> {
    let element = dataset.get(tag).context(MissingCommandElementSnafu { tag })?;
    element.to_u16().context(InvalidCommandElementSnafu { tag })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimse::Error;
    use dicomlink_encoding::uids;

    #[test]
    fn encode_echo_rq() {
        #[rustfmt::skip]
        const EXPECTED: &[u8] = &[
            // (0000,0000) UL 56
            0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x38, 0x00, 0x00, 0x00,
            // (0000,0002) UI 1.2.840.10008.1.1 + NUL
            0x00, 0x00, 0x02, 0x00, 0x12, 0x00, 0x00, 0x00,
            b'1', b'.', b'2', b'.', b'8', b'4', b'0', b'.', b'1',
            b'0', b'0', b'0', b'8', b'.', b'1', b'.', b'1', 0x00,
            // (0000,0100) US 0030H
            0x00, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0x30, 0x00,
            // (0000,0110) US 7
            0x00, 0x00, 0x10, 0x01, 0x02, 0x00, 0x00, 0x00, 0x07, 0x00,
            // (0000,0800) US 0101H
            0x00, 0x00, 0x00, 0x08, 0x02, 0x00, 0x00, 0x00, 0x01, 0x01,
        ];
        let bytes = Command::echo_rq(7).encode().unwrap();
        assert_eq!(bytes, EXPECTED);
    }

    #[test]
    fn find_rq_round_trip() {
        let command = Command::find_rq(
            3,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            Priority::Medium,
        );
        let decoded = Command::decode(&command.encode().unwrap()).unwrap();
        assert_eq!(decoded, command);
        assert!(decoded.has_data_set());
        assert_eq!(decoded.priority, Some(Priority::Medium));
    }

    #[test]
    fn move_rsp_with_counts() {
        let request = Command::move_rq(
            9,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            Priority::High,
            "STORE-SCP",
        );
        let mut response = Command::response(
            CommandField::C_MOVE_RSP,
            &request,
            0xFF00,
            DataSetType::Absent,
        );
        response.remaining_suboperations = Some(3);
        response.completed_suboperations = Some(1);
        response.failed_suboperations = Some(0);
        response.warning_suboperations = Some(0);

        let dataset = response.to_dataset().unwrap();
        assert_eq!(dataset.u16(tags::MESSAGE_ID_BEING_RESPONDED_TO), Some(9));
        let decoded = Command::from_dataset(&dataset).unwrap();
        assert_eq!(decoded, response);

        let request_set = request.to_dataset().unwrap();
        assert_eq!(
            request_set.str(tags::MOVE_DESTINATION).as_deref(),
            Some("STORE-SCP")
        );
    }

    #[test]
    fn missing_command_field() {
        let mut dataset = Dataset::new();
        dataset.put_u16(tags::COMMAND_DATA_SET_TYPE, 0x0101);
        assert!(matches!(
            Command::from_dataset(&dataset),
            Err(Error::MissingCommandElement { tag, .. }) if tag == tags::COMMAND_FIELD
        ));

        dataset.put_u16(tags::COMMAND_FIELD, 0x0042);
        assert!(matches!(
            Command::from_dataset(&dataset),
            Err(Error::UnknownCommandField {
                command_field: 0x0042,
                ..
            })
        ));
    }
}
