//! C-ECHO, C-FIND and C-MOVE as operations of an association.
use std::time::Duration;

use dicomlink_encoding::{encode_dataset, tags, uids, Dataset};
use snafu::{ensure, OptionExt, ResultExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::association::client::{operation_timeout, race, Message};
use crate::association::{Association, AssociationState, PresentationContextNegotiated};
use crate::destination::validate_ae_title;
use crate::error::{
    DimseFailureSnafu, DimseSnafu, EncodeDatasetSnafu, InvalidDestinationSnafu,
    MessageIdMismatchSnafu, MissingResponseDatasetSnafu, Result, UnexpectedResponseSnafu,
};

use super::query::{
    InstanceQuery, InstanceRecord, QueryLevel, SeriesQuery, SeriesRecord, StudyQuery, StudyRecord,
};
use super::{Command, CommandField, MissingCommandElementSnafu, Priority, StatusClass};

/// Check that a message is the expected response to a request,
/// and obtain its status.
fn response_status(command: &Command, expected: CommandField, message_id: u16) -> Result<u16> {
    ensure!(
        command.command_field == expected,
        UnexpectedResponseSnafu {
            expected,
            got: command.command_field as u16,
        }
    );
    let responded_to = command
        .message_id_being_responded_to
        .context(MissingCommandElementSnafu {
            tag: tags::MESSAGE_ID_BEING_RESPONDED_TO,
        })
        .context(DimseSnafu)?;
    ensure!(
        responded_to == message_id,
        MessageIdMismatchSnafu {
            expected: message_id,
            got: responded_to,
        }
    );
    command
        .status
        .context(MissingCommandElementSnafu { tag: tags::STATUS })
        .context(DimseSnafu)
}

/// Set the query/retrieve level of an identifier.
fn with_level(query: &Dataset, level: QueryLevel) -> Dataset {
    let mut query = query.clone();
    match query.non_empty_str(tags::QUERY_RETRIEVE_LEVEL) {
        Some(current) if current == level.as_str() => {}
        Some(current) => {
            warn!(
                "Query/Retrieve Level {} in identifier replaced by {}",
                current, level
            );
            query.put_str(tags::QUERY_RETRIEVE_LEVEL, level.as_str());
        }
        None => {
            query.put_str(tags::QUERY_RETRIEVE_LEVEL, level.as_str());
        }
    }
    query
}

/// The information models usable for a query at the given level,
/// in order of preference.
fn find_models(level: QueryLevel) -> &'static [&'static str] {
    match level {
        QueryLevel::Patient => &[uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND],
        _ => &[
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
        ],
    }
}

fn move_models(level: QueryLevel) -> &'static [&'static str] {
    match level {
        QueryLevel::Patient => &[uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE],
        _ => &[
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
        ],
    }
}

/// The sub-operation counters of a C-MOVE.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveOutcome {
    /// the final status, success or warning
    pub status: u16,
    pub completed: u16,
    pub failed: u16,
    pub warning: u16,
    pub remaining: u16,
}

impl MoveOutcome {
    fn update(&mut self, command: &Command) {
        self.completed = command.completed_suboperations.unwrap_or(self.completed);
        self.failed = command.failed_suboperations.unwrap_or(self.failed);
        self.warning = command.warning_suboperations.unwrap_or(self.warning);
        self.remaining = command.remaining_suboperations.unwrap_or(self.remaining);
    }
}

impl<S> Association<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Verify the connection with the peer through a C-ECHO exchange.
    ///
    /// Fails with a DIMSE failure if the status is not success.
    pub async fn echo(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.ensure_established("C-ECHO")?;
        let context = self.presentation_context_for(&[uids::VERIFICATION])?;
        let timeout = self.destination().timeouts().echo;
        let shutdown = self.shutdown_token();
        let outcome = race(
            "C-ECHO",
            Instant::now() + timeout,
            operation_timeout("C-ECHO", timeout),
            cancel,
            &shutdown,
            self.echo_exchange(&context),
        )
        .await;
        self.settle(outcome).await
    }

    async fn echo_exchange(&mut self, context: &PresentationContextNegotiated) -> Result<()> {
        let message_id = self.next_message_id();
        self.set_state(AssociationState::AwaitingResponse);
        self.send_message(context.id, &Command::echo_rq(message_id), None)
            .await?;

        let Message { command, .. } = self.receive_message().await?;
        let status = response_status(&command, CommandField::C_ECHO_RSP, message_id)?;
        self.set_state(AssociationState::Established);
        ensure!(
            status == super::status::SUCCESS,
            DimseFailureSnafu {
                operation: "C-ECHO",
                status,
                error_comment: command.error_comment,
            }
        );
        debug!("C-ECHO succeeded");
        Ok(())
    }

    /// Send a C-FIND request with the given identifier.
    ///
    /// The query/retrieve level of the identifier is set to `level`.
    /// Study, series and image level queries use
    /// the Study Root information model if it was accepted,
    /// the Patient Root one otherwise.
    ///
    /// The returned [`FindResponses`] yields the matches as they arrive.
    /// It must be consumed to the end,
    /// [cancelled](FindResponses::cancel),
    /// or the association closed,
    /// before the association can be used again.
    pub async fn find(
        &mut self,
        cancel: &CancellationToken,
        query: &Dataset,
        level: QueryLevel,
    ) -> Result<FindResponses<'_, S>> {
        self.ensure_established("C-FIND")?;
        let context = self.presentation_context_for(find_models(level))?;
        let query = with_level(query, level);
        let data = encode_dataset(&query, context.transfer_syntax).context(EncodeDatasetSnafu)?;

        let timeout = self.destination().timeouts().find;
        let deadline = Instant::now() + timeout;
        let message_id = self.next_message_id();
        let command = Command::find_rq(message_id, &context.abstract_syntax, Priority::Medium);
        let shutdown = self.shutdown_token();
        let outcome = race(
            "C-FIND",
            deadline,
            operation_timeout("C-FIND", timeout),
            cancel,
            &shutdown,
            async {
                self.set_state(AssociationState::AwaitingResponse);
                self.send_message(context.id, &command, Some(data)).await
            },
        )
        .await;
        self.settle(outcome).await?;

        Ok(FindResponses {
            association: self,
            cancel: cancel.clone(),
            context,
            message_id,
            deadline,
            timeout,
            cancel_sent: false,
            done: false,
        })
    }

    /// Receive the next C-FIND response,
    /// `None` meaning that the final response arrived.
    async fn next_find_response(
        &mut self,
        message_id: u16,
        cancel_sent: bool,
    ) -> Result<Option<Dataset>> {
        let Message {
            presentation_context_id,
            command,
            data,
        } = self.receive_message().await?;
        let status = response_status(&command, CommandField::C_FIND_RSP, message_id)?;

        match StatusClass::of(status) {
            StatusClass::Pending => {
                let data = data.context(MissingResponseDatasetSnafu {
                    operation: "C-FIND",
                })?;
                self.decode_data(presentation_context_id, &data).map(Some)
            }
            StatusClass::Success => {
                self.set_state(AssociationState::Established);
                Ok(None)
            }
            StatusClass::Cancel if cancel_sent => {
                self.set_state(AssociationState::Established);
                Ok(None)
            }
            _ => {
                self.set_state(AssociationState::Established);
                DimseFailureSnafu {
                    operation: "C-FIND",
                    status,
                    error_comment: command.error_comment,
                }
                .fail()
            }
        }
    }

    /// Run a study level query and collect the matches.
    pub async fn find_studies(
        &mut self,
        cancel: &CancellationToken,
        query: &StudyQuery,
    ) -> Result<Vec<StudyRecord>> {
        let matches = self
            .find(cancel, &query.to_dataset(), QueryLevel::Study)
            .await?
            .collect()
            .await?;
        Ok(matches.iter().map(StudyRecord::from_dataset).collect())
    }

    /// Run a series level query and collect the matches.
    pub async fn find_series(
        &mut self,
        cancel: &CancellationToken,
        query: &SeriesQuery,
    ) -> Result<Vec<SeriesRecord>> {
        let matches = self
            .find(cancel, &query.to_dataset(), QueryLevel::Series)
            .await?
            .collect()
            .await?;
        Ok(matches.iter().map(SeriesRecord::from_dataset).collect())
    }

    /// Run an instance level query and collect the matches.
    pub async fn find_instances(
        &mut self,
        cancel: &CancellationToken,
        query: &InstanceQuery,
    ) -> Result<Vec<InstanceRecord>> {
        let matches = self
            .find(cancel, &query.to_dataset(), QueryLevel::Image)
            .await?
            .collect()
            .await?;
        Ok(matches.iter().map(InstanceRecord::from_dataset).collect())
    }

    /// Ask the peer to send the matching instances
    /// to the application entity `move_destination` through a C-MOVE.
    ///
    /// The instances travel over separate associations
    /// initiated by the peer;
    /// this only follows the progress of the sub-operations.
    /// Requires a destination with retrieval enabled.
    pub async fn move_study(
        &mut self,
        cancel: &CancellationToken,
        query: &Dataset,
        level: QueryLevel,
        move_destination: &str,
    ) -> Result<MoveOutcome> {
        self.ensure_established("C-MOVE")?;
        validate_ae_title(move_destination).context(InvalidDestinationSnafu)?;
        let context = self.presentation_context_for(move_models(level))?;
        let query = with_level(query, level);
        let data = encode_dataset(&query, context.transfer_syntax).context(EncodeDatasetSnafu)?;

        let timeout = self.destination().timeouts().retrieve;
        let shutdown = self.shutdown_token();
        let outcome = race(
            "C-MOVE",
            Instant::now() + timeout,
            operation_timeout("C-MOVE", timeout),
            cancel,
            &shutdown,
            self.move_exchange(&context, data, move_destination),
        )
        .await;
        self.settle(outcome).await
    }

    async fn move_exchange(
        &mut self,
        context: &PresentationContextNegotiated,
        data: Vec<u8>,
        move_destination: &str,
    ) -> Result<MoveOutcome> {
        let message_id = self.next_message_id();
        let command = Command::move_rq(
            message_id,
            &context.abstract_syntax,
            Priority::Medium,
            move_destination,
        );
        self.set_state(AssociationState::AwaitingResponse);
        self.send_message(context.id, &command, Some(data)).await?;

        let mut outcome = MoveOutcome::default();
        loop {
            let Message { command, .. } = self.receive_message().await?;
            let status = response_status(&command, CommandField::C_MOVE_RSP, message_id)?;
            outcome.update(&command);
            outcome.status = status;
            match StatusClass::of(status) {
                StatusClass::Pending => {
                    debug!(
                        "C-MOVE pending: {} completed, {} remaining",
                        outcome.completed, outcome.remaining
                    );
                }
                StatusClass::Success | StatusClass::Warning => {
                    self.set_state(AssociationState::Established);
                    return Ok(outcome);
                }
                StatusClass::Cancel | StatusClass::Failure => {
                    self.set_state(AssociationState::Established);
                    return DimseFailureSnafu {
                        operation: "C-MOVE",
                        status,
                        error_comment: command.error_comment,
                    }
                    .fail();
                }
            }
        }
    }
}

/// The responses to a C-FIND request.
///
/// Each call to [`next`](Self::next) waits for one more pending response
/// and yields its data set,
/// until the final response ends the sequence.
/// The whole exchange shares the C-FIND deadline.
#[derive(Debug)]
pub struct FindResponses<'a, S> {
    association: &'a mut Association<S>,
    cancel: CancellationToken,
    context: PresentationContextNegotiated,
    message_id: u16,
    deadline: Instant,
    timeout: Duration,
    cancel_sent: bool,
    done: bool,
}

impl<S> FindResponses<'_, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wait for the next match.
    ///
    /// Returns `Ok(None)` once the peer reported
    /// the successful end of the query.
    /// Any other final status is an error.
    pub async fn next(&mut self) -> Result<Option<Dataset>> {
        if self.done {
            return Ok(None);
        }
        let shutdown = self.association.shutdown_token();
        let outcome = race(
            "C-FIND",
            self.deadline,
            operation_timeout("C-FIND", self.timeout),
            &self.cancel,
            &shutdown,
            self.association
                .next_find_response(self.message_id, self.cancel_sent),
        )
        .await;
        let outcome = self.association.settle(outcome).await;
        if !matches!(outcome, Ok(Some(_))) {
            self.done = true;
        }
        outcome
    }

    /// Collect the remaining matches.
    pub async fn collect(mut self) -> Result<Vec<Dataset>> {
        let mut matches = Vec::new();
        while let Some(dataset) = self.next().await? {
            matches.push(dataset);
        }
        debug!("C-FIND completed with {} matches", matches.len());
        Ok(matches)
    }

    /// Send a C-CANCEL request for this query,
    /// then discard responses until the final one.
    pub async fn cancel(mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        let command = Command::cancel_rq(self.message_id);
        let shutdown = self.association.shutdown_token();
        let outcome = race(
            "C-CANCEL",
            self.deadline,
            operation_timeout("C-FIND", self.timeout),
            &self.cancel,
            &shutdown,
            self.association.send_message(self.context.id, &command, None),
        )
        .await;
        self.association.settle(outcome).await?;
        self.cancel_sent = true;

        let mut discarded = 0;
        while self.next().await?.is_some() {
            discarded += 1;
        }
        debug!("C-FIND cancelled, {} late matches discarded", discarded);
        Ok(())
    }

    /// Whether the final response was received.
    pub fn is_done(&self) -> bool {
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimse::DataSetType;
    use crate::error::Error;

    #[test]
    fn response_checks() {
        let request = Command::find_rq(
            7,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            Priority::Medium,
        );
        let response = Command::response(
            CommandField::C_FIND_RSP,
            &request,
            super::super::status::PENDING,
            DataSetType::Present,
        );
        assert_eq!(
            response_status(&response, CommandField::C_FIND_RSP, 7).unwrap(),
            0xFF00
        );
        assert!(matches!(
            response_status(&response, CommandField::C_FIND_RSP, 8),
            Err(Error::MessageIdMismatch {
                expected: 8,
                got: 7,
                ..
            })
        ));
        assert!(matches!(
            response_status(&response, CommandField::C_ECHO_RSP, 7),
            Err(Error::UnexpectedResponse { got: 0x8020, .. })
        ));
    }

    #[test]
    fn query_level_is_enforced() {
        let mut query = Dataset::new();
        query.put_str(tags::QUERY_RETRIEVE_LEVEL, "PATIENT");
        query.put_str(tags::PATIENT_ID, "X");
        let query = with_level(&query, QueryLevel::Study);
        assert_eq!(
            query.str(tags::QUERY_RETRIEVE_LEVEL).as_deref(),
            Some("STUDY")
        );
        assert_eq!(query.str(tags::PATIENT_ID).as_deref(), Some("X"));

        let query = with_level(&Dataset::new(), QueryLevel::Image);
        assert_eq!(
            query.str(tags::QUERY_RETRIEVE_LEVEL).as_deref(),
            Some("IMAGE")
        );
    }

    #[test]
    fn move_counters() {
        let request = Command::move_rq(
            3,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE,
            Priority::Medium,
            "STORE-SCP",
        );
        let mut response = Command::response(
            CommandField::C_MOVE_RSP,
            &request,
            super::super::status::PENDING,
            DataSetType::Absent,
        );
        response.completed_suboperations = Some(2);
        response.remaining_suboperations = Some(5);
        let mut outcome = MoveOutcome::default();
        outcome.update(&response);
        response.completed_suboperations = None;
        response.failed_suboperations = Some(1);
        outcome.update(&response);
        assert_eq!(
            outcome,
            MoveOutcome {
                status: 0,
                completed: 2,
                failed: 1,
                warning: 0,
                remaining: 5,
            }
        );
    }
}
