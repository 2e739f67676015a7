//! Association requester module
//!
//! The module provides [`Association`],
//! a DICOM association in which this application entity
//! is the one requesting the association.
//!
//! # Example
//!
//! ```no_run
//! # async fn run() -> dicomlink_ul::Result<()> {
//! use dicomlink_ul::{Association, Destination, TcpConnector};
//! use tokio_util::sync::CancellationToken;
//!
//! let destination: Destination = "ANY-SCP@127.0.0.1:104".parse().unwrap();
//! let cancel = CancellationToken::new();
//! let mut association = Association::new(destination);
//! association.connect(&TcpConnector, &cancel).await?;
//! association.echo(&cancel).await?;
//! association.release().await?;
//! # Ok(())
//! # }
//! ```
use std::future::Future;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use dicomlink_encoding::{decode_dataset, uids, Dataset, TransferSyntax};
use snafu::{ensure, OptionExt, ResultExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::destination::{Destination, Timeouts};
use crate::dimse::{fragment, Command, MessageAssembler, MessageIdCounter};
use crate::error::{
    AssociationTimeoutSnafu, CancelledSnafu, ConnectSnafu, ConnectTimeoutSnafu,
    ConnectionClosedSnafu, DecodeDatasetSnafu, DimseSnafu, Error, InvalidDestinationSnafu,
    InvalidStateSnafu, NoAcceptedPresentationContextsSnafu, NoPresentationContextSnafu,
    OperationTimeoutSnafu, PeerAbortedSnafu, PeerReleasedSnafu, ProtocolVersionMismatchSnafu,
    ReceivePduSnafu, RejectedSnafu, Result, SendPduSnafu, SendTooLongPduSnafu, TruncatedPduSnafu,
    UnexpectedPduSnafu, UnknownPresentationContextSnafu, UnproposedTransferSyntaxSnafu,
    WireReadSnafu, WireSendSnafu,
};
use crate::pdu::{
    read_pdu, write_pdu, AbortRQSource, AssociationAC, AssociationRQ, PDataValueType, Pdu,
    PresentationContextProposed, PresentationContextResultReason, UserVariableItem,
    APPLICATION_CONTEXT_NAME, DEFAULT_MAX_PDU, MAXIMUM_PDU_SIZE, PDU_HEADER_SIZE,
    PROTOCOL_VERSION,
};
use crate::transport::Connector;
use crate::{IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME};

use super::{AssociationState, PresentationContextNegotiated};

/// Run an operation of an association against its deadline,
/// the caller's cancellation token and the association's shutdown token,
/// whichever comes first.
pub(crate) async fn race<T, F>(
    operation: &'static str,
    deadline: Instant,
    on_timeout: impl FnOnce() -> Error,
    cancel: &CancellationToken,
    shutdown: &CancellationToken,
    operation_future: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => CancelledSnafu { operation }.fail(),
        _ = shutdown.cancelled() => CancelledSnafu { operation }.fail(),
        outcome = tokio::time::timeout_at(deadline, operation_future) => {
            outcome.unwrap_or_else(|_| Err(on_timeout()))
        }
    }
}

/// The timeout error of a DIMSE operation or release.
pub(crate) fn operation_timeout(
    operation: &'static str,
    timeout: Duration,
) -> impl FnOnce() -> Error {
    move || OperationTimeoutSnafu { operation, timeout }.build()
}

/// One complete DIMSE message received from the peer.
#[derive(Debug)]
pub(crate) struct Message {
    pub presentation_context_id: u8,
    pub command: Command,
    pub data: Option<Vec<u8>>,
}

/// A DICOM upper layer association from the perspective
/// of the requesting application entity.
///
/// The association owns its transport stream exclusively
/// and runs one operation at a time.
/// Every operation which touches the network
/// takes a cancellation token and has its own deadline
/// (see [`Timeouts`](crate::Timeouts)).
/// Timeouts, cancellation, transport failures and protocol violations
/// make the association send a best-effort A-ABORT
/// and go straight to [`Closed`](AssociationState::Closed).
///
/// Dropping the value closes the connection without any message exchange,
/// call [`release`](Self::release) or [`close`](Self::close) beforehand.
#[derive(Debug)]
pub struct Association<S> {
    destination: Destination,
    state: AssociationState,
    /// the transport, present from connection to closing
    stream: Option<S>,
    /// buffer of received bytes not yet decoded into PDUs
    read_buffer: BytesMut,
    /// buffer to assemble PDUs before sending them on the wire
    write_buffer: Vec<u8>,
    /// the presentation contexts accepted by the acceptor
    presentation_contexts: Vec<PresentationContextNegotiated>,
    /// the maximum PDU length that the remote application entity accepts
    acceptor_max_pdu_length: u32,
    /// the maximum PDU length that this application entity expects to receive
    requestor_max_pdu_length: u32,
    peer_implementation_class_uid: Option<String>,
    message_ids: MessageIdCounter,
    last_activity: std::time::Instant,
    shutdown: CancellationToken,
    abort_sent: bool,
    /// whether to receive PDUs in strict mode
    strict: bool,
}

impl<S> Association<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create an idle association to the given destination.
    pub fn new(destination: Destination) -> Self {
        let requestor_max_pdu_length = destination.max_pdu_length();
        Association {
            destination,
            state: AssociationState::Idle,
            stream: None,
            read_buffer: BytesMut::with_capacity(DEFAULT_MAX_PDU as usize),
            write_buffer: Vec::with_capacity(DEFAULT_MAX_PDU as usize),
            presentation_contexts: Vec::new(),
            acceptor_max_pdu_length: DEFAULT_MAX_PDU,
            requestor_max_pdu_length,
            peer_implementation_class_uid: None,
            message_ids: MessageIdCounter::new(),
            last_activity: std::time::Instant::now(),
            shutdown: CancellationToken::new(),
            abort_sent: false,
            strict: true,
        }
    }

    /// Cancel every operation of this association
    /// once the given token is cancelled.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Override strict mode:
    /// whether receiving a PDU longer than
    /// the maximum PDU length stated by this node
    /// is a protocol violation.
    ///
    /// Strict by default.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Use the given time limits for the operations to come.
    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.destination = self.destination.clone().with_timeouts(timeouts);
    }

    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// Retrieve the list of negotiated presentation contexts,
    /// without the rejected ones.
    pub fn presentation_contexts(&self) -> &[PresentationContextNegotiated] {
        &self.presentation_contexts
    }

    /// Retrieve the maximum PDU length
    /// admitted by the association acceptor.
    pub fn acceptor_max_pdu_length(&self) -> u32 {
        self.acceptor_max_pdu_length
    }

    /// Retrieve the maximum PDU length
    /// that this application entity is expecting to receive.
    pub fn requestor_max_pdu_length(&self) -> u32 {
        self.requestor_max_pdu_length
    }

    /// The moment a PDU was last sent or received.
    pub fn last_activity(&self) -> std::time::Instant {
        self.last_activity
    }

    /// The implementation class UID announced by the acceptor.
    pub fn peer_implementation_class_uid(&self) -> Option<&str> {
        self.peer_implementation_class_uid.as_deref()
    }

    /// Open the transport and negotiate the association.
    ///
    /// Proposes one presentation context per supported abstract syntax
    /// (verification, query and, if the destination allows retrieval,
    /// retrieve), each offering implicit VR little endian,
    /// explicit VR little endian and explicit VR big endian,
    /// in that order of preference.
    pub async fn connect<C>(&mut self, connector: &C, cancel: &CancellationToken) -> Result<()>
    where
        C: Connector<Stream = S>,
    {
        ensure!(
            self.state == AssociationState::Idle,
            InvalidStateSnafu {
                operation: "connect",
                state: self.state,
            }
        );
        self.destination.validate().context(InvalidDestinationSnafu)?;

        let timeouts = *self.destination.timeouts();
        let host = self.destination.host().to_string();
        let port = self.destination.port();
        let shutdown = self.shutdown.clone();

        let connected = race(
            "connect",
            Instant::now() + timeouts.connect,
            || {
                ConnectTimeoutSnafu {
                    host: host.clone(),
                    port,
                    timeout: timeouts.connect,
                }
                .build()
            },
            cancel,
            &shutdown,
            async {
                connector
                    .connect(&host, port)
                    .await
                    .context(ConnectSnafu { host: &host, port })
            },
        )
        .await;
        match connected {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = AssociationState::TransportOpen;
                self.last_activity = std::time::Instant::now();
                debug!("Transport open to {}:{}", host, port);
            }
            Err(e) => {
                self.state = AssociationState::Closed;
                return Err(e);
            }
        }

        let outcome = race(
            "association",
            Instant::now() + timeouts.association,
            || {
                AssociationTimeoutSnafu {
                    timeout: timeouts.association,
                }
                .build()
            },
            cancel,
            &shutdown,
            self.negotiate(),
        )
        .await;
        self.settle(outcome).await
    }

    fn proposed_presentation_contexts(&self) -> Vec<PresentationContextProposed> {
        let mut abstract_syntaxes = vec![
            uids::VERIFICATION,
            uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
            uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_FIND,
        ];
        if self.destination.retrieve() {
            abstract_syntaxes.push(uids::STUDY_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE);
            abstract_syntaxes.push(uids::PATIENT_ROOT_QUERY_RETRIEVE_INFORMATION_MODEL_MOVE);
        }

        abstract_syntaxes
            .into_iter()
            .enumerate()
            .map(|(i, abstract_syntax)| PresentationContextProposed {
                id: (2 * i + 1) as u8,
                abstract_syntax: abstract_syntax.to_string(),
                transfer_syntaxes: TransferSyntax::ALL
                    .iter()
                    .map(|ts| ts.uid().to_string())
                    .collect(),
            })
            .collect()
    }

    async fn negotiate(&mut self) -> Result<()> {
        let presentation_contexts = self.proposed_presentation_contexts();
        let rq = AssociationRQ {
            protocol_version: PROTOCOL_VERSION,
            calling_ae_title: self.destination.calling_ae_title().to_string(),
            called_ae_title: self.destination.called_ae_title().to_string(),
            application_context_name: APPLICATION_CONTEXT_NAME.to_string(),
            presentation_contexts: presentation_contexts.clone(),
            user_variables: vec![
                UserVariableItem::MaxLength(self.requestor_max_pdu_length),
                UserVariableItem::ImplementationClassUID(IMPLEMENTATION_CLASS_UID.to_string()),
                UserVariableItem::ImplementationVersionName(
                    IMPLEMENTATION_VERSION_NAME.to_string(),
                ),
            ],
        };
        self.send(&Pdu::AssociationRQ(rq)).await?;
        self.state = AssociationState::AwaitingResponse;

        match self.receive().await? {
            Pdu::AssociationAC(ac) => self.accept(ac, &presentation_contexts),
            Pdu::AssociationRJ(association_rj) => RejectedSnafu { association_rj }.fail(),
            Pdu::AbortRQ { source } => PeerAbortedSnafu {
                abort_source: source,
            }
            .fail(),
            pdu => UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail(),
        }
    }

    /// Take in the acceptor's response to the association request.
    fn accept(
        &mut self,
        ac: AssociationAC,
        proposed: &[PresentationContextProposed],
    ) -> Result<()> {
        ensure!(
            ac.protocol_version == PROTOCOL_VERSION,
            ProtocolVersionMismatchSnafu {
                expected: PROTOCOL_VERSION,
                got: ac.protocol_version,
            }
        );

        // treat 0 as the maximum size admitted by the standard
        self.acceptor_max_pdu_length = match ac.max_length().unwrap_or(DEFAULT_MAX_PDU) {
            0 => MAXIMUM_PDU_SIZE,
            len => len,
        };
        self.peer_implementation_class_uid = ac.implementation_class_uid().map(String::from);

        let mut accepted = Vec::new();
        for result in &ac.presentation_contexts {
            if result.reason != PresentationContextResultReason::Acceptance {
                debug!(
                    "Presentation context {} rejected: {}",
                    result.id, result.reason
                );
                continue;
            }
            let Some(proposal) = proposed.iter().find(|pc| pc.id == result.id) else {
                warn!(
                    "Ignoring accepted presentation context {}, which was not proposed",
                    result.id
                );
                continue;
            };
            let transfer_syntax = TransferSyntax::from_uid(&result.transfer_syntax)
                .filter(|ts| proposal.transfer_syntaxes.iter().any(|uid| uid == ts.uid()))
                .context(UnproposedTransferSyntaxSnafu {
                    id: result.id,
                    transfer_syntax: &result.transfer_syntax,
                })?;
            accepted.push(PresentationContextNegotiated {
                id: result.id,
                abstract_syntax: proposal.abstract_syntax.clone(),
                transfer_syntax,
            });
        }
        ensure!(!accepted.is_empty(), NoAcceptedPresentationContextsSnafu);

        self.presentation_contexts = accepted;
        self.state = AssociationState::Established;
        debug!(
            "Association established with {} ({} presentation contexts, max PDU length {})",
            self.destination,
            self.presentation_contexts.len(),
            self.acceptor_max_pdu_length
        );
        Ok(())
    }

    /// Send a PDU message to the other intervenient.
    pub(crate) async fn send(&mut self, pdu: &Pdu) -> Result<()> {
        self.write_buffer.clear();
        write_pdu(&mut self.write_buffer, pdu).context(SendPduSnafu)?;
        if matches!(pdu, Pdu::PData { .. })
            && self.write_buffer.len()
                > (self.acceptor_max_pdu_length + PDU_HEADER_SIZE) as usize
        {
            return SendTooLongPduSnafu {
                length: self.write_buffer.len(),
            }
            .fail();
        }
        let stream = self.stream.as_mut().context(ConnectionClosedSnafu)?;
        stream
            .write_all(&self.write_buffer)
            .await
            .context(WireSendSnafu)?;
        stream.flush().await.context(WireSendSnafu)?;
        self.last_activity = std::time::Instant::now();
        trace!("Sent {}", pdu.short_description());
        Ok(())
    }

    /// Read a PDU message from the other intervenient.
    ///
    /// Running out of bytes in the middle of a PDU
    /// is reported as a protocol violation.
    pub(crate) async fn receive(&mut self) -> Result<Pdu> {
        loop {
            if let Some((pdu, consumed)) =
                read_pdu(&self.read_buffer, self.requestor_max_pdu_length, self.strict)
                    .context(ReceivePduSnafu)?
            {
                self.read_buffer.advance(consumed);
                self.last_activity = std::time::Instant::now();
                trace!("Received {}", pdu.short_description());
                return Ok(pdu);
            }

            let stream = self.stream.as_mut().context(ConnectionClosedSnafu)?;
            let read = stream
                .read_buf(&mut self.read_buffer)
                .await
                .context(WireReadSnafu)?;
            if read == 0 {
                ensure!(
                    self.read_buffer.is_empty(),
                    TruncatedPduSnafu {
                        buffered: self.read_buffer.len(),
                    }
                );
                return ConnectionClosedSnafu.fail();
            }
        }
    }

    /// Ensure that the association can start a new exchange.
    pub(crate) fn ensure_established(&self, operation: &'static str) -> Result<()> {
        ensure!(
            self.state == AssociationState::Established,
            InvalidStateSnafu {
                operation,
                state: self.state,
            }
        );
        Ok(())
    }

    pub(crate) fn set_state(&mut self, state: AssociationState) {
        self.state = state;
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub(crate) fn next_message_id(&mut self) -> u16 {
        self.message_ids.next_id()
    }

    /// The first accepted presentation context
    /// for any of the given abstract syntaxes, in order.
    pub(crate) fn presentation_context_for(
        &self,
        abstract_syntaxes: &[&'static str],
    ) -> Result<PresentationContextNegotiated> {
        abstract_syntaxes
            .iter()
            .find_map(|uid| {
                self.presentation_contexts
                    .iter()
                    .find(|pc| pc.abstract_syntax == *uid)
            })
            .cloned()
            .context(NoPresentationContextSnafu {
                abstract_syntax: abstract_syntaxes.first().copied().unwrap_or_default(),
            })
    }

    /// Send a DIMSE message,
    /// fragmenting the command and the data set to the acceptor's limit.
    pub(crate) async fn send_message(
        &mut self,
        presentation_context_id: u8,
        command: &Command,
        data: Option<Vec<u8>>,
    ) -> Result<()> {
        let command_bytes = command.encode().context(DimseSnafu)?;
        let mut pdus = fragment(
            presentation_context_id,
            PDataValueType::Command,
            &command_bytes,
            self.acceptor_max_pdu_length,
        );
        if let Some(data) = data {
            pdus.extend(fragment(
                presentation_context_id,
                PDataValueType::Data,
                &data,
                self.acceptor_max_pdu_length,
            ));
        }
        debug!(
            "Sending {:?} (message {:?}) on presentation context {} in {} PDUs",
            command.command_field,
            command.message_id.or(command.message_id_being_responded_to),
            presentation_context_id,
            pdus.len()
        );
        for pdu in &pdus {
            self.send(pdu).await?;
        }
        Ok(())
    }

    /// Receive one complete DIMSE message,
    /// its data set included if the command announces one.
    ///
    /// A-ABORT and A-RELEASE-RQ from the peer end the association;
    /// the latter is answered with A-RELEASE-RP.
    pub(crate) async fn receive_message(&mut self) -> Result<Message> {
        let mut assembler = MessageAssembler::new();
        let mut command: Option<Command> = None;
        loop {
            let values = match self.receive().await? {
                Pdu::PData { data } => data,
                Pdu::AbortRQ { source } => {
                    return PeerAbortedSnafu {
                        abort_source: source,
                    }
                    .fail()
                }
                Pdu::ReleaseRQ => {
                    warn!("Peer requested release during an operation");
                    if let Err(e) = self.send(&Pdu::ReleaseRP).await {
                        debug!("Could not answer release request: {}", e);
                    }
                    return PeerReleasedSnafu.fail();
                }
                pdu => return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail(),
            };
            for value in values {
                assembler.push(value).context(DimseSnafu)?;
            }

            if command.is_none() {
                if let Some(bytes) = assembler.command() {
                    command = Some(Command::decode(bytes).context(DimseSnafu)?);
                }
            }
            let ready = match &command {
                Some(cmd) if cmd.has_data_set() => assembler.take_data().map(Some),
                Some(_) => Some(None),
                None => None,
            };
            let Some(data) = ready else {
                continue;
            };
            let Some(command) = command.take() else {
                continue;
            };
            let presentation_context_id = assembler.presentation_context_id().unwrap_or_default();
            debug!(
                "Received {:?} on presentation context {} (status {:?})",
                command.command_field, presentation_context_id, command.status
            );
            return Ok(Message {
                presentation_context_id,
                command,
                data,
            });
        }
    }

    /// Decode a data set received on the given presentation context.
    pub(crate) fn decode_data(&self, presentation_context_id: u8, data: &[u8]) -> Result<Dataset> {
        let ts = self
            .presentation_contexts
            .iter()
            .find(|pc| pc.id == presentation_context_id)
            .map(|pc| pc.transfer_syntax)
            .context(UnknownPresentationContextSnafu {
                id: presentation_context_id,
            })?;
        decode_dataset(data, ts).context(DecodeDatasetSnafu)
    }

    /// Conclude an operation:
    /// errors which leave the association unusable close it.
    pub(crate) async fn settle<T>(&mut self, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            if e.is_fatal() {
                self.fail(e).await;
            }
        }
        outcome
    }

    async fn fail(&mut self, error: &Error) {
        warn!("Closing association with {}: {}", self.destination, error);
        if !error.is_connection_lost() && !matches!(error, Error::Rejected { .. }) {
            self.send_abort().await;
        }
        self.shutdown_transport().await;
        self.state = AssociationState::Closed;
    }

    /// Send A-ABORT, at most once per association.
    async fn send_abort(&mut self) {
        if self.abort_sent || self.stream.is_none() {
            return;
        }
        self.abort_sent = true;
        let pdu = Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        };
        let timeout = self.destination.timeouts().release;
        match tokio::time::timeout(timeout, self.send(&pdu)).await {
            Ok(Ok(())) => debug!("Sent A-ABORT to {}", self.destination),
            Ok(Err(e)) => debug!("Could not send A-ABORT: {}", e),
            Err(_) => debug!("Timed out sending A-ABORT"),
        }
    }

    async fn shutdown_transport(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let timeout = self.destination.timeouts().release;
            let _ = tokio::time::timeout(timeout, stream.shutdown()).await;
        }
        self.read_buffer.clear();
    }

    /// Gracefully terminate the association by exchanging release messages
    /// and then shutting down the connection.
    ///
    /// If the peer does not answer within the release timeout,
    /// the association is aborted instead.
    /// Either way, the association ends closed.
    pub async fn release(&mut self) -> Result<()> {
        self.ensure_established("release")?;
        let timeout = self.destination.timeouts().release;
        let shutdown = self.shutdown.clone();
        let outcome = race(
            "release",
            Instant::now() + timeout,
            operation_timeout("release", timeout),
            &shutdown,
            &shutdown,
            self.release_impl(),
        )
        .await;
        let outcome = self.settle(outcome).await;
        self.shutdown_transport().await;
        self.state = AssociationState::Closed;
        if outcome.is_ok() {
            debug!("Association with {} released", self.destination);
        }
        outcome
    }

    /// Release implementation function,
    /// which tries to send a release request and receive a release response.
    async fn release_impl(&mut self) -> Result<()> {
        self.send(&Pdu::ReleaseRQ).await?;
        self.state = AssociationState::AwaitingResponse;
        loop {
            match self.receive().await? {
                Pdu::ReleaseRP => return Ok(()),
                // release collision
                Pdu::ReleaseRQ => {
                    self.send(&Pdu::ReleaseRP).await?;
                    return Ok(());
                }
                Pdu::PData { .. } => {
                    warn!("Ignoring P-DATA-TF received while releasing");
                }
                Pdu::AbortRQ { source } => {
                    return PeerAbortedSnafu {
                        abort_source: source,
                    }
                    .fail()
                }
                pdu => return UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail(),
            }
        }
    }

    /// Abort the association:
    /// send A-ABORT (unless one was sent already or the connection is gone)
    /// and shut down the connection.
    ///
    /// Closing an association which is already closed does nothing.
    pub async fn close(&mut self) {
        if self.state == AssociationState::Closed {
            return;
        }
        self.send_abort().await;
        self.shutdown_transport().await;
        self.state = AssociationState::Closed;
        debug!("Association with {} closed", self.destination);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{decode_pdu, AssociationRJ, AssociationRJResult, AssociationRJSource};
    use crate::pdu::{AssociationRJServiceUserReason, PresentationContextResult};
    use crate::transport::Connector;
    use crate::ErrorKind;
    use async_trait::async_trait;
    use tokio::io::DuplexStream;
    use tokio::sync::Mutex;

    /// Hands out one end of an in-memory pipe.
    struct PipeConnector(Mutex<Option<DuplexStream>>);

    #[async_trait]
    impl Connector for PipeConnector {
        type Stream = DuplexStream;

        async fn connect(&self, _host: &str, _port: u16) -> std::io::Result<DuplexStream> {
            self.0.lock().await.take().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "used")
            })
        }
    }

    fn pipe() -> (PipeConnector, DuplexStream) {
        let (client, server) = tokio::io::duplex(1 << 16);
        (PipeConnector(Mutex::new(Some(client))), server)
    }

    async fn read_one(stream: &mut DuplexStream) -> Pdu {
        let mut header = [0u8; 6];
        stream.read_exact(&mut header).await.unwrap();
        let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;
        let mut bytes = header.to_vec();
        bytes.resize(6 + len, 0);
        stream.read_exact(&mut bytes[6..]).await.unwrap();
        decode_pdu(&bytes).unwrap()
    }

    async fn write_one(stream: &mut DuplexStream, pdu: &Pdu) {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, pdu).unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    fn destination() -> Destination {
        Destination::new("pipe", 104, "ANY-SCP")
    }

    fn accept_all(rq: &AssociationRQ) -> AssociationAC {
        AssociationAC {
            protocol_version: PROTOCOL_VERSION,
            calling_ae_title: rq.calling_ae_title.clone(),
            called_ae_title: rq.called_ae_title.clone(),
            application_context_name: rq.application_context_name.clone(),
            presentation_contexts: rq
                .presentation_contexts
                .iter()
                .map(|pc| PresentationContextResult {
                    id: pc.id,
                    reason: PresentationContextResultReason::Acceptance,
                    transfer_syntax: pc.transfer_syntaxes[0].clone(),
                })
                .collect(),
            user_variables: vec![UserVariableItem::MaxLength(0)],
        }
    }

    #[tokio::test]
    async fn negotiates_proposed_contexts() {
        let (connector, mut server) = pipe();
        let peer = tokio::spawn(async move {
            let Pdu::AssociationRQ(rq) = read_one(&mut server).await else {
                panic!("expected association request");
            };
            assert_eq!(rq.calling_ae_title, "THIS-SCU");
            assert_eq!(rq.called_ae_title, "ANY-SCP");
            let ids: Vec<u8> = rq.presentation_contexts.iter().map(|pc| pc.id).collect();
            assert_eq!(ids, vec![1, 3, 5]);
            assert_eq!(
                rq.presentation_contexts[0].transfer_syntaxes,
                vec![
                    uids::IMPLICIT_VR_LITTLE_ENDIAN,
                    uids::EXPLICIT_VR_LITTLE_ENDIAN,
                    uids::EXPLICIT_VR_BIG_ENDIAN,
                ]
            );
            write_one(&mut server, &Pdu::AssociationAC(accept_all(&rq))).await;
            server
        });

        let cancel = CancellationToken::new();
        let mut association = Association::new(destination());
        assert_eq!(association.state(), AssociationState::Idle);
        association.connect(&connector, &cancel).await.unwrap();
        assert_eq!(association.state(), AssociationState::Established);
        assert_eq!(association.presentation_contexts().len(), 3);
        assert_eq!(
            association.presentation_contexts()[0].transfer_syntax,
            TransferSyntax::ImplicitVrLittleEndian
        );
        // 0 means unlimited
        assert_eq!(association.acceptor_max_pdu_length(), MAXIMUM_PDU_SIZE);
        let _server = peer.await.unwrap();

        // cannot connect twice
        let err = association.connect(&connector, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert_eq!(association.state(), AssociationState::Established);
    }

    #[tokio::test]
    async fn rejection_closes_the_association() {
        let (connector, mut server) = pipe();
        let peer = tokio::spawn(async move {
            let _ = read_one(&mut server).await;
            let rj = AssociationRJ {
                result: AssociationRJResult::Permanent,
                source: AssociationRJSource::ServiceUser(
                    AssociationRJServiceUserReason::CalledAETitleNotRecognized,
                ),
            };
            write_one(&mut server, &Pdu::AssociationRJ(rj)).await;
            // no abort follows a rejection
            let mut rest = Vec::new();
            server.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let mut association = Association::new(destination());
        let err = association
            .connect(&connector, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AssociationRejected);
        assert!(matches!(err, Error::Rejected { .. }));
        assert_eq!(association.state(), AssociationState::Closed);
        assert!(peer.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn operations_require_an_established_association() {
        let mut association: Association<DuplexStream> = Association::new(destination());
        let err = association.release().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: AssociationState::Idle,
                ..
            }
        ));
        // closing an idle association is fine
        association.close().await;
        association.close().await;
        assert_eq!(association.state(), AssociationState::Closed);
    }

    #[tokio::test]
    async fn cancellation_closes_the_association() {
        let (connector, mut server) = pipe();
        let peer = tokio::spawn(async move {
            let _ = read_one(&mut server).await;
            // never answer, expect an abort
            read_one(&mut server).await
        });

        let cancel = CancellationToken::new();
        let mut association = Association::new(destination());
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let err = association.connect(&connector, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(association.state(), AssociationState::Closed);
        assert!(matches!(
            peer.await.unwrap(),
            Pdu::AbortRQ {
                source: AbortRQSource::ServiceUser
            }
        ));
    }
}
