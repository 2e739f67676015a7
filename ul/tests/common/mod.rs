//! A scripted acceptor for exercising associations over real TCP sockets.
#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;

use dicomlink_encoding::{encode_dataset, Dataset, TransferSyntax};
use dicomlink_ul::dimse::{fragment, Command, MessageAssembler};
use dicomlink_ul::pdu::{
    decode_pdu, AssociationAC, AssociationRQ, PDataValueType, Pdu, PresentationContextResult,
    PresentationContextResultReason, UserVariableItem, MINIMUM_PDU_SIZE,
};
use dicomlink_ul::{write_pdu, Destination, Timeouts};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync + 'static>>;

pub static SCU_AE_TITLE: &str = "QUERY-SCU";
pub static SCP_AE_TITLE: &str = "QUERY-SCP";

/// Bind a listener on the loopback interface
/// and run the given script against it in the background.
pub async fn spawn_scp<F, Fut, T>(script: F) -> Result<(JoinHandle<Result<T>>, SocketAddr)>
where
    F: FnOnce(TcpListener) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("localhost:0").await?;
    let addr = listener.local_addr()?;
    Ok((tokio::spawn(script(listener)), addr))
}

pub fn destination(addr: SocketAddr) -> Destination {
    Destination::new(addr.ip().to_string(), addr.port(), SCP_AE_TITLE)
        .with_calling_ae_title(SCU_AE_TITLE)
}

pub fn destination_with_timeouts(addr: SocketAddr, timeouts: Timeouts) -> Destination {
    destination(addr).with_timeouts(timeouts)
}

/// Read one whole PDU from the stream.
pub async fn read_pdu(stream: &mut TcpStream) -> Result<Pdu> {
    let mut bytes = vec![0_u8; 6];
    stream.read_exact(&mut bytes).await?;
    let length = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
    bytes.resize(6 + length, 0);
    stream.read_exact(&mut bytes[6..]).await?;
    Ok(decode_pdu(&bytes)?)
}

pub async fn send_pdu(stream: &mut TcpStream, pdu: &Pdu) -> Result<()> {
    let mut bytes = Vec::new();
    write_pdu(&mut bytes, pdu)?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Accept every proposed presentation context
/// with the given transfer syntax.
pub fn accept_all(rq: &AssociationRQ, transfer_syntax: &str) -> AssociationAC {
    AssociationAC {
        protocol_version: rq.protocol_version,
        calling_ae_title: rq.calling_ae_title.clone(),
        called_ae_title: rq.called_ae_title.clone(),
        application_context_name: rq.application_context_name.clone(),
        presentation_contexts: rq
            .presentation_contexts
            .iter()
            .map(|pc| PresentationContextResult {
                id: pc.id,
                reason: PresentationContextResultReason::Acceptance,
                transfer_syntax: transfer_syntax.to_string(),
            })
            .collect(),
        user_variables: vec![
            UserVariableItem::MaxLength(MINIMUM_PDU_SIZE),
            UserVariableItem::ImplementationClassUID("1.2.3.4.5".to_string()),
        ],
    }
}

/// Wait for the association request of the next connection.
pub async fn accept_rq(listener: &TcpListener) -> Result<(TcpStream, AssociationRQ)> {
    let (mut stream, _) = listener.accept().await?;
    match read_pdu(&mut stream).await? {
        Pdu::AssociationRQ(rq) => Ok((stream, rq)),
        pdu => Err(format!("expected A-ASSOCIATE-RQ, got {:?}", pdu).into()),
    }
}

/// Accept the next association, negotiating every context
/// with the given transfer syntax.
pub async fn establish(
    listener: &TcpListener,
    transfer_syntax: TransferSyntax,
) -> Result<(TcpStream, AssociationRQ)> {
    let (mut stream, rq) = accept_rq(listener).await?;
    send_pdu(
        &mut stream,
        &Pdu::AssociationAC(accept_all(&rq, transfer_syntax.uid())),
    )
    .await?;
    Ok((stream, rq))
}

/// A DIMSE message as received by the acceptor.
#[derive(Debug)]
pub struct Received {
    pub presentation_context_id: u8,
    pub command: Command,
    pub data: Option<Vec<u8>>,
}

pub async fn receive_message(stream: &mut TcpStream) -> Result<Received> {
    let mut assembler = MessageAssembler::new();
    loop {
        match read_pdu(stream).await? {
            Pdu::PData { data } => {
                for value in data {
                    assembler.push(value)?;
                }
            }
            pdu => return Err(format!("expected P-DATA-TF, got {:?}", pdu).into()),
        }

        let Some(bytes) = assembler.command() else {
            continue;
        };
        let command = Command::decode(bytes)?;
        let presentation_context_id = assembler.presentation_context_id().unwrap_or_default();
        if !command.has_data_set() {
            return Ok(Received {
                presentation_context_id,
                command,
                data: None,
            });
        }
        if let Some(data) = assembler.take_data() {
            return Ok(Received {
                presentation_context_id,
                command,
                data: Some(data),
            });
        }
    }
}

pub async fn send_message(
    stream: &mut TcpStream,
    presentation_context_id: u8,
    command: &Command,
    data: Option<(&Dataset, TransferSyntax)>,
) -> Result<()> {
    let mut pdus = fragment(
        presentation_context_id,
        PDataValueType::Command,
        &command.encode()?,
        MINIMUM_PDU_SIZE,
    );
    if let Some((dataset, ts)) = data {
        pdus.extend(fragment(
            presentation_context_id,
            PDataValueType::Data,
            &encode_dataset(dataset, ts)?,
            MINIMUM_PDU_SIZE,
        ));
    }
    for pdu in &pdus {
        send_pdu(stream, pdu).await?;
    }
    Ok(())
}

/// Expect an A-RELEASE-RQ and confirm it.
pub async fn expect_release(stream: &mut TcpStream) -> Result<()> {
    match read_pdu(stream).await? {
        Pdu::ReleaseRQ => send_pdu(stream, &Pdu::ReleaseRP).await,
        pdu => Err(format!("expected A-RELEASE-RQ, got {:?}", pdu).into()),
    }
}

/// Collect every PDU sent until the peer closes the connection.
pub async fn drain(stream: &mut TcpStream) -> Result<Vec<Pdu>> {
    let mut pdus = Vec::new();
    loop {
        match read_pdu(stream).await {
            Ok(pdu) => pdus.push(pdu),
            Err(e) => match e.downcast_ref::<std::io::Error>() {
                Some(io)
                    if matches!(
                        io.kind(),
                        std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset
                    ) =>
                {
                    return Ok(pdus)
                }
                _ => return Err(e),
            },
        }
    }
}
