use std::time::Duration;

use clap::Parser;
use dicomlink_ul::destination::Error as DestinationError;
use dicomlink_ul::{Association, AssociationState, Destination, TcpConnector, Timeouts};
use snafu::{Report, ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

/// DICOM C-ECHO SCU
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// address of the SCP, as `AE@host:port` or `host:port`
    /// (example: "ANY-SCP@127.0.0.1:104")
    addr: String,
    /// verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// the calling AE title
    #[arg(long = "calling-ae-title", default_value = "ECHO-SCU")]
    calling_ae_title: String,
    /// the called AE title, overrides the one in the address
    /// (default: ANY-SCP)
    #[arg(long = "called-ae-title")]
    called_ae_title: Option<String>,
    /// the maximum PDU length
    #[arg(
        long = "max-pdu-length",
        default_value = "16384",
        value_parser(clap::value_parser!(u32).range(4096..=131_072))
    )]
    max_pdu_length: u32,
    /// seconds to wait for the connection
    #[arg(long = "connect-timeout", default_value = "30")]
    connect_timeout: u64,
    /// seconds to wait for the association to be accepted
    #[arg(long = "association-timeout", default_value = "30")]
    association_timeout: u64,
    /// seconds to wait for the C-ECHO response
    #[arg(long = "echo-timeout", default_value = "10")]
    echo_timeout: u64,
    /// seconds to wait for the release response
    #[arg(long = "release-timeout", default_value = "10")]
    release_timeout: u64,
}

impl App {
    fn destination(&self) -> Result<Destination, DestinationError> {
        let destination: Destination = if self.addr.contains('@') {
            self.addr.parse()?
        } else {
            format!(
                "{}@{}",
                self.called_ae_title.as_deref().unwrap_or("ANY-SCP"),
                self.addr
            )
            .parse()?
        };
        let mut destination = destination
            .with_calling_ae_title(&self.calling_ae_title)
            .with_max_pdu_length(self.max_pdu_length)
            .with_timeouts(Timeouts {
                connect: Duration::from_secs(self.connect_timeout),
                association: Duration::from_secs(self.association_timeout),
                echo: Duration::from_secs(self.echo_timeout),
                release: Duration::from_secs(self.release_timeout),
                ..Timeouts::default()
            });
        if let Some(called_ae_title) = &self.called_ae_title {
            destination = destination.with_called_ae_title(called_ae_title);
        }
        destination.validate()?;
        Ok(destination)
    }
}

#[derive(Debug, Snafu)]
enum Error {
    /// Invalid SCP address
    InvalidAddress { source: DestinationError },

    /// Could not start the async runtime
    Runtime { source: std::io::Error },

    /// Could not establish association
    Associate { source: dicomlink_ul::Error },

    /// C-ECHO failed
    Echo { source: dicomlink_ul::Error },
}

fn main() {
    let app = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if app.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            })
            .finish(),
    )
    .unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
    });

    run(app).unwrap_or_else(|err| {
        error!("{}", Report::from_error(err));
        std::process::exit(-2);
    });
}

fn run(app: App) -> Result<(), Error> {
    let destination = app.destination().context(InvalidAddressSnafu)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context(RuntimeSnafu)?;
    runtime.block_on(echo(destination))
}

async fn echo(destination: Destination) -> Result<(), Error> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    info!("Establishing association with {}...", destination);
    let mut association = Association::new(destination);
    association
        .connect(&TcpConnector, &cancel)
        .await
        .context(AssociateSnafu)?;
    debug!(
        "Association established, peer implementation class UID {:?}",
        association.peer_implementation_class_uid()
    );

    let outcome = association.echo(&cancel).await;
    if association.state() == AssociationState::Established {
        if let Err(e) = association.release().await {
            warn!("Could not release association: {}", Report::from_error(e));
        }
    }
    outcome.context(EchoSnafu)?;

    info!("C-ECHO successful");
    Ok(())
}

/// Cancel the ongoing operation on Ctrl+C.
fn cancel_on_interrupt(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted");
            cancel.cancel();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::App;
    use clap::{CommandFactory, Parser};

    #[test]
    fn verify_cli() {
        App::command().debug_assert();
    }

    #[test]
    fn destination_from_arguments() {
        let app = App::parse_from(["echoscu", "PACS@10.0.0.11:104", "--echo-timeout", "3"]);
        let destination = app.destination().unwrap();
        assert_eq!(destination.called_ae_title(), "PACS");
        assert_eq!(destination.calling_ae_title(), "ECHO-SCU");
        assert_eq!(destination.timeouts().echo.as_secs(), 3);

        let app = App::parse_from([
            "echoscu",
            "127.0.0.1:11112",
            "--called-ae-title",
            "ARCHIVE",
        ]);
        let destination = app.destination().unwrap();
        assert_eq!(destination.called_ae_title(), "ARCHIVE");
        assert_eq!(destination.port(), 11112);

        let app = App::parse_from(["echoscu", "127.0.0.1:104", "--calling-ae-title", "lower"]);
        assert!(app.destination().is_err());
    }
}
