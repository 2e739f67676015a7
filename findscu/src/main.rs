use std::io::BufRead as _;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dicomlink_encoding::{tags, Dataset, StandardDictionary, Value, VR};
use dicomlink_ul::destination::Error as DestinationError;
use dicomlink_ul::{
    Association, AssociationState, Destination, QueryLevel, TcpConnector, Timeouts,
};
use query::parse_queries;
use snafu::prelude::*;
use snafu::Report;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

mod query;

/// DICOM C-FIND SCU
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// address of the FIND SCP, as `AE@host:port` or `host:port`
    /// (example: "ANY-SCP@127.0.0.1:1045")
    addr: String,
    /// a file containing lines of queries
    #[arg(long)]
    query_file: Option<PathBuf>,
    /// a sequence of queries, as `Keyword=value` or `gggg,eeee=value`
    #[arg(short('q'))]
    query: Vec<String>,

    /// verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// the calling AE title
    #[arg(long = "calling-ae-title", default_value = "FIND-SCU")]
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

    /// query at the patient level
    #[arg(short = 'P', long, group = "level")]
    patient: bool,
    /// query at the study level (default)
    #[arg(short = 'S', long, group = "level")]
    study: bool,
    /// query at the series level
    #[arg(long, group = "level")]
    series: bool,
    /// query at the image level
    #[arg(long, group = "level")]
    image: bool,

    /// stop after this many matches, cancelling the query
    #[arg(long)]
    limit: Option<usize>,

    /// seconds to wait for the connection
    #[arg(long = "connect-timeout", default_value = "30")]
    connect_timeout: u64,
    /// seconds to wait for the association to be accepted
    #[arg(long = "association-timeout", default_value = "30")]
    association_timeout: u64,
    /// seconds to wait for the whole C-FIND exchange
    #[arg(long = "find-timeout", default_value = "120")]
    find_timeout: u64,
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
                find: Duration::from_secs(self.find_timeout),
                release: Duration::from_secs(self.release_timeout),
                ..Timeouts::default()
            });
        if let Some(called_ae_title) = &self.called_ae_title {
            destination = destination.with_called_ae_title(called_ae_title);
        }
        destination.validate()?;
        Ok(destination)
    }

    /// The query level chosen with the level flags, if any.
    fn level_flag(&self) -> Option<QueryLevel> {
        match (self.patient, self.study, self.series, self.image) {
            (true, _, _, _) => Some(QueryLevel::Patient),
            (_, true, _, _) => Some(QueryLevel::Study),
            (_, _, true, _) => Some(QueryLevel::Series),
            (_, _, _, true) => Some(QueryLevel::Image),
            _ => None,
        }
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

    /// C-FIND failed
    Find { source: dicomlink_ul::Error },

    #[snafu(whatever, display("{}", message))]
    Other {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + 'static>, Some)))]
        source: Option<Box<dyn std::error::Error + 'static>>,
    },
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

/// Build the query identifier and its level from the command line.
fn build_query(app: &App) -> Result<(Dataset, QueryLevel), Error> {
    let mut obj = Dataset::new();
    let mut has_base = false;

    // read queries from query text file
    if let Some(query_file) = &app.query_file {
        let file = std::fs::File::open(query_file).whatever_context("Could not open query file")?;
        let reader = std::io::BufReader::new(file);
        let mut queries = Vec::new();
        for line in reader.lines() {
            let line = line.whatever_context("Could not read line from query file")?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            queries.push(line.to_string());
        }

        obj = parse_queries(obj, &queries)
            .whatever_context("Could not build query object from query file")?;
        has_base = true;
    }

    if app.query.is_empty() && !has_base {
        whatever!("Query not specified");
    }

    let obj =
        parse_queries(obj, &app.query).whatever_context("Could not build query object from terms")?;

    // an explicit level flag wins over a level given as a query term
    let level = match app.level_flag() {
        Some(level) => level,
        None => match obj.non_empty_str(tags::QUERY_RETRIEVE_LEVEL) {
            Some(level) => level
                .parse()
                .whatever_context("Invalid query/retrieve level")?,
            None => QueryLevel::Study,
        },
    };
    Ok((obj, level))
}

fn run(app: App) -> Result<(), Error> {
    let destination = app.destination().context(InvalidAddressSnafu)?;
    let (query, level) = build_query(&app)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context(RuntimeSnafu)?;
    runtime.block_on(find(destination, query, level, app.limit))
}

async fn find(
    destination: Destination,
    query: Dataset,
    level: QueryLevel,
    limit: Option<usize>,
) -> Result<(), Error> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    info!("Establishing association with {}...", destination);
    let mut association = Association::new(destination);
    association
        .connect(&TcpConnector, &cancel)
        .await
        .context(AssociateSnafu)?;
    for pc in association.presentation_contexts() {
        debug!(
            "Presentation context {}: {} ({})",
            pc.id,
            pc.abstract_syntax,
            pc.transfer_syntax.name()
        );
    }

    let outcome = query_and_print(&mut association, &cancel, &query, level, limit).await;
    if association.state() == AssociationState::Established {
        if let Err(e) = association.release().await {
            warn!("Could not release association: {}", Report::from_error(e));
        }
    }
    let count = outcome.context(FindSnafu)?;

    if count == 0 {
        info!("No results matching query");
    } else {
        info!("{} matches", count);
    }
    Ok(())
}

async fn query_and_print(
    association: &mut Association<tokio::net::TcpStream>,
    cancel: &CancellationToken,
    query: &Dataset,
    level: QueryLevel,
    limit: Option<usize>,
) -> dicomlink_ul::Result<usize> {
    debug!("Sending {} level query", level);
    let mut responses = association.find(cancel, query, level).await?;
    let mut count = 0;
    while let Some(found) = responses.next().await? {
        println!("------------------------ Match #{count} ------------------------");
        print_dataset(&found);
        count += 1;
        if limit.is_some_and(|limit| count >= limit) {
            debug!("Match limit reached, cancelling query");
            responses.cancel().await?;
            break;
        }
    }
    Ok(count)
}

fn print_dataset(dataset: &Dataset) {
    for element in dataset.iter() {
        let keyword = StandardDictionary
            .by_tag(element.tag())
            .map(|entry| entry.alias)
            .unwrap_or("«Unknown Attribute»");
        let value = match element.value() {
            Value::Sequence(items) => format!("<{} items>", items.len()),
            Value::Primitive(_) if element.vr().is_text() => {
                format!("[{}]", element.to_str().unwrap_or_default())
            }
            Value::Primitive(_) if element.vr() == VR::US => element
                .to_u16()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            Value::Primitive(_) if element.vr() == VR::UL => element
                .to_u32()
                .map(|v| v.to_string())
                .unwrap_or_default(),
            Value::Primitive(bytes) => format!("<{} bytes>", bytes.len()),
        };
        println!(
            "{} {} {:<32} {}",
            element.tag(),
            element.vr(),
            keyword,
            value
        );
    }
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
    use crate::{build_query, App};
    use clap::{CommandFactory, Parser};
    use dicomlink_encoding::tags;
    use dicomlink_ul::QueryLevel;

    #[test]
    fn verify_cli() {
        App::command().debug_assert();
    }

    #[test]
    fn query_level_from_flag_or_term() {
        let app = App::parse_from(["findscu", "PACS@127.0.0.1:104", "-q", "PatientID=1"]);
        let (query, level) = build_query(&app).unwrap();
        assert_eq!(level, QueryLevel::Study);
        assert_eq!(query.str(tags::PATIENT_ID).as_deref(), Some("1"));

        let app = App::parse_from([
            "findscu",
            "PACS@127.0.0.1:104",
            "-q",
            "QueryRetrieveLevel=SERIES",
            "-q",
            "StudyInstanceUID=1.2.3",
        ]);
        let (_, level) = build_query(&app).unwrap();
        assert_eq!(level, QueryLevel::Series);

        let app = App::parse_from([
            "findscu",
            "PACS@127.0.0.1:104",
            "--image",
            "-q",
            "SOPInstanceUID",
        ]);
        let (_, level) = build_query(&app).unwrap();
        assert_eq!(level, QueryLevel::Image);
    }

    #[test]
    fn level_flags_conflict() {
        assert!(App::try_parse_from([
            "findscu",
            "PACS@127.0.0.1:104",
            "--patient",
            "--study",
            "-q",
            "PatientID=1"
        ])
        .is_err());
    }

    #[test]
    fn missing_query() {
        let app = App::parse_from(["findscu", "PACS@127.0.0.1:104"]);
        assert!(build_query(&app).is_err());
    }
}
