use std::time::Duration;

use clap::Parser;
use dicom_dictionary_std::uids;
use dicom_ulp::association::{ClientAssociationOptions, Incoming};
use dicom_ulp::command::CommandMessage;
use dicom_ulp::pdu::DEFAULT_MAX_PDU;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// DICOM C-ECHO SCU
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// socket address to the SCP,
    /// optionally with the called AE title
    /// (example: "ECHO-SCP@127.0.0.1:104")
    addr: String,
    /// verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// the C-ECHO message ID
    /// (taken from the process-wide counter if not given)
    #[arg(short = 'm', long = "message-id")]
    message_id: Option<u16>,
    /// the calling AE title
    #[arg(long = "calling-ae-title", default_value = "ECHOSCU")]
    calling_ae_title: String,
    /// the called AE title,
    /// overrides the AE title in the address if present
    #[arg(long = "called-ae-title")]
    called_ae_title: Option<String>,
    /// the maximum PDU length accepted by the SCU
    #[arg(
        long = "max-pdu-length",
        default_value_t = DEFAULT_MAX_PDU,
        value_parser(clap::value_parser!(u32).range(4096..=131_072))
    )]
    max_pdu_length: u32,
    /// socket read and write timeout, in seconds
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,
}

#[derive(Debug, Snafu)]
enum Error {
    /// Could not establish association
    Establish {
        source: dicom_ulp::association::Error,
    },

    /// Could not send C-ECHO request
    SendRequest {
        source: dicom_ulp::association::Error,
    },

    /// Could not receive C-ECHO response
    ReceiveResponse {
        source: dicom_ulp::association::Error,
    },

    /// Could not decode C-ECHO response
    DecodeResponse {
        source: dicom_ulp::command::Error,
    },

    /// No presentation context accepted for Verification
    NoPresentationContext,

    /// SCP released the association before responding
    ReleasedEarly,

    #[snafu(display("Unexpected response: {:?}", response))]
    UnexpectedResponse { response: Box<CommandMessage> },

    #[snafu(display(
        "Response is for message {} but {} was sent",
        got,
        expected
    ))]
    MessageIdMismatch { expected: u16, got: u16 },

    #[snafu(display("C-ECHO failed with status {}", status))]
    EchoFailed {
        status: dicom_ulp::command::Status,
    },
}

fn main() {
    run().unwrap_or_else(|err| {
        error!("{}", snafu::Report::from_error(err));
        std::process::exit(-2);
    });
}

fn run() -> Result<(), Error> {
    let App {
        addr,
        verbose,
        message_id,
        calling_ae_title,
        called_ae_title,
        max_pdu_length,
        timeout,
    } = App::parse();

    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::from_level(level).into())
                    .from_env_lossy(),
            )
            .finish(),
    )
    .unwrap_or_else(|e| {
        eprintln!("[ERROR] {}", snafu::Report::from_error(e));
    });

    let mut options = ClientAssociationOptions::new()
        .calling_ae_title(calling_ae_title)
        .with_abstract_syntax(uids::VERIFICATION)
        .max_pdu_length(max_pdu_length);
    if let Some(called_ae_title) = called_ae_title {
        options = options.called_ae_title(called_ae_title);
    }
    if let Some(timeout) = timeout.map(Duration::from_secs) {
        options = options
            .connection_timeout(timeout)
            .read_timeout(timeout)
            .write_timeout(timeout);
    }

    let mut association = options.establish_with(&addr).context(EstablishSnafu)?;
    info!(
        "Association with {} ({}) established",
        association.peer_ae_title(),
        addr
    );

    let pc = association
        .presentation_contexts()
        .iter()
        .find(|pc| pc.is_accepted())
        .context(NoPresentationContextSnafu)?;
    let pc_id = pc.id;
    debug!("Using presentation context {:?}", pc);

    let message_id = message_id.unwrap_or_else(|| association.next_message_id());
    let request = CommandMessage::c_echo_rq(message_id);
    association
        .send_command(pc_id, &request, None)
        .context(SendRequestSnafu)?;
    debug!("Echo message sent (msg id {}), awaiting reply...", message_id);

    let unit = match association.receive_unit(false).context(ReceiveResponseSnafu)? {
        Incoming::Unit(unit) => unit,
        Incoming::ReleaseRequested => {
            let _ = association.respond_release();
            return ReleasedEarlySnafu.fail();
        }
    };

    let response = CommandMessage::decode(&unit.data).context(DecodeResponseSnafu)?;
    debug!("{:?}", response);

    let (message_id_being_responded_to, status) = match response {
        CommandMessage::CEchoRsp {
            message_id_being_responded_to,
            status,
            ..
        } => (message_id_being_responded_to, status),
        response => {
            return UnexpectedResponseSnafu {
                response: Box::new(response),
            }
            .fail()
        }
    };

    if let Err(e) = association.release() {
        warn!("Could not release association: {}", snafu::Report::from_error(e));
    }

    ensure!(
        message_id_being_responded_to == message_id,
        MessageIdMismatchSnafu {
            expected: message_id,
            got: message_id_being_responded_to,
        }
    );
    ensure!(status.is_success(), EchoFailedSnafu { status });
    info!("C-ECHO successful ({})", status);

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::App;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        App::command().debug_assert();
    }
}
