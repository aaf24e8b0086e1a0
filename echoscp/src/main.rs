use std::net::{Ipv4Addr, SocketAddrV4, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dicom_dictionary_std::uids;
use dicom_ulp::association::{AccessControl, Error as AssociationError, Incoming};
use dicom_ulp::command::{CommandMessage, Status};
use dicom_ulp::pdu::DEFAULT_MAX_PDU;
use dicom_ulp::ServerAssociationOptions;
use snafu::{Report, ResultExt, Whatever};
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// DICOM C-ECHO SCP
#[derive(Debug, Parser)]
#[command(version)]
struct App {
    /// Verbose mode
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
    /// Application Entity title of this SCP
    #[arg(long = "ae-title", default_value = "ECHO-SCP")]
    ae_title: String,
    /// Accept any called AE title
    #[arg(long = "accept-any")]
    accept_any: bool,
    /// Enforce max pdu length
    #[arg(short = 's', long = "strict")]
    strict: bool,
    /// Maximum PDU length
    #[arg(
        short = 'm',
        long = "max-pdu-length",
        default_value_t = DEFAULT_MAX_PDU,
        value_parser(clap::value_parser!(u32).range(4096..=131_072))
    )]
    max_pdu_length: u32,
    /// Socket read and write timeout, in seconds
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,
    /// Which port to listen on
    #[arg(short, default_value = "11111")]
    port: u16,
}

fn main() {
    let app = App::parse();
    let level = if app.verbose { Level::DEBUG } else { Level::INFO };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::from_level(level).into())
                    .from_env_lossy(),
            )
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    run(app).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-2);
    });
}

fn run(app: App) -> Result<(), Whatever> {
    let mut options = ServerAssociationOptions::new()
        .ae_title(app.ae_title.clone())
        .with_abstract_syntax(uids::VERIFICATION)
        .strict(app.strict)
        .max_pdu_length(app.max_pdu_length);
    if let Some(timeout) = app.timeout.map(Duration::from_secs) {
        options = options.read_timeout(timeout).write_timeout(timeout);
    }

    let listen_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, app.port);
    let listener = TcpListener::bind(listen_addr)
        .whatever_context("Could not bind the listening socket")?;
    info!("{} listening on: tcp://{}", app.ae_title, listen_addr);

    if app.accept_any {
        serve(listener, options.accept_any())
    } else {
        serve(listener, options)
    }
}

/// Accept connections forever, one thread per association.
fn serve<A>(
    listener: TcpListener,
    options: ServerAssociationOptions<'static, A>,
) -> Result<(), Whatever>
where
    A: AccessControl + Send + Sync + 'static,
{
    let options = Arc::new(options);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let options = Arc::clone(&options);
                std::thread::spawn(move || {
                    if let Err(e) = run_echo(stream, options.as_ref()) {
                        error!("{}", Report::from_error(e));
                    }
                });
            }
            Err(e) => {
                error!("{}", Report::from_error(e));
            }
        }
    }

    Ok(())
}

fn run_echo<A>(
    stream: TcpStream,
    options: &ServerAssociationOptions<'_, A>,
) -> Result<(), Whatever>
where
    A: AccessControl,
{
    let peer_addr = stream.peer_addr().ok();
    let mut association = options
        .establish(stream)
        .whatever_context("Could not establish association")?;
    let peer_ae_title = association.peer_ae_title().to_string();

    match peer_addr {
        Some(addr) => info!("New association from {} ({})", peer_ae_title, addr),
        None => info!("New association from {}", peer_ae_title),
    }
    debug!(
        "> Presentation contexts: {:?}",
        association.presentation_contexts()
    );

    loop {
        match association.receive_unit(false) {
            Ok(Incoming::Unit(unit)) => {
                let command = CommandMessage::decode(&unit.data)
                    .whatever_context("Could not decode incoming command")?;
                debug!("scu ----> scp: {:?}", command);

                if !matches!(command, CommandMessage::CEchoRq { .. }) {
                    warn!(
                        "Unsupported command {:?} from {}, aborting",
                        command.command_field(),
                        peer_ae_title
                    );
                    association
                        .abort()
                        .whatever_context("Could not abort association")?;
                    return Ok(());
                }

                let response = CommandMessage::c_echo_rsp(&command, Status::SUCCESS.code());
                association
                    .send_command(unit.presentation_context_id, &response, None)
                    .whatever_context("Could not send C-ECHO response")?;
                debug!("scu <---- scp: {:?}", response);
            }
            Ok(Incoming::ReleaseRequested) => {
                association.respond_release().unwrap_or_else(|e| {
                    warn!(
                        "Failed to send association release message to SCU: {}",
                        Report::from_error(e)
                    );
                });
                info!("Released association with {}", peer_ae_title);
                return Ok(());
            }
            Err(AssociationError::Aborted { source, .. }) => {
                warn!("Association with {} aborted: {}", peer_ae_title, source);
                return Ok(());
            }
            Err(e) => {
                return Err(e).whatever_context("Association terminated unexpectedly");
            }
        }
    }
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
