// Redfish power control shell
use std::io::stderr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, ArgGroup, Parser};
use color_eyre::eyre::Result;
use dragonfly_bmc::{ExtraHeader, HttpTransport, TransportConfig};
use dragonfly_power::{ActionPath, HostRegistry, OpKind, PowerError, Session, Shell};
use tokio::io::BufReader;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "redfishpower",
    version,
    about = "Redfish power control for fleets of BMCs",
    long_about = None,
    disable_help_flag = true,
    group(ArgGroup::new("hosts").required(true).args(["hostname", "hostsfile"]))
)]
struct Cli {
    /// Target hosts as a hostlist expression, e.g. node[1-4]
    #[arg(short = 'h', long, value_name = "HOSTS")]
    hostname: Vec<String>,

    /// File with one hostlist expression per line
    #[arg(short = 'f', long, value_name = "FILE")]
    hostsfile: Option<PathBuf>,

    /// Set extra header string ("Name: value")
    #[arg(short = 'H', long)]
    header: Option<String>,

    /// Set stat path
    #[arg(short = 'S', long)]
    statpath: Option<String>,

    /// Set on path
    #[arg(short = 'O', long)]
    onpath: Option<String>,

    /// Set off path
    #[arg(short = 'F', long)]
    offpath: Option<String>,

    /// Set cycle path
    #[arg(short = 'C', long)]
    cyclepath: Option<String>,

    /// Set on post data
    #[arg(short = 'P', long)]
    onpostdata: Option<String>,

    /// Set off post data
    #[arg(short = 'G', long)]
    offpostdata: Option<String>,

    /// Set cycle post data
    #[arg(short = 'D', long)]
    cyclepostdata: Option<String>,

    /// Command timeout in seconds, including confirmation polls
    #[arg(
        short = 't',
        long,
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout: u64,

    /// Timeout in seconds for a single HTTP exchange
    #[arg(
        short = 'm',
        long,
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    message_timeout: u64,

    /// Increase output verbosity
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version are not usage errors
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    // RUST_LOG wins; otherwise --verbose turns on engine debug logs
    let default_directives = if cli.verbose {
        "warn,dragonfly_power=debug,dragonfly_bmc=debug"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();

    let session = match build_session(&cli) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            eprintln!("redfishpower: {}", e);
            std::process::exit(1);
        }
    };
    info!(hosts = session.hosts.len(), "session configured");

    let config = TransportConfig::default()
        .with_message_timeout(Duration::from_secs(cli.message_timeout));
    let transport = match HttpTransport::new(&config) {
        Ok(transport) => transport,
        Err(e) => {
            error!("{}", e);
            eprintln!("redfishpower: {}", e);
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(async move {
        let mut shell = Shell::new(session, transport, std::io::stdout());
        shell.run(BufReader::new(tokio::io::stdin())).await
    });
    // A stdin read may still be parked on the blocking pool
    runtime.shutdown_background();

    result?;
    debug!("exiting");
    Ok(())
}

/// Turn flags into a session; any error here is a usage error
fn build_session(cli: &Cli) -> Result<Session, PowerError> {
    let mut hosts = match &cli.hostsfile {
        Some(path) => HostRegistry::load_hosts_file(path)?,
        None => HostRegistry::new(),
    };
    for expr in &cli.hostname {
        hosts.push_hostlist(expr)?;
    }
    if hosts.is_empty() {
        return Err(PowerError::NoHosts);
    }

    let mut session = Session::new(hosts)
        .with_command_timeout(Duration::from_secs(cli.timeout))
        .with_verbose(cli.verbose)
        .with_action(
            OpKind::On,
            ActionPath {
                path: cli.onpath.clone(),
                postdata: cli.onpostdata.clone(),
            },
        )
        .with_action(
            OpKind::Off,
            ActionPath {
                path: cli.offpath.clone(),
                postdata: cli.offpostdata.clone(),
            },
        )
        .with_action(
            OpKind::Cycle,
            ActionPath {
                path: cli.cyclepath.clone(),
                postdata: cli.cyclepostdata.clone(),
            },
        );

    if let Some(path) = &cli.statpath {
        session = session.with_stat_path(path.clone());
    }
    if let Some(header) = &cli.header {
        session = session.with_header(ExtraHeader::parse(header)?);
    }
    Ok(session)
}
