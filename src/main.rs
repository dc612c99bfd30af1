//! # podinit
//! Runs as PID 1 of a pod, or talks to one that does.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{crate_version, Parser};

use podinit::client::{lines_from_args, Client};
use podinit::executor::Executor;
use podinit::init;
use podinit::protocol::Reply;
use podinit::server::{Listener, ServerConfig, SupervisorError, DEFAULT_REQUEST_TIMEOUT};
use podinit::syscall::syscall::create_syscall;

#[derive(Parser, Debug)]
#[clap(version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    /// Write logs to this file instead of stderr
    #[clap(long, global = true)]
    log: Option<PathBuf>,
    /// Log format, text or json
    #[clap(long, global = true)]
    log_format: Option<String>,
    /// Log level, overrides PODINIT_LOG_LEVEL
    #[clap(long, global = true)]
    log_level: Option<String>,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    /// Serve privileged requests on the init socket as the pod's PID 1
    Serve(Serve),
    /// Send one request to a running init
    Request(Request),
}

#[derive(Parser, Debug)]
struct Serve {
    /// Path of the init socket
    #[clap(long)]
    socket: PathBuf,
    /// Seconds a single request may take to arrive
    #[clap(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    request_timeout: u64,
}

#[derive(Parser, Debug)]
struct Request {
    /// Path of the init socket
    #[clap(long)]
    socket: PathBuf,
    /// Seconds to wait for the reply
    #[clap(long, default_value_t = 30)]
    timeout: u64,
    /// Request fields, with `--` between lines
    #[clap(last = true, allow_hyphen_values = true, required = true)]
    fields: Vec<String>,
}

fn main() -> Result<ExitCode> {
    let opts = Opts::parse();

    if let Err(e) = podinit::logger::init(opts.log, opts.log_format, opts.log_level) {
        eprintln!("log init failed: {e:?}");
    }

    match opts.subcmd {
        SubCommand::Serve(serve) => {
            run_init(serve)?;
            Ok(ExitCode::SUCCESS)
        }
        SubCommand::Request(request) => send_request(request),
    }
}

fn run_init(serve: Serve) -> Result<()> {
    // Must happen before any other thread exists.
    let signals = init::block_signals().map_err(SupervisorError::Signals)?;
    init::spawn_signal_thread(signals).context("failed to start signal thread")?;

    let listener = Listener::bind(&serve.socket).map_err(SupervisorError::from)?;
    let executor = Arc::new(Executor::new(create_syscall()));
    let config = ServerConfig {
        request_timeout: Duration::from_secs(serve.request_timeout),
        ..Default::default()
    };

    let result = listener.serve(executor, &config);
    if let Err(err) = &result {
        log::error!("init supervisor failed: {err:#}");
    }
    result.context("init supervisor failed")
}

fn send_request(request: Request) -> Result<ExitCode> {
    let lines = lines_from_args(&request.fields);
    let mut client = Client::connect(&request.socket, Some(Duration::from_secs(request.timeout)))?;
    match client.request(&lines)? {
        Reply::Ok => {
            println!("REQUEST OK");
            Ok(ExitCode::SUCCESS)
        }
        Reply::Failed(message) => {
            eprintln!("REQUEST FAILED: {message}");
            Ok(ExitCode::FAILURE)
        }
    }
}
