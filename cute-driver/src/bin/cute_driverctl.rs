//! Command-line front end for cute-driver.
//!
//! Runs driver lifecycles in-process and prints every envelope, which is
//! handy when bringing up a new protocol or checking a config file.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use cute_driver::tracing::{self, prelude::*};
use cute_driver::{Board, BoardHigh, DriverConfig, DriverContext, EchoParams, Envelope, TaskParams};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON config file; defaults and environment overrides otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the packed driver version
    Version,
    /// List registered protocols
    Protocols,
    /// Run one task through create, execute and destroy
    Run(RunArgs),
    /// Run the board_high echo lifecycle
    BoardHigh(BoardArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(short, long)]
    protocol: u32,
    /// JSON parameters for the protocol
    #[arg(long, default_value = "")]
    params: String,
    #[arg(short, long, default_value_t = 1)]
    times: u32,
}

#[derive(Args, Debug)]
struct BoardArgs {
    #[arg(long, default_value_t = 0)]
    initial_count: i32,
    #[arg(short, long, default_value_t = 1)]
    times: u32,
}

fn load_config(path: Option<&PathBuf>) -> Result<DriverConfig> {
    match path {
        Some(path) => {
            DriverConfig::load_from(path).with_context(|| format!("loading {}", path.display()))
        }
        None => DriverConfig::from_env().context("reading config from environment"),
    }
}

fn show(label: &str, envelope: &Envelope) {
    match envelope.to_vec() {
        Some(bytes) => println!("{label}: {envelope} {}", hex::encode(bytes)),
        None => println!("{label}: {envelope}"),
    }
}

fn ensure_ok(label: &str, envelope: &Envelope) -> Result<()> {
    show(label, envelope);
    envelope.check().with_context(|| format!("{label} failed"))?;
    Ok(())
}

fn run(config: DriverConfig, args: RunArgs) -> Result<()> {
    let params = TaskParams::from_json(args.protocol, args.params.as_bytes())?;
    params.validate(&config)?;

    let mut ctx = DriverContext::new(config);
    ensure_ok("init", &ctx.init())?;

    let mut handle = ctx.create_task(args.protocol, params);
    ensure_ok("create", handle.envelope())?;

    let mut outcome = Ok(());
    for i in 0..args.times {
        let result = ctx.execute_task(&mut handle);
        if let Err(e) = ensure_ok(&format!("execute[{i}]"), &result) {
            outcome = Err(e);
            break;
        }
    }

    ctx.destroy_task(handle);
    let snap = ctx.ledger().snapshot();
    debug!(?snap, "Ledger after destroy");
    if snap.live != 0 {
        bail!("{} heap payloads still live after destroy", snap.live);
    }
    ctx.shutdown();
    outcome
}

fn board_high(config: DriverConfig, args: BoardArgs) -> Result<()> {
    let mut board = BoardHigh::new(config);
    println!("board: {}", board.name());
    ensure_ok("init", &board.init())?;

    let mut handle = board.create_echo_task(EchoParams {
        initial_count: args.initial_count,
    });
    ensure_ok("create", handle.envelope())?;

    for i in 0..args.times {
        let result = board.execute_echo_task(&mut handle);
        ensure_ok(&format!("execute[{i}]"), &result)?;
    }

    board.destroy_echo_task(handle);
    board.destroy_board_high();
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    tracing::init_journald_or_stdout(tracing::parse_level(&config.log_level));

    match cli.command {
        Commands::Version => {
            let v = cute_driver::driver_version();
            println!("{}.{}.{} ({v:#08x})", v >> 16, (v >> 8) & 0xff, v & 0xff);
        }
        Commands::Protocols => {
            let ctx = DriverContext::new(config);
            for desc in ctx.registry().descriptors() {
                println!("{:>3}  {}", desc.id, desc.name);
            }
        }
        Commands::Run(args) => run(config, args)?,
        Commands::BoardHigh(args) => board_high(config, args)?,
    }

    Ok(())
}
