use std::io::{stdin, IsTerminal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{env, panic};

use anyhow::Result;
use clap::Parser;
use log::info;
use sqld::config::ConfigLoad;
use sqld::session::Session;
use sqld::trace;

#[derive(Debug, Parser, PartialEq)]
#[command(version, author, about = "MySQL-wire-compatible SQL server over an embedded KV store")]
pub struct Args {
    /// Configuration file path.
    #[clap(short = 'c', long = "config", default_value = "config/sqld.yaml")]
    config: String,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,

    /// No output printed to stdout.
    #[clap(long = "quiet", short = 'q', default_value_t = false)]
    quiet: bool,

    /// Force non-interactive mode.
    #[clap(short = 'n', long, default_value_t = false)]
    non_interactive: bool,

    /// Query to execute, then exit.
    #[clap(long, require_equals = true)]
    query: Option<String>,

    #[clap(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    setup_panic_hooks();

    eprintln!();
    eprintln!(" ____   ____  _     ____  ");
    eprintln!("/ ___| / __ \\| |   |  _ \\ ");
    eprintln!("\\___ \\| |  | | |   | | | |");
    eprintln!(" ___) | |__| | |___| |_| |");
    eprintln!("|____/ \\___\\_\\_____|____/  MySQL-wire SQL over an embedded KV store");
    eprintln!();

    let args = Args::parse();
    if args.debug {
        println!("{:?}", args);
    }

    let log_dir = format!("{}/.sqld", env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &args.log_level)?;
    info!("sqld starting with args: {:?}", &args);

    let cfg = ConfigLoad::new(&args.config).unwrap_or_else(|_| ConfigLoad::default());
    info!("sqld starting with config: {:?}", &cfg);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        eprintln!("received Ctrl+C!");
        r.store(false, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let is_repl = stdin().is_terminal() && !args.non_interactive && args.query.is_none();

    let mut session = Session::try_new(cfg, is_repl, running.clone()).await?;
    info!("sqld ready, is_repl={}", is_repl);

    if is_repl {
        session.handle_repl().await;
        return Ok(());
    }

    match args.query {
        None => session.handle_reader(stdin().lock())?,
        Some(query) => session.handle_reader(std::io::Cursor::new(query))?,
    }

    Ok(())
}

fn setup_panic_hooks() {
    let meta = human_panic::Metadata {
        version: env!("CARGO_PKG_VERSION").into(),
        name: env!("CARGO_PKG_NAME").into(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    };

    let default_hook = panic::take_hook();
    if env::var("RUST_BACKTRACE").is_err() {
        panic::set_hook(Box::new(move |info: &panic::PanicInfo| {
            default_hook(info);
            let file_path = human_panic::handle_dump(&meta, info);
            human_panic::print_msg(file_path, &meta).expect("human-panic: printing error message failed");
        }));
    }
}
