mod app;
mod cli;
mod logging;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use app::App;
use cli::CliOptions;

fn main() -> std::process::ExitCode {
    logging::init_logging();

    // clap::Parser::parse() already exits with code 2 on malformed
    // arguments; the path check below extends that same contract to an
    // invalid watch directory.
    let opts = CliOptions::parse();
    if let Err(message) = opts.validate() {
        log::error!("{message}");
        eprintln!("** tailtap did not start: {message}");
        return std::process::ExitCode::from(2);
    }

    if !opts.quiet {
        println!(
            "tailtap watching {} (workers={}, queue_capacity={}, report_interval={}s, topk={}, \
             extensions={:?}, chunk_size_bytes={})",
            opts.watch_path.display(),
            opts.resolved_workers(),
            opts.queue_capacity,
            opts.report_interval_seconds,
            opts.topk,
            opts.extension_list(),
            opts.chunk_size_bytes,
        );
    }

    match run(opts) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("** tailtap did not complete successfully: {e}");
            for cause in e.chain().skip(1) {
                eprintln!("**   caused by: {cause}");
            }
            std::process::ExitCode::FAILURE
        }
    }
}

fn run(opts: CliOptions) -> anyhow::Result<()> {
    let mut app = App::start(&opts)?;

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    let signal_flag = Arc::clone(&shutdown_requested);
    std::thread::Builder::new()
        .name("tailtap-signals".into())
        .spawn(move || {
            if signals.forever().next().is_some() {
                log::info!("received shutdown signal");
                signal_flag.store(true, Ordering::Release);
            }
        })?;

    while !shutdown_requested.load(Ordering::Acquire) {
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    log::info!("shutting down");
    app.shutdown();
    Ok(())
}
