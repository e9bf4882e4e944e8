use std::os::unix::process::ExitStatusExt;
use std::process::{exit, ExitStatus};
use std::time::Duration;
use anyhow::{Context, Result};
use env_logger::Builder;
use gumdrop::{Options, ParsingStyle};
use libc::pid_t;
use log::{debug, error, warn, LevelFilter};
use tokio::process::{Child, Command};
use tokio::signal;
use nettracker::probe::local_advisory;
use nettracker::report;
use nettracker::{Config, Sink, Tracker};

#[derive(Options)]
pub struct Args {
    #[options(help = "print help message")]
    help: bool,
    #[options(no_short, help = "don't track connections opened by child processes")]
    ignore_children: bool,
    #[options(help = "write tracker results to the specified file", meta = "PATH")]
    output: Option<Sink>,
    #[options(help = "poll interval in milliseconds (default: poll continuously)", meta = "MS")]
    interval: Option<u64>,
    #[options(no_short, help = "write the report as JSON")]
    json: bool,
    #[options(no_short, help = "skip reverse DNS lookups of remote addresses")]
    no_alias: bool,
    #[options(count, help = "increase log verbosity")]
    verbose: u32,
    #[options(short = "V", help = "print the program version and exit")]
    version: bool,
    #[options(free, help = "program to run, and its arguments")]
    program: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args_or_exit(ParsingStyle::StopAtFirstFree);

    if args.version {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut builder = Builder::from_default_env();
    builder.filter(None, match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    });
    builder.init();

    if let Some(warning) = local_advisory() {
        warn!("{}", warning);
    }

    let (program, argv) = match args.program.split_first() {
        Some(split) => split,
        None        => {
            eprintln!("No program was given to execute.");
            exit(1);
        }
    };

    let mut child = Command::new(program).args(argv).spawn().with_context(|| {
        format!("failed to run {}", program)
    })?;

    let pid = child.id().context("program exited before tracking started")? as pid_t;

    let config = Config::new(pid)
        .children(!args.ignore_children)
        .interval(args.interval.map(Duration::from_millis));

    let mut tracker = Tracker::new(config)?;

    let status = {
        let _session = tracker.session()?;
        wait(&mut child).await?
    };

    let obs = tracker.snapshot();
    debug!("{} exited with {}, {} connections", program, status, obs.len());

    let report = match args.json {
        true  => report::render_json(&obs, pid)?,
        false => report::render(&obs, pid, &report::Options {
            alias: !args.no_alias,
            width: None,
        }),
    };

    let mut sink = args.output.unwrap_or_default();
    if let Err(e) = sink.write(&report) {
        error!("failed to write report to {:?}: {}", sink, e);
    }

    exit(code(status));
}

// Ctrl-C reaches the child through the process group; keep waiting so the
// report still gets written.
async fn wait(child: &mut Child) -> Result<ExitStatus> {
    loop {
        tokio::select! {
            status = child.wait() => return Ok(status?),
            _      = signal::ctrl_c() => debug!("interrupted, waiting for child"),
        }
    }
}

fn code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _)   => code,
        (None, Some(sig)) => 128 + sig,
        (None, None)      => 1,
    }
}
