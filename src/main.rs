use runtracer::{
    config::{Config, EngineConfig, DEFAULT_BASE_TRACE, DEFAULT_TRACE_SUFFIX},
    utils::{debug, setup_signal_handler, StopSoon},
    TraceError,
};
use std::path::PathBuf;
use std::process::exit;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "runtracer",
    about = "Traces a target application over a corpus of input files."
)]
struct Settings {
    /// Directory containing the input files to trace.
    #[structopt(short = "b", long, default_value = "downloads")]
    input_dir: PathBuf,
    /// Directory trace files are written to.
    #[structopt(short, long, default_value = "traced")]
    output_dir: PathBuf,
    /// Installation directory of the instrumentation engine.
    #[structopt(short = "t", long, default_value = "pintool")]
    engine_dir: PathBuf,
    /// Engine launcher, default is 'engine-dir/pin'.
    #[structopt(long)]
    engine: Option<PathBuf>,
    /// Coverage tool loaded by the engine, default is the RunTracer tool under engine-dir.
    #[structopt(long)]
    tool: Option<PathBuf>,
    /// Number of files between progress reports, only shown with -v.
    #[structopt(short, long, default_value = "100")]
    report_every: u64,
    /// Max amount of time in seconds allowed for each phase of a trace.
    #[structopt(short, long, default_value = "120")]
    max_time: u64,
    /// Suffix appended to input names to name their trace files.
    #[structopt(long, default_value = DEFAULT_TRACE_SUFFIX)]
    suffix: String,
    /// Name of the trace created with -c.
    #[structopt(long, default_value = DEFAULT_BASE_TRACE)]
    base_name: String,
    /// Tool used to close windows of the target.
    #[structopt(long, default_value = "wmctrl")]
    wmctrl: PathBuf,
    /// Never try to close windows, for headless targets.
    #[structopt(long)]
    no_windows: bool,
    /// Create a base trace, running the target without any input.
    #[structopt(short, long)]
    create_base: bool,
    /// Keep closing dialogs popped up by each target instance in the background.
    #[structopt(short, long)]
    kill_windows: bool,
    /// Parallel mode, for several tracers sharing the input and output directories.
    #[structopt(short, long)]
    parallel: bool,
    /// Delete input files once they have been traced.
    #[structopt(short, long)]
    delete_traced: bool,
    /// Delete input files failing the test run, only with -e.
    #[structopt(short = "f", long)]
    delete_failed: bool,
    /// Skip input files that already have a non-empty trace.
    #[structopt(short, long)]
    skip_traced: bool,
    /// Test each file without instrumentation before tracing it.
    #[structopt(short = "e", long)]
    test_each: bool,
    /// Verbose mode, with progress updates and error messages.
    #[structopt(short, long)]
    verbose: bool,
    /// Print debug messages.
    #[structopt(long)]
    debug: bool,
    /// Target application.
    #[structopt(parse(from_os_str))]
    target: PathBuf,
}

pub fn main() {
    let settings = Settings::from_args();
    let level = if settings.debug || debug() {
        simplelog::LevelFilter::Debug
    } else if settings.verbose {
        simplelog::LevelFilter::Info
    } else {
        simplelog::LevelFilter::Error
    };
    simplelog::CombinedLogger::init(vec![simplelog::TermLogger::new(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )])
    .unwrap();

    let mut engine = EngineConfig::from_install_dir(&settings.engine_dir);
    if let Some(launcher) = settings.engine {
        engine.launcher = launcher;
    }
    if let Some(tool) = settings.tool {
        engine.tool = tool;
    }
    let conf = Config {
        input_dir: settings.input_dir,
        output_dir: settings.output_dir,
        trace_suffix: settings.suffix,
        base_trace: settings.base_name,
        engine,
        target: settings.target,
        max_time: settings.max_time,
        report_every: settings.report_every,
        window_tool: if settings.no_windows {
            None
        } else {
            Some(settings.wmctrl)
        },
        create_base: settings.create_base,
        kill_windows: settings.kill_windows,
        parallel: settings.parallel,
        delete_traced: settings.delete_traced,
        delete_failed: settings.delete_failed,
        skip_traced: settings.skip_traced,
        test_each: settings.test_each,
        verbose: settings.verbose,
        ..Default::default()
    };

    let stop = StopSoon::new();
    if let Err(e) = setup_signal_handler(stop.clone()) {
        log::error!("failed to install signal handler: {}", e);
        exit(1);
    }
    match runtracer::start(conf, stop) {
        Ok(stats) => log::info!("done, {}", stats),
        Err(TraceError::Cancelled) => println!("Ctrl-C detected, ending trace..."),
        Err(e) => {
            log::error!("{}", e);
            exit(1);
        }
    }
}
