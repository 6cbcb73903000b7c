use std::env;
use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, ValueHint};
use clap_complete::Shell;
use tracing::debug;
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::artifacts::split_filename_ext;
use crate::cleanup::{CleanupAction, CleanupLedger};
use crate::config::ToolPaths;
use crate::error::{ErrorCode, WhoopError, exit_code, report_failure};
use crate::observability::{Timing, log_snapshot};
use crate::options::{Logic, PipelineConfig, Solver, TimingMode, YieldMode, split_tool_options};
use crate::pipeline::PipelineController;
use crate::stages::StageKind;
use crate::supervisor::ProcessSupervisor;

#[derive(Debug, Parser)]
#[command(
    name = "whoop",
    version,
    about = "Whoop - a data race analyser for Linux device drivers"
)]
pub struct Cli {
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub sources: Vec<String>,

    #[arg(short = 'I', value_name = "DIR")]
    pub includes: Vec<String>,
    #[arg(short = 'D', value_name = "SYMBOL")]
    pub defines: Vec<String>,
    #[arg(long)]
    pub find_bugs: bool,
    /// Allow each tool to run for SECS seconds before giving up; 0 disables the timeout.
    #[arg(long, value_name = "SECS", default_value_t = 0)]
    pub timeout: u64,
    #[arg(long)]
    pub verbose: bool,
    #[arg(long)]
    pub silent: bool,
    #[arg(long)]
    pub time: bool,
    #[arg(
        long = "time-as-csv",
        value_name = "LABEL",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = ""
    )]
    pub time_as_csv: Option<String>,
    #[arg(long = "time-json", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub time_json: Option<PathBuf>,
    #[arg(long)]
    pub time_passes: bool,

    #[arg(long)]
    pub print_pairs: bool,
    #[arg(long)]
    pub inline: bool,
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub inline_bound: u32,
    #[arg(long, value_name = "N", default_value_t = 2)]
    pub k: u32,
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub recursion_bound: u32,
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub static_loop_bound: u32,
    #[arg(long = "inparam-aliasing")]
    pub check_in_param_aliasing: bool,
    #[arg(long)]
    pub no_existential_opts: bool,
    #[arg(long)]
    pub no_infer: bool,
    #[arg(long = "no-heavy-async-calls-optimisation")]
    pub no_heavy_async_calls_optimisation: bool,
    #[arg(long)]
    pub skip_non_racy_pairs: bool,
    #[arg(long, value_name = "ENTRY", default_value = "")]
    pub analyse_only: String,
    #[arg(long = "only-race-checking")]
    pub only_races: bool,
    #[arg(long)]
    pub yield_all: bool,
    #[arg(long)]
    pub yield_coarse: bool,
    #[arg(long)]
    pub yield_no_access: bool,
    #[arg(long = "yield-race-check")]
    pub yield_race_checking: bool,
    #[arg(long)]
    pub optimize_corral: bool,
    #[arg(long)]
    pub show_corral_stats: bool,
    #[arg(long = "gen-smt2")]
    pub generate_smt2: bool,
    #[arg(long, value_enum, ignore_case = true, default_value_t = Solver::Z3)]
    pub solver: Solver,
    #[arg(long, value_enum, ignore_case = true, default_value_t = Logic::Auflira)]
    pub logic: Logic,
    #[arg(long = "other-model")]
    pub use_other_model: bool,
    #[arg(long)]
    pub keep_temps: bool,
    #[arg(long)]
    pub debug: bool,

    #[arg(long = "clang-opt", value_name = "OPTS", allow_hyphen_values = true)]
    pub clang_opt: Vec<String>,
    #[arg(long = "smack-opt", value_name = "OPTS", allow_hyphen_values = true)]
    pub smack_opt: Vec<String>,
    #[arg(long = "boogie-opt", value_name = "OPTS", allow_hyphen_values = true)]
    pub boogie_opt: Vec<String>,
    #[arg(long = "boogie-file", value_name = "FILE", value_parser = parse_boogie_file)]
    pub boogie_file: Vec<String>,

    #[arg(long)]
    pub stop_at_re: bool,
    #[arg(long)]
    pub stop_at_bc: bool,
    #[arg(long)]
    pub stop_at_bpl: bool,
    #[arg(long)]
    pub stop_at_engine: bool,
    #[arg(long)]
    pub stop_at_cruncher: bool,
    #[arg(long)]
    pub stop_at_race_checker: bool,

    #[arg(long)]
    pub skip_until_clang: bool,
    #[arg(long)]
    pub skip_until_model: bool,
    #[arg(long)]
    pub skip_until_engine: bool,
    #[arg(long)]
    pub skip_until_cruncher: bool,
    #[arg(long)]
    pub skip_until_checker: bool,
    #[arg(long)]
    pub skip_until_corral: bool,

    /// Tool location file (defaults to $WHOOP_TOOLS_CONFIG or findtools.yaml).
    #[arg(long = "tools-config", value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub tools_config: Option<PathBuf>,
    /// Print a shell completion script and exit.
    #[arg(long, value_enum, value_name = "SHELL")]
    pub completions: Option<Shell>,
}

fn parse_boogie_file(value: &str) -> Result<String, String> {
    let (_, ext) = split_filename_ext(value);
    if ext == ".bpl" {
        Ok(value.to_string())
    } else {
        Err(format!("'{value}' specified via --boogie-file should have extension .bpl"))
    }
}

impl Cli {
    pub fn into_config(self) -> Result<PipelineConfig, WhoopError> {
        let working_dir = env::current_dir().map_err(|err| {
            WhoopError::Configuration(format!("Cannot determine working directory: {err}"))
        })?;
        self.into_config_in(working_dir)
    }

    pub fn into_config_in(self, working_dir: PathBuf) -> Result<PipelineConfig, WhoopError> {
        let timing = match self.time_as_csv {
            Some(label) => TimingMode::Csv { label },
            None if self.time => TimingMode::Human,
            None => TimingMode::Off,
        };

        let mut config = PipelineConfig {
            working_dir,
            timeout_secs: self.timeout,
            solver: self.solver,
            logic: self.logic,
            includes: self.includes,
            defines: self.defines,
            clang_options: self.clang_opt.iter().flat_map(|raw| split_tool_options(raw)).collect(),
            smack_options: self.smack_opt.iter().flat_map(|raw| split_tool_options(raw)).collect(),
            boogie_options: self.boogie_opt.iter().flat_map(|raw| split_tool_options(raw)).collect(),
            boogie_files: self.boogie_file,
            analyse_only: self.analyse_only,
            only_races: self.only_races,
            find_bugs: self.find_bugs,
            skip_non_racy_pairs: self.skip_non_racy_pairs,
            no_infer: self.no_infer,
            inline: self.inline,
            inline_bound: self.inline_bound,
            k: self.k,
            recursion_bound: self.recursion_bound,
            static_loop_bound: self.static_loop_bound,
            yield_mode: YieldMode::from_flags(self.yield_all, self.yield_coarse, self.yield_no_access),
            yield_race_checking: self.yield_race_checking,
            optimize_corral: self.optimize_corral,
            show_corral_stats: self.show_corral_stats,
            no_heavy_async_calls_optimisation: self.no_heavy_async_calls_optimisation,
            check_in_param_aliasing: self.check_in_param_aliasing,
            no_existential_opts: self.no_existential_opts,
            use_other_model: self.use_other_model,
            verbose: self.verbose,
            silent: self.silent,
            print_pairs: self.print_pairs,
            generate_smt2: self.generate_smt2,
            keep_temps: self.keep_temps,
            debugging: self.debug,
            time_passes: self.time_passes,
            timing,
            echo_tool_output: !self.silent,
            ..PipelineConfig::default()
        };

        let stops = [
            (self.stop_at_re, StageKind::SourceTransform),
            (self.stop_at_bc, StageKind::Compile),
            (self.stop_at_bpl, StageKind::BitcodeToIr),
            (self.stop_at_engine, StageKind::Instrument),
            (self.stop_at_cruncher, StageKind::Infer),
            (self.stop_at_race_checker, StageKind::RaceCheck),
        ];
        config.stop_after = stops
            .into_iter()
            .filter_map(|(set, stage)| set.then_some(stage))
            .collect();

        let resumes = [
            (self.skip_until_clang, StageKind::Compile),
            (self.skip_until_model, StageKind::BitcodeToIr),
            (self.skip_until_engine, StageKind::Instrument),
            (self.skip_until_cruncher, StageKind::Infer),
            (self.skip_until_checker, StageKind::RaceCheck),
            (self.skip_until_corral, StageKind::BugFind),
        ];
        for (set, stage) in resumes {
            if set {
                config.skip_until(stage);
            }
        }

        config.add_sources(self.sources)?;
        Ok(config)
    }
}

pub fn configure_tracing(verbose: bool, debugging: bool) -> anyhow::Result<()> {
    let default_level = if debugging {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))
}

/// Parses `args` (program name first), runs the pipeline, and returns the exit
/// status. Failures are printed before returning.
pub fn run<I, T>(args: I) -> ErrorCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(err) => return parse_failure(err),
    };

    if let Some(shell) = cli.completions {
        let mut command = Cli::command();
        clap_complete::generate(shell, &mut command, "whoop", &mut io::stdout());
        return ErrorCode::Success;
    }

    if let Err(err) = configure_tracing(cli.verbose, cli.debug) {
        debug!("Tracing already configured: {err}");
    }

    let debugging = cli.debug;
    let outcome = execute(cli);
    if let Err(err) = &outcome {
        report_failure(err, debugging);
    }
    exit_code(&outcome)
}

fn parse_failure(err: clap::Error) -> ErrorCode {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
            let _ = err.print();
            ErrorCode::Success
        }
        _ => {
            let rendered = err.to_string();
            let first_line = rendered.lines().next().unwrap_or_default();
            let message = first_line.strip_prefix("error: ").unwrap_or(first_line);
            let err = WhoopError::CommandLine(format!("{message}.  Try --help for list of options"));
            report_failure(&err, false);
            err.code()
        }
    }
}

fn execute(cli: Cli) -> Result<(), WhoopError> {
    let tools_config = cli.tools_config.clone();
    let time_json = cli.time_json.clone();
    let config = cli.into_config()?;

    let tools = ToolPaths::discover(tools_config.as_deref())
        .map_err(|err| WhoopError::Configuration(format!("{err:#}")))?;
    let supervisor = ProcessSupervisor::new(true).map_err(|err| {
        WhoopError::Configuration(format!("Failed to start process supervisor: {err}"))
    })?;

    let mut ledger = CleanupLedger::new();
    let mut controller = PipelineController::new(config, &tools, supervisor)?;
    for action in controller.cleanup_actions() {
        ledger.register(action);
    }

    let outcome = match controller.run() {
        Ok(_) if controller.interrupted() => Err(WhoopError::Interrupted),
        other => other,
    };
    let silent = controller.config().silent;
    let timing_mode = controller.config().timing.clone();
    let timing = controller.into_timing();
    log_snapshot(&timing);

    if let Ok(summary) = &outcome
        && !silent
    {
        for line in summary.report_lines() {
            println!("{line}");
        }
    }

    register_timing_reports(&mut ledger, &timing, &timing_mode, exit_code(&outcome), time_json);
    ledger.run_all(outcome.is_err());
    outcome.map(|_| ())
}

fn register_timing_reports(
    ledger: &mut CleanupLedger,
    timing: &Timing,
    mode: &TimingMode,
    outcome: ErrorCode,
    time_json: Option<PathBuf>,
) {
    if let Some(report) = timing.report(mode, outcome) {
        ledger.register(CleanupAction::call("timing report", move || {
            println!("{}", report.trim_end());
            Ok(())
        }));
    }
    if let Some(path) = time_json {
        let snapshot = timing.snapshot(outcome);
        ledger.register(CleanupAction::call("timing snapshot", move || {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create timing file: {}", path.display()))?;
            serde_json::to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write timing file: {}", path.display()))?;
            Ok(())
        }));
    }
}
