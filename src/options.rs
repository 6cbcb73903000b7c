use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::ValueEnum;
use serde::Serialize;

use crate::artifacts::split_filename_ext;
use crate::error::WhoopError;
use crate::stages::StageKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Solver {
    #[default]
    Z3,
    Cvc4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ValueEnum)]
pub enum Logic {
    #[value(name = "ALL_SUPPORTED")]
    AllSupported,
    #[value(name = "QF_ALL_SUPPORTED")]
    QfAllSupported,
    #[default]
    #[value(name = "AUFLIRA")]
    Auflira,
}

impl Logic {
    pub fn as_str(self) -> &'static str {
        match self {
            Logic::AllSupported => "ALL_SUPPORTED",
            Logic::QfAllSupported => "QF_ALL_SUPPORTED",
            Logic::Auflira => "AUFLIRA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum YieldMode {
    #[default]
    Cooperative,
    All,
    Coarse,
    NoAccess,
}

impl YieldMode {
    pub fn from_flags(all: bool, coarse: bool, no_access: bool) -> Self {
        if all {
            YieldMode::All
        } else if coarse {
            YieldMode::Coarse
        } else if no_access {
            YieldMode::NoAccess
        } else {
            YieldMode::Cooperative
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TimingMode {
    #[default]
    Off,
    Human,
    Csv {
        label: String,
    },
}

/// Accumulated configuration for one run. A fresh value is built per run, so
/// reusing the driver as a library never leaks settings between runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub source_files: Vec<String>,
    pub working_dir: PathBuf,
    pub skip: BTreeSet<StageKind>,
    pub stop_after: BTreeSet<StageKind>,
    pub timeout_secs: u64,
    pub solver: Solver,
    pub logic: Logic,
    pub includes: Vec<String>,
    pub defines: Vec<String>,
    pub clang_options: Vec<String>,
    pub smack_options: Vec<String>,
    pub boogie_options: Vec<String>,
    pub boogie_files: Vec<String>,
    pub analyse_only: String,
    pub only_races: bool,
    pub find_bugs: bool,
    pub skip_non_racy_pairs: bool,
    pub no_infer: bool,
    pub inline: bool,
    pub inline_bound: u32,
    pub k: u32,
    pub recursion_bound: u32,
    pub static_loop_bound: u32,
    pub yield_mode: YieldMode,
    pub yield_race_checking: bool,
    pub optimize_corral: bool,
    pub show_corral_stats: bool,
    pub no_heavy_async_calls_optimisation: bool,
    pub check_in_param_aliasing: bool,
    pub no_existential_opts: bool,
    pub use_other_model: bool,
    pub verbose: bool,
    pub silent: bool,
    pub print_pairs: bool,
    pub generate_smt2: bool,
    pub keep_temps: bool,
    pub debugging: bool,
    pub time_passes: bool,
    pub timing: TimingMode,
    pub echo_tool_output: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            source_files: Vec::new(),
            working_dir: PathBuf::from("."),
            skip: BTreeSet::new(),
            stop_after: BTreeSet::new(),
            timeout_secs: 0,
            solver: Solver::default(),
            logic: Logic::default(),
            includes: Vec::new(),
            defines: Vec::new(),
            clang_options: Vec::new(),
            smack_options: Vec::new(),
            boogie_options: Vec::new(),
            boogie_files: Vec::new(),
            analyse_only: String::new(),
            only_races: false,
            find_bugs: false,
            skip_non_racy_pairs: false,
            no_infer: false,
            inline: false,
            inline_bound: 0,
            k: 2,
            recursion_bound: 1,
            static_loop_bound: 0,
            yield_mode: YieldMode::default(),
            yield_race_checking: false,
            optimize_corral: false,
            show_corral_stats: false,
            no_heavy_async_calls_optimisation: false,
            check_in_param_aliasing: false,
            no_existential_opts: false,
            use_other_model: false,
            verbose: false,
            silent: false,
            print_pairs: false,
            generate_smt2: false,
            keep_temps: false,
            debugging: false,
            time_passes: false,
            timing: TimingMode::Off,
            echo_tool_output: false,
        }
    }
}

impl PipelineConfig {
    pub fn add_source(&mut self, source: impl Into<String>) -> Result<(), WhoopError> {
        let source = source.into();
        let (_, ext) = split_filename_ext(&source);
        let resume_at = match ext.as_str() {
            ".c" => None,
            ".re.c" => Some(StageKind::Compile),
            ".bc" => Some(StageKind::BitcodeToIr),
            ".bpl" => Some(StageKind::Instrument),
            _ => {
                return Err(WhoopError::CommandLine(format!(
                    "'{source}' has unknown file extension, the supported file extension is .c"
                )));
            }
        };
        if let Some(stage) = resume_at {
            self.skip_until(stage);
        }
        self.source_files.push(source);
        Ok(())
    }

    pub fn add_sources<I, S>(&mut self, sources: I) -> Result<(), WhoopError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for source in sources {
            self.add_source(source)?;
        }
        if self.source_files.is_empty() {
            return Err(WhoopError::CommandLine("no .c file(s) supplied".into()));
        }
        Ok(())
    }

    pub fn skip_until(&mut self, stage: StageKind) {
        self.skip.extend(stage.predecessors().iter().copied());
    }

    pub fn is_skipped(&self, stage: StageKind) -> bool {
        self.skip.contains(&stage)
    }

    pub fn stops_after(&self, stage: StageKind) -> bool {
        self.stop_after.contains(&stage)
    }

    pub fn primary_source(&self) -> Option<&str> {
        self.source_files.first().map(String::as_str)
    }
}

pub fn split_tool_options(raw: &str) -> Vec<String> {
    raw.split(' ').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_sources_run_every_stage() {
        let mut config = PipelineConfig::default();
        config.add_sources(["foo.c"]).unwrap();
        assert!(config.skip.is_empty());
        assert_eq!(config.primary_source(), Some("foo.c"));
    }

    #[test]
    fn intermediate_inputs_skip_earlier_stages() {
        let mut config = PipelineConfig::default();
        config.add_source("foo.bpl").unwrap();
        assert!(config.is_skipped(StageKind::SourceTransform));
        assert!(config.is_skipped(StageKind::Compile));
        assert!(config.is_skipped(StageKind::BitcodeToIr));
        assert!(!config.is_skipped(StageKind::Instrument));

        let mut config = PipelineConfig::default();
        config.add_source("foo.re.c").unwrap();
        assert_eq!(
            config.skip.iter().copied().collect::<Vec<_>>(),
            vec![StageKind::SourceTransform]
        );

        let mut config = PipelineConfig::default();
        config.add_source("foo.bc").unwrap();
        assert!(config.is_skipped(StageKind::Compile));
        assert!(!config.is_skipped(StageKind::BitcodeToIr));
    }

    #[test]
    fn unknown_extension_is_a_command_line_error() {
        let mut config = PipelineConfig::default();
        let err = config.add_source("foo.cpp").unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::CommandLineError);
        assert!(err.to_string().contains("'foo.cpp' has unknown file extension"));
    }

    #[test]
    fn empty_input_list_is_rejected() {
        let mut config = PipelineConfig::default();
        let err = config.add_sources(Vec::<String>::new()).unwrap_err();
        assert_eq!(err.to_string(), "no .c file(s) supplied");
    }

    #[test]
    fn yield_precedence() {
        assert_eq!(YieldMode::from_flags(true, true, true), YieldMode::All);
        assert_eq!(YieldMode::from_flags(false, true, true), YieldMode::Coarse);
        assert_eq!(YieldMode::from_flags(false, false, true), YieldMode::NoAccess);
        assert_eq!(YieldMode::from_flags(false, false, false), YieldMode::Cooperative);
    }
}
