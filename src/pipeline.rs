use std::fs;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use glob::Pattern;
use tracing::{debug, info, instrument, warn};

use crate::artifacts::ArtifactSet;
use crate::cleanup::CleanupAction;
use crate::config::ToolPaths;
use crate::error::WhoopError;
use crate::observability::Timing;
use crate::options::PipelineConfig;
use crate::stages::{Stage, StageArguments, StageKind, build_arguments, inline};
use crate::supervisor::{ExecOutput, SupervisorError, ToolRunner};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sources: Vec<String>,
    pub stopped_after: Option<StageKind>,
    pub bugs: Vec<PathBuf>,
    pub bug_find_runs: usize,
}

impl RunSummary {
    pub fn report_lines(&self) -> Vec<String> {
        if self.stopped_after.is_some() {
            return Vec::new();
        }
        if !self.bugs.is_empty() {
            let files: Vec<String> = self
                .bugs
                .iter()
                .map(|path| path.display().to_string())
                .collect();
            return vec![format!("Bugs found in: {}", files.join(", "))];
        }
        vec![
            format!("Verified: {}", self.sources.join(", ")),
            "(but absolutely no warranty provided)".to_string(),
        ]
    }
}

pub struct PipelineController<R: ToolRunner> {
    config: PipelineConfig,
    stages: Vec<Stage>,
    arguments: StageArguments,
    artifacts: ArtifactSet,
    runner: R,
    timing: Timing,
}

impl<R: ToolRunner> PipelineController<R> {
    pub fn new(config: PipelineConfig, tools: &ToolPaths, runner: R) -> Result<Self, WhoopError> {
        let primary = config
            .primary_source()
            .ok_or_else(|| WhoopError::CommandLine("no .c file(s) supplied".into()))?;
        let artifacts = ArtifactSet::for_input(primary);
        let arguments = build_arguments(&config, tools, &artifacts, &config.working_dir);
        Ok(Self {
            stages: tools.stages(),
            config,
            arguments,
            artifacts,
            runner,
            timing: Timing::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactSet {
        &self.artifacts
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn into_timing(self) -> Timing {
        self.timing
    }

    pub fn interrupted(&self) -> bool {
        self.runner.interrupted()
    }

    fn stage(&self, kind: StageKind) -> &Stage {
        &self.stages[kind.position()]
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.config.working_dir.join(path)
    }

    /// Runs every stage in order until the pipeline completes, a stop-after
    /// flag fires, or a stage fails. A user interrupt outranks every other
    /// outcome, including one that arrived while no tool was running.
    #[instrument(skip(self), fields(input = self.config.primary_source()))]
    pub fn run(&mut self) -> Result<RunSummary, WhoopError> {
        let outcome = self.run_stages();
        if self.runner.interrupted() {
            warn!("Run interrupted by user");
            return Err(WhoopError::Interrupted);
        }
        outcome
    }

    fn run_stages(&mut self) -> Result<RunSummary, WhoopError> {
        let mut summary = RunSummary {
            sources: self.config.source_files.clone(),
            ..RunSummary::default()
        };

        for kind in StageKind::ALL {
            if kind == StageKind::Infer && self.config.no_infer {
                debug!(stage = kind.as_str(), "Inference disabled");
                continue;
            }
            if kind == StageKind::BugFind && !self.config.find_bugs {
                continue;
            }
            if self.config.is_skipped(kind) {
                debug!(stage = kind.as_str(), "Stage skipped");
                continue;
            }

            match kind {
                StageKind::BugFind => self.run_bug_finder(&mut summary)?,
                StageKind::RaceCheck => {
                    let exec = self.invoke(kind, &[])?;
                    // Reported races are what the bug-finder consumes.
                    if self.config.find_bugs && !exec.success() {
                        info!(exit_status = exec.exit_status, "Race checker reported candidate races");
                    } else {
                        self.check_status(kind, exec)?;
                    }
                }
                _ => {
                    let exec = self.invoke(kind, &[])?;
                    self.check_status(kind, exec)?;
                }
            }

            if kind == StageKind::BitcodeToIr {
                self.mark_inline_procedures()?;
            }
            if self.config.stops_after(kind) {
                info!(stage = kind.as_str(), "Stopping after stage");
                summary.stopped_after = Some(kind);
                break;
            }
        }

        Ok(summary)
    }

    fn invoke(&mut self, kind: StageKind, extra: &[String]) -> Result<ExecOutput, WhoopError> {
        if self.runner.interrupted() {
            return Err(WhoopError::Interrupted);
        }
        let stage = self.stage(kind);
        let mut args = self.arguments.get(kind).to_vec();
        args.extend(extra.iter().cloned());
        let invocation = stage.invocation(&args, &self.config.working_dir);
        let error_code = stage.error_code;

        let budget = self.timing.remaining_budget(kind, self.config.timeout_secs);
        let timeout = (budget > 0).then(|| Duration::from_secs(budget));

        if self.config.verbose {
            println!("Running {}", kind.tool_name());
            println!("{}", invocation.command_line());
        }
        info!(
            stage = kind.as_str(),
            tool = kind.tool_name(),
            budget_secs = budget,
            "Dispatching stage"
        );

        let timer = self.timing.start_stage(kind);
        let result = self.runner.execute(&invocation, timeout);
        let elapsed = timer.finish();

        match result {
            Ok(exec) => {
                debug!(
                    stage = kind.as_str(),
                    exit_status = exec.exit_status,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Stage finished"
                );
                if self.config.echo_tool_output && !self.config.silent {
                    echo(&exec.output);
                }
                Ok(exec)
            }
            Err(SupervisorError::Launch { source, .. }) => Err(WhoopError::Launch {
                stage: kind,
                code: error_code,
                source,
                argv: invocation.argv,
            }),
            Err(SupervisorError::Timeout { .. }) => Err(WhoopError::Timeout {
                stage: kind,
                timeout: self.config.timeout_secs,
            }),
            Err(SupervisorError::Interrupted) => Err(WhoopError::Interrupted),
        }
    }

    /// Turns a non-zero exit into the stage's failure category. Output that
    /// was already shown to the user is not repeated in the error.
    fn check_status(&self, kind: StageKind, exec: ExecOutput) -> Result<ExecOutput, WhoopError> {
        if exec.success() {
            return Ok(exec);
        }
        let mut shown = self.config.echo_tool_output && !self.config.silent;
        if self.config.silent && !exec.output.is_empty() {
            let _ = io::stderr().write_all(&exec.output);
            shown = true;
        }
        warn!(
            stage = kind.as_str(),
            exit_status = exec.exit_status,
            "Stage failed"
        );
        Err(WhoopError::Tool {
            stage: kind,
            code: self.stage(kind).error_code,
            output: if shown { String::new() } else { exec.output_lossy() },
        })
    }

    fn mark_inline_procedures(&self) -> Result<(), WhoopError> {
        let program = self.resolve(&self.artifacts.bpl);
        let info = self.resolve(&self.artifacts.info);
        inline::rewrite_program(&program, &info)
            .map(|_| ())
            .map_err(|err| WhoopError::Tool {
                stage: StageKind::BitcodeToIr,
                code: self.stage(StageKind::BitcodeToIr).error_code,
                output: format!("{err:#}"),
            })
    }

    pub fn racy_candidates(&self) -> Result<Vec<PathBuf>, WhoopError> {
        let directory = self.artifacts.directory(&self.config.working_dir);
        let pattern = Pattern::new(&self.artifacts.racy_candidate_pattern())
            .map_err(|err| WhoopError::Configuration(err.to_string()))?;
        let entries = match fs::read_dir(&directory) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(WhoopError::Tool {
                    stage: StageKind::BugFind,
                    code: self.stage(StageKind::BugFind).error_code,
                    output: format!("Failed to list {}: {err}", directory.display()),
                });
            }
        };

        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| pattern.matches(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect();
        candidates.sort();
        Ok(candidates)
    }

    fn run_bug_finder(&mut self, summary: &mut RunSummary) -> Result<(), WhoopError> {
        let candidates = self.racy_candidates()?;
        info!(candidates = candidates.len(), "Checking racy candidates");

        for candidate in candidates {
            let exec = self.invoke(StageKind::BugFind, &[candidate.to_string_lossy().to_string()])?;
            summary.bug_find_runs += 1;
            if !exec.success() {
                info!(candidate = %candidate.display(), exit_status = exec.exit_status, "Bug found");
                summary.bugs.push(candidate);
            }
            if self.config.show_corral_stats {
                println!("Pairs analysed so far: {}", summary.bug_find_runs);
                println!(
                    "Time elapsed so far: {:.3}",
                    self.timing.elapsed(StageKind::BugFind).unwrap_or(0.0)
                );
            }
        }
        Ok(())
    }

    /// Deletions of the run's intermediate files, in registration order. The
    /// input itself is never deleted, and a stage's own output survives when
    /// the run stops after that stage.
    pub fn cleanup_actions(&self) -> Vec<CleanupAction> {
        if self.config.keep_temps {
            return Vec::new();
        }
        let config = &self.config;
        let artifacts = &self.artifacts;
        let input = self.resolve(&artifacts.input);

        let mut files = vec![artifacts.bc.clone()];
        if !config.stops_after(StageKind::SourceTransform) {
            files.extend([
                artifacts.re.clone(),
                artifacts.info.clone(),
                artifacts.fp_info.clone(),
            ]);
        }
        if !config.stops_after(StageKind::BitcodeToIr) {
            files.push(artifacts.bpl.clone());
        }
        if !config.stops_after(StageKind::Instrument) {
            files.push(artifacts.summaries_info.clone());
        }

        let mut actions: Vec<CleanupAction> = files
            .into_iter()
            .map(|file| self.resolve(&file))
            .filter(|path| *path != input)
            .map(CleanupAction::RemoveFile)
            .collect();

        let directory = artifacts.directory(&config.working_dir);
        let mut families = Vec::new();
        if !config.stops_after(StageKind::Infer) {
            families.push("wbpl");
        }
        if !config.stops_after(StageKind::RaceCheck) {
            families.push("bpl");
        }
        for ext in families {
            match Pattern::new(&artifacts.family_pattern(ext)) {
                Ok(pattern) => actions.push(CleanupAction::RemoveMatching {
                    dir: directory.clone(),
                    pattern,
                    keep: Some(input.clone()),
                }),
                Err(err) => warn!("Skipping cleanup of *.{ext} files: {err}"),
            }
        }
        actions
    }
}

fn echo(output: &[u8]) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = stdout.write_all(output);
    let _ = stdout.flush();
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::cleanup::CleanupLedger;
    use crate::config::tests::sample_paths;
    use crate::error::ErrorCode;
    use crate::stages::Invocation;

    #[derive(Default)]
    struct ScriptedRunner {
        calls: Vec<(StageKind, Option<Duration>, Vec<String>)>,
        exit_codes: HashMap<StageKind, i32>,
        timeout_on: Option<StageKind>,
        interrupt_on: Option<StageKind>,
        interrupt_after: Option<StageKind>,
        interrupted: bool,
    }

    impl ToolRunner for ScriptedRunner {
        fn execute(
            &mut self,
            invocation: &Invocation,
            timeout: Option<Duration>,
        ) -> Result<ExecOutput, SupervisorError> {
            let stage = invocation.stage;
            self.calls.push((stage, timeout, invocation.argv.clone()));
            if self.interrupt_on == Some(stage) {
                return Err(SupervisorError::Interrupted);
            }
            if self.interrupt_after == Some(stage) {
                self.interrupted = true;
            }
            if self.timeout_on == Some(stage) {
                return Err(SupervisorError::Timeout {
                    budget: timeout.unwrap_or_default(),
                    output: Vec::new(),
                    elapsed: timeout.unwrap_or_default(),
                });
            }
            let exit_status = self.exit_codes.get(&stage).copied().unwrap_or(0);
            Ok(ExecOutput {
                output: format!("{} output", stage.tool_name()).into_bytes(),
                exit_status,
                elapsed: Duration::ZERO,
            })
        }

        fn interrupted(&self) -> bool {
            self.interrupted
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        config: PipelineConfig,
    }

    impl Fixture {
        fn new(input: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::write(dir.path().join(input), b"int main(void) { return 0; }").unwrap();
            fs::write(
                dir.path().join("foo.bpl"),
                "procedure entry(x: int);\nprocedure helper(y: int);\n",
            )
            .unwrap();
            fs::write(dir.path().join("foo.info"), "driver::entry\n").unwrap();

            let mut config = PipelineConfig {
                working_dir: dir.path().to_path_buf(),
                ..PipelineConfig::default()
            };
            config.add_sources([input]).unwrap();
            Self { dir, config }
        }

        fn touch(&self, name: &str) {
            fs::write(self.dir.path().join(name), b"").unwrap();
        }

        fn controller(&self, runner: ScriptedRunner) -> PipelineController<ScriptedRunner> {
            PipelineController::new(self.config.clone(), &sample_paths(), runner).unwrap()
        }
    }

    fn stages_run(controller: &PipelineController<ScriptedRunner>) -> Vec<StageKind> {
        controller.runner.calls.iter().map(|(stage, _, _)| *stage).collect()
    }

    #[test]
    fn full_run_invokes_six_mandatory_stages_in_order() {
        let fixture = Fixture::new("foo.c");
        let mut controller = fixture.controller(ScriptedRunner::default());
        let summary = controller.run().unwrap();

        assert_eq!(
            stages_run(&controller),
            vec![
                StageKind::SourceTransform,
                StageKind::Compile,
                StageKind::BitcodeToIr,
                StageKind::Instrument,
                StageKind::Infer,
                StageKind::RaceCheck,
            ]
        );
        assert_eq!(
            summary.report_lines(),
            vec!["Verified: foo.c", "(but absolutely no warranty provided)"]
        );
        assert_eq!(controller.timing().calls(StageKind::Compile), 1);
    }

    #[test]
    fn bpl_input_starts_at_instrumentation() {
        let fixture = Fixture::new("foo.bpl");
        let mut controller = fixture.controller(ScriptedRunner::default());
        controller.run().unwrap();
        assert_eq!(
            stages_run(&controller),
            vec![StageKind::Instrument, StageKind::Infer, StageKind::RaceCheck]
        );
        assert_eq!(controller.timing().elapsed(StageKind::Compile), None);
    }

    #[test]
    fn skipped_stage_passes_through_to_the_next() {
        let mut fixture = Fixture::new("foo.c");
        fixture.config.skip_until(StageKind::Infer);
        let mut controller = fixture.controller(ScriptedRunner::default());
        controller.run().unwrap();
        assert_eq!(stages_run(&controller), vec![StageKind::Infer, StageKind::RaceCheck]);
    }

    #[test]
    fn stop_after_ends_run_successfully() {
        let mut fixture = Fixture::new("foo.c");
        fixture.config.stop_after.insert(StageKind::Compile);
        let mut controller = fixture.controller(ScriptedRunner::default());
        let summary = controller.run().unwrap();

        assert_eq!(stages_run(&controller), vec![StageKind::SourceTransform, StageKind::Compile]);
        assert_eq!(summary.stopped_after, Some(StageKind::Compile));
        assert!(summary.report_lines().is_empty());
    }

    #[test]
    fn stop_after_a_skipped_stage_does_not_fire() {
        let mut fixture = Fixture::new("foo.bpl");
        fixture.config.stop_after.insert(StageKind::BitcodeToIr);
        let mut controller = fixture.controller(ScriptedRunner::default());
        let summary = controller.run().unwrap();
        assert_eq!(summary.stopped_after, None);
        assert_eq!(stages_run(&controller).len(), 3);
    }

    #[test]
    fn non_zero_exit_aborts_with_stage_category() {
        let fixture = Fixture::new("foo.c");
        let runner = ScriptedRunner {
            exit_codes: HashMap::from([(StageKind::BitcodeToIr, 1)]),
            ..ScriptedRunner::default()
        };
        let mut controller = fixture.controller(runner);
        let err = controller.run().unwrap_err();

        assert_eq!(err.code(), ErrorCode::SmackError);
        assert_eq!(err.stage(), Some(StageKind::BitcodeToIr));
        assert!(err.to_string().contains("smack output"));
        assert_eq!(stages_run(&controller).len(), 3);
    }

    #[test]
    fn race_checker_failure_is_a_driver_error() {
        let fixture = Fixture::new("foo.bpl");
        let runner = ScriptedRunner {
            exit_codes: HashMap::from([(StageKind::RaceCheck, 1)]),
            ..ScriptedRunner::default()
        };
        let err = fixture.controller(runner).run().unwrap_err();
        assert_eq!(err.code(), ErrorCode::DriverError);
    }

    #[test]
    fn timeout_and_interrupt_are_classified() {
        let fixture = Fixture::new("foo.c");
        let mut config = fixture.config.clone();
        config.timeout_secs = 5;
        let runner = ScriptedRunner {
            timeout_on: Some(StageKind::Compile),
            ..ScriptedRunner::default()
        };
        let mut controller = PipelineController::new(config, &sample_paths(), runner).unwrap();
        let err = controller.run().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.to_string().starts_with("clang timed out"));
        assert_eq!(controller.runner.calls[1].1, Some(Duration::from_secs(5)));

        let runner = ScriptedRunner {
            interrupt_on: Some(StageKind::SourceTransform),
            ..ScriptedRunner::default()
        };
        let err = fixture.controller(runner).run().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CtrlC);
    }

    #[test]
    fn interrupt_between_stages_launches_nothing_further() {
        let fixture = Fixture::new("foo.c");
        let runner = ScriptedRunner {
            interrupt_after: Some(StageKind::BitcodeToIr),
            ..ScriptedRunner::default()
        };
        let mut controller = fixture.controller(runner);
        let err = controller.run().unwrap_err();

        assert_eq!(err.code(), ErrorCode::CtrlC);
        assert_eq!(
            stages_run(&controller),
            vec![StageKind::SourceTransform, StageKind::Compile, StageKind::BitcodeToIr]
        );
        assert!(controller.interrupted());
    }

    #[test]
    fn interrupt_after_last_stage_is_not_a_success() {
        let fixture = Fixture::new("foo.bpl");
        let runner = ScriptedRunner {
            interrupt_after: Some(StageKind::RaceCheck),
            ..ScriptedRunner::default()
        };
        let err = fixture.controller(runner).run().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CtrlC);
    }

    #[test]
    fn interrupt_outranks_stage_failure() {
        let fixture = Fixture::new("foo.c");
        let runner = ScriptedRunner {
            exit_codes: HashMap::from([(StageKind::Compile, 1)]),
            interrupt_after: Some(StageKind::Compile),
            ..ScriptedRunner::default()
        };
        let err = fixture.controller(runner).run().unwrap_err();
        assert_eq!(err.code(), ErrorCode::CtrlC);
    }

    #[test]
    fn zero_timeout_passes_no_deadline() {
        let fixture = Fixture::new("foo.c");
        let mut controller = fixture.controller(ScriptedRunner::default());
        controller.run().unwrap();
        assert!(controller.runner.calls.iter().all(|(_, timeout, _)| timeout.is_none()));
    }

    #[test]
    fn no_infer_bypasses_inference_even_when_not_skipped() {
        let mut fixture = Fixture::new("foo.bpl");
        fixture.config.no_infer = true;
        let mut controller = fixture.controller(ScriptedRunner::default());
        controller.run().unwrap();
        assert_eq!(
            stages_run(&controller),
            vec![StageKind::Instrument, StageKind::RaceCheck]
        );
    }

    #[test]
    fn inline_rewrite_runs_once_after_translation() {
        let fixture = Fixture::new("foo.c");
        let mut controller = fixture.controller(ScriptedRunner::default());
        controller.run().unwrap();

        let program = fs::read_to_string(fixture.dir.path().join("foo.bpl")).unwrap();
        assert_eq!(
            program,
            "procedure entry(x: int);\nprocedure {:inline 1} helper(y: int);\n"
        );
    }

    #[test]
    fn missing_info_file_fails_translation() {
        let fixture = Fixture::new("foo.c");
        fs::remove_file(fixture.dir.path().join("foo.info")).unwrap();
        let err = fixture.controller(ScriptedRunner::default()).run().unwrap_err();
        assert_eq!(err.code(), ErrorCode::SmackError);
        assert!(err.to_string().contains("Failed to read info file"));
    }

    #[test]
    fn bug_finder_runs_once_per_candidate() {
        let mut fixture = Fixture::new("foo.bpl");
        fixture.config.find_bugs = true;
        fixture.config.timeout_secs = 10;
        for n in [3, 1, 2] {
            fixture.touch(&format!("foo_check_racy_{n}.bpl"));
        }
        fixture.touch("bar_check_racy_1.bpl");

        let runner = ScriptedRunner {
            exit_codes: HashMap::from([(StageKind::RaceCheck, 1)]),
            ..ScriptedRunner::default()
        };
        let mut controller = fixture.controller(runner);
        let summary = controller.run().unwrap();

        let corral_calls: Vec<_> = controller
            .runner
            .calls
            .iter()
            .filter(|(stage, _, _)| *stage == StageKind::BugFind)
            .collect();
        assert_eq!(corral_calls.len(), 3);
        assert_eq!(summary.bug_find_runs, 3);
        assert_eq!(controller.timing().calls(StageKind::BugFind), 3);
        assert!(corral_calls[0].2.last().unwrap().ends_with("foo_check_racy_1.bpl"));
        assert!(corral_calls[2].2.last().unwrap().ends_with("foo_check_racy_3.bpl"));
        assert!(summary.bugs.is_empty());
    }

    #[test]
    fn bug_finder_budget_shrinks_with_time_spent() {
        let mut fixture = Fixture::new("foo.bpl");
        fixture.config.find_bugs = true;
        fixture.config.timeout_secs = 10;
        fixture.touch("foo_check_racy_1.bpl");

        let mut controller = fixture.controller(ScriptedRunner::default());
        controller.timing.record(StageKind::BugFind, Duration::from_secs_f64(4.5));
        controller.run().unwrap();

        let (_, timeout, _) = controller.runner.calls.last().unwrap();
        assert_eq!(*timeout, Some(Duration::from_secs(6)));
    }

    #[test]
    fn bug_finder_non_zero_exit_reports_bugs() {
        let mut fixture = Fixture::new("foo.bpl");
        fixture.config.find_bugs = true;
        fixture.touch("foo_check_racy_1.bpl");

        let runner = ScriptedRunner {
            exit_codes: HashMap::from([(StageKind::BugFind, 1)]),
            ..ScriptedRunner::default()
        };
        let summary = fixture.controller(runner).run().unwrap();
        assert_eq!(summary.bugs.len(), 1);
        assert!(summary.report_lines()[0].starts_with("Bugs found in: "));
    }

    #[test]
    fn launch_failure_carries_stage_category() {
        struct Unlaunchable;
        impl ToolRunner for Unlaunchable {
            fn execute(
                &mut self,
                invocation: &Invocation,
                _timeout: Option<Duration>,
            ) -> Result<ExecOutput, SupervisorError> {
                Err(SupervisorError::Launch {
                    program: invocation.program().unwrap_or_default().to_string(),
                    source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
                })
            }
        }

        let fixture = Fixture::new("foo.bpl");
        let mut controller =
            PipelineController::new(fixture.config.clone(), &sample_paths(), Unlaunchable).unwrap();
        let err = controller.run().unwrap_err();
        assert_eq!(err.code(), ErrorCode::WhoopError);
        assert!(err.to_string().starts_with("While invoking whoopEngine: No such file"));
    }

    #[test]
    fn cleanup_removes_intermediates_but_not_the_input() {
        let fixture = Fixture::new("foo.c");
        for name in [
            "foo.re.c",
            "foo.bc",
            "foo.fp.info",
            "foo.summaries.info",
            "foo.wbpl",
            "foo_check_racy_1.bpl",
            "other.bpl",
        ] {
            fixture.touch(name);
        }
        let controller = fixture.controller(ScriptedRunner::default());

        let mut ledger = CleanupLedger::new();
        for action in controller.cleanup_actions() {
            ledger.register(action);
        }
        assert_eq!(ledger.run_all(false), 0);

        let mut left: Vec<String> = fs::read_dir(fixture.dir.path())
            .unwrap()
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec!["foo.c", "other.bpl"]);
    }

    #[test]
    fn cleanup_keeps_output_of_final_stage_and_direct_inputs() {
        let mut fixture = Fixture::new("foo.bpl");
        fixture.config.stop_after.insert(StageKind::Instrument);
        fixture.touch("foo.summaries.info");
        let controller = fixture.controller(ScriptedRunner::default());

        let mut ledger = CleanupLedger::new();
        for action in controller.cleanup_actions() {
            ledger.register(action);
        }
        ledger.run_all(false);

        assert!(fixture.dir.path().join("foo.bpl").exists());
        assert!(fixture.dir.path().join("foo.summaries.info").exists());
        assert!(!fixture.dir.path().join("foo.info").exists());
    }

    #[test]
    fn keep_temps_registers_nothing() {
        let mut fixture = Fixture::new("foo.c");
        fixture.config.keep_temps = true;
        assert!(fixture.controller(ScriptedRunner::default()).cleanup_actions().is_empty());
    }
}
