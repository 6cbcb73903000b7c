use std::collections::BTreeMap;
use std::path::Path;

use crate::artifacts::ArtifactSet;
use crate::config::{ToolPaths, path_string};
use crate::options::{PipelineConfig, Solver, YieldMode};

use super::StageKind;

const CLANG_BASE: &[&str] = &[
    "-w",
    "-g",
    "-emit-llvm",
    "-O0",
    "-c",
    "-DMEMORY_MODEL_NO_REUSE_IMPLS",
];

const RACE_CHECKER_BASE: &[&str] = &[
    "/nologo",
    "/typeEncoding:m",
    "/mv:-",
    "/doNotUseLabels",
    "/enhancedErrorMessages:1",
];

/// Flags for every stage, excluding the command prefix. The bug-finder's list
/// omits the candidate file, which is appended per invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageArguments {
    args: BTreeMap<StageKind, Vec<String>>,
}

impl StageArguments {
    pub fn get(&self, stage: StageKind) -> &[String] {
        self.args.get(&stage).map(Vec::as_slice).unwrap_or_default()
    }

    fn push(&mut self, stage: StageKind, flag: impl Into<String>) {
        self.args.entry(stage).or_default().push(flag.into());
    }

    fn extend<I, S>(&mut self, stage: StageKind, flags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entry = self.args.entry(stage).or_default();
        entry.extend(flags.into_iter().map(Into::into));
    }

    fn push_all(&mut self, stages: &[StageKind], flag: impl Into<String>) {
        let flag = flag.into();
        for stage in stages {
            self.push(*stage, flag.clone());
        }
    }
}

const BOOGIE_TOOLS: &[StageKind] = &[StageKind::Instrument, StageKind::Infer, StageKind::RaceCheck];
const INSTRUMENT_AND_INFER: &[StageKind] = &[StageKind::Instrument, StageKind::Infer];
const INFER_AND_CHECK: &[StageKind] = &[StageKind::Infer, StageKind::RaceCheck];
const INSTRUMENT_AND_CHECK: &[StageKind] = &[StageKind::Instrument, StageKind::RaceCheck];

pub fn build_arguments(
    config: &PipelineConfig,
    tools: &ToolPaths,
    artifacts: &ArtifactSet,
    working_dir: &Path,
) -> StageArguments {
    let mut out = StageArguments::default();
    let model_includes = if config.use_other_model {
        tools.other_model_includes()
    } else {
        tools.core_includes()
    };
    let model_includes: Vec<String> = model_includes.iter().map(|p| path_string(p)).collect();
    let mut includes = config.includes.clone();
    includes.extend(model_includes.iter().cloned());

    // source-transform
    if config.inline {
        out.push(StageKind::SourceTransform, "-inline");
    }
    out.push(StageKind::SourceTransform, path_string(&artifacts.input));
    out.extend(StageKind::SourceTransform, ["--", "-w"]);
    out.push(
        StageKind::SourceTransform,
        format!("-I{}", path_string(&tools.clang_resource_include())),
    );
    out.extend(
        StageKind::SourceTransform,
        model_includes.iter().map(|inc| format!("-I{inc}")),
    );
    out.extend(
        StageKind::SourceTransform,
        includes.iter().map(|inc| format!("-I{inc}")),
    );

    // compile
    out.extend(StageKind::Compile, CLANG_BASE.iter().copied());
    out.extend(StageKind::Compile, config.clang_options.iter().cloned());
    out.extend(
        StageKind::Compile,
        ["-o".to_string(), path_string(&artifacts.bc), path_string(&artifacts.re)],
    );
    out.extend(StageKind::Compile, includes.iter().map(|inc| format!("-I{inc}")));
    out.extend(StageKind::Compile, config.defines.iter().map(|def| format!("-D{def}")));

    // bitcode-to-ir
    out.extend(StageKind::BitcodeToIr, config.smack_options.iter().cloned());
    out.extend(
        StageKind::BitcodeToIr,
        [
            path_string(&artifacts.bc),
            "-o".to_string(),
            path_string(&artifacts.bpl),
            "--source-loc-syms".to_string(),
        ],
    );

    // instrument, infer, race-check
    out.extend(StageKind::RaceCheck, RACE_CHECKER_BASE.iter().copied());
    for option in &config.boogie_options {
        out.push_all(BOOGIE_TOOLS, option.clone());
    }
    for file in &config.boogie_files {
        out.push_all(BOOGIE_TOOLS, file.clone());
    }
    if config.inline {
        out.push_all(INSTRUMENT_AND_INFER, "/inline");
    }
    out.push_all(
        BOOGIE_TOOLS,
        format!("/whoopDecl:{}", path_string(&tools.whoop_decl())),
    );
    match config.solver {
        Solver::Cvc4 => {
            out.push_all(BOOGIE_TOOLS, "/proverOpt:SOLVER=cvc4");
            out.push_all(
                BOOGIE_TOOLS,
                format!("/cvc4exe:{}", path_string(&tools.cvc4_exe())),
            );
            out.push_all(
                BOOGIE_TOOLS,
                format!("/proverOpt:LOGIC={}", config.logic.as_str()),
            );
            out.push_all(BOOGIE_TOOLS, "/useArrayTheory");
        }
        Solver::Z3 => {
            out.push_all(BOOGIE_TOOLS, format!("/z3exe:{}", path_string(&tools.z3_exe())));
        }
    }
    if config.generate_smt2 {
        out.push_all(
            INFER_AND_CHECK,
            format!("/proverLog:{}", path_string(&artifacts.smt2)),
        );
    }
    if config.print_pairs {
        out.push(StageKind::Instrument, "/printPairs");
    }
    if config.debugging {
        out.push_all(BOOGIE_TOOLS, "/debugWhoop");
    }
    out.push_all(
        BOOGIE_TOOLS,
        format!(
            "/originalFile:{}",
            path_string(&artifacts.original_file(working_dir))
        ),
    );
    if config.only_races {
        out.push(StageKind::Instrument, "/onlyRaceChecking");
    }
    out.push_all(
        INSTRUMENT_AND_INFER,
        format!("/inlineBound:{}", config.inline_bound),
    );

    // bug-find
    out.push(StageKind::BugFind, format!("/k:{}", config.k));
    out.push(
        StageKind::BugFind,
        format!("/recursionBound:{}", config.recursion_bound),
    );
    if config.static_loop_bound > 0 {
        out.push(
            StageKind::BugFind,
            format!("/maxStaticLoopBound:{}", config.static_loop_bound),
        );
    }

    if config.check_in_param_aliasing {
        out.push(StageKind::Instrument, "/checkInParamAliasing");
    }
    if config.no_existential_opts {
        out.push(StageKind::Instrument, "/noExistentialOpts");
    }
    if !config.analyse_only.is_empty() {
        out.push(
            StageKind::RaceCheck,
            format!("/analyseOnly:{}", config.analyse_only),
        );
    }
    if config.time_passes {
        out.push_all(BOOGIE_TOOLS, "/timePasses");
    }
    if config.no_infer {
        out.push_all(INSTRUMENT_AND_CHECK, "/skipInference");
    }
    if config.no_heavy_async_calls_optimisation {
        out.push(StageKind::Instrument, "/noHeavyAsyncCallsOptimisation");
    }
    if config.find_bugs {
        out.push(StageKind::RaceCheck, "/findBugs");
    }
    if config.skip_non_racy_pairs {
        out.push(StageKind::RaceCheck, "/skipRaceFreePairs");
    }
    match config.yield_mode {
        YieldMode::All => out.push(StageKind::RaceCheck, "/yieldAll"),
        YieldMode::Coarse => {
            out.push(StageKind::RaceCheck, "/yieldCoarse");
            out.push(StageKind::BugFind, "/cooperative");
        }
        YieldMode::NoAccess => out.push(StageKind::RaceCheck, "/yieldNoAccess"),
        YieldMode::Cooperative => out.push(StageKind::BugFind, "/cooperative"),
    }
    if config.optimize_corral {
        out.push(StageKind::BugFind, "/cooperative");
        out.push(StageKind::RaceCheck, "/optimizeCorral");
    }
    if config.yield_race_checking {
        out.push(StageKind::RaceCheck, "/yieldRaceChecking");
    }
    out.push(StageKind::Infer, "/contractInfer");

    out.push_all(BOOGIE_TOOLS, path_string(&artifacts.bpl));
    out
}
