use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::ErrorCode;

pub mod flags;
pub mod inline;

pub use flags::{StageArguments, build_arguments};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    SourceTransform,
    Compile,
    BitcodeToIr,
    Instrument,
    Infer,
    RaceCheck,
    BugFind,
}

impl StageKind {
    pub const ALL: [StageKind; 7] = [
        StageKind::SourceTransform,
        StageKind::Compile,
        StageKind::BitcodeToIr,
        StageKind::Instrument,
        StageKind::Infer,
        StageKind::RaceCheck,
        StageKind::BugFind,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::SourceTransform => "source-transform",
            StageKind::Compile => "compile",
            StageKind::BitcodeToIr => "bitcode-to-ir",
            StageKind::Instrument => "instrument",
            StageKind::Infer => "infer",
            StageKind::RaceCheck => "race-check",
            StageKind::BugFind => "bug-find",
        }
    }

    pub fn tool_name(self) -> &'static str {
        match self {
            StageKind::SourceTransform => "chauffeur",
            StageKind::Compile => "clang",
            StageKind::BitcodeToIr => "smack",
            StageKind::Instrument => "whoopEngine",
            StageKind::Infer => "whoopCruncher",
            StageKind::RaceCheck => "whoopRaceChecker",
            StageKind::BugFind => "corral",
        }
    }

    pub fn error_code(self) -> ErrorCode {
        match self {
            StageKind::SourceTransform | StageKind::Compile => ErrorCode::ClangError,
            StageKind::BitcodeToIr => ErrorCode::SmackError,
            StageKind::Instrument | StageKind::Infer => ErrorCode::WhoopError,
            StageKind::RaceCheck => ErrorCode::DriverError,
            StageKind::BugFind => ErrorCode::CorralError,
        }
    }

    pub fn position(self) -> usize {
        self as usize
    }

    pub fn predecessors(self) -> &'static [StageKind] {
        &Self::ALL[..self.position()]
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable stage descriptor: the command prefix that launches the tool and
/// the failure category for a non-zero exit. Built once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub kind: StageKind,
    pub command: Vec<String>,
    pub error_code: ErrorCode,
}

impl Stage {
    pub fn new(kind: StageKind, command: Vec<String>) -> Self {
        Self {
            kind,
            command,
            error_code: kind.error_code(),
        }
    }

    pub fn invocation(&self, args: &[String], cwd: impl Into<PathBuf>) -> Invocation {
        let mut argv = self.command.clone();
        argv.extend(args.iter().cloned());
        Invocation {
            stage: self.kind,
            argv,
            cwd: cwd.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub stage: StageKind,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
}

impl Invocation {
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered_like_the_pipeline() {
        let mut sorted = StageKind::ALL;
        sorted.sort();
        assert_eq!(sorted, StageKind::ALL);
        assert_eq!(StageKind::Instrument.predecessors().len(), 3);
        assert!(StageKind::SourceTransform.predecessors().is_empty());
    }

    #[test]
    fn error_categories_follow_tools() {
        assert_eq!(StageKind::SourceTransform.error_code(), ErrorCode::ClangError);
        assert_eq!(StageKind::Infer.error_code(), ErrorCode::WhoopError);
        assert_eq!(StageKind::RaceCheck.error_code(), ErrorCode::DriverError);
        assert_eq!(StageKind::BugFind.error_code(), ErrorCode::CorralError);
    }

    #[test]
    fn invocation_prepends_command_prefix() {
        let stage = Stage::new(
            StageKind::BugFind,
            vec!["mono".into(), "/opt/corral/corral.exe".into()],
        );
        let invocation = stage.invocation(&["/k:2".to_string()], "/work");
        assert_eq!(invocation.program(), Some("mono"));
        assert_eq!(invocation.args(), ["/opt/corral/corral.exe", "/k:2"]);
        assert_eq!(invocation.command_line(), "mono /opt/corral/corral.exe /k:2");
    }
}
