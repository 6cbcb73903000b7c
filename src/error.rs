use std::fmt;
use std::io;

use thiserror::Error;

use crate::stages::StageKind;

/// Externally observable outcome classification. The numeric value is the
/// process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    CommandLineError = 1,
    ConfigurationError = 2,
    ClangError = 3,
    SmackError = 4,
    WhoopError = 5,
    DriverError = 6,
    CorralError = 7,
    Timeout = 8,
    CtrlC = 9,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::CommandLineError => "COMMAND_LINE_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::ClangError => "CLANG_ERROR",
            ErrorCode::SmackError => "SMACK_ERROR",
            ErrorCode::WhoopError => "WHOOP_ERROR",
            ErrorCode::DriverError => "DRIVER_ERROR",
            ErrorCode::CorralError => "CORRAL_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::CtrlC => "CTRL_C",
        }
    }

    pub fn is_quiet(self) -> bool {
        matches!(self, ErrorCode::Success | ErrorCode::DriverError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WhoopError {
    #[error("{0}")]
    CommandLine(String),

    #[error("{0}")]
    Configuration(String),

    #[error("{output}")]
    Tool {
        stage: StageKind,
        code: ErrorCode,
        output: String,
    },

    #[error("While invoking {}: {source}\nWith command line args:\n{argv:#?}", .stage.tool_name())]
    Launch {
        stage: StageKind,
        code: ErrorCode,
        #[source]
        source: io::Error,
        argv: Vec<String>,
    },

    #[error(
        "{} timed out. Use --timeout=N with N > {timeout} to increase timeout, or --timeout=0 to disable timeout.",
        .stage.tool_name()
    )]
    Timeout { stage: StageKind, timeout: u64 },

    #[error("interrupted by user")]
    Interrupted,
}

impl WhoopError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WhoopError::CommandLine(_) => ErrorCode::CommandLineError,
            WhoopError::Configuration(_) => ErrorCode::ConfigurationError,
            WhoopError::Tool { code, .. } | WhoopError::Launch { code, .. } => *code,
            WhoopError::Timeout { .. } => ErrorCode::Timeout,
            WhoopError::Interrupted => ErrorCode::CtrlC,
        }
    }

    pub fn stage(&self) -> Option<StageKind> {
        match self {
            WhoopError::Tool { stage, .. }
            | WhoopError::Launch { stage, .. }
            | WhoopError::Timeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            WhoopError::Interrupted => None,
            WhoopError::Tool { output, .. } if output.trim().is_empty() => None,
            other => Some(other.to_string()),
        }
    }

    pub fn render(&self) -> String {
        if let WhoopError::CommandLine(msg) = self {
            return format!("Whoop: {msg}");
        }
        let code = self.code();
        let mut rendered = format!("Whoop: {} error ({})", code, code.as_i32());
        if let Some(msg) = self.message() {
            rendered.push_str(": ");
            rendered.push_str(&msg);
        }
        rendered
    }
}

pub fn exit_code<T>(outcome: &Result<T, WhoopError>) -> ErrorCode {
    match outcome {
        Ok(_) => ErrorCode::Success,
        Err(err) => err.code(),
    }
}

/// Prints a failure unless it is an expected outcome. Command-line errors go to
/// stdout, everything else to stderr.
pub fn report_failure(err: &WhoopError, debugging: bool) {
    if err.code().is_quiet() && !debugging {
        return;
    }
    match err {
        WhoopError::CommandLine(_) => println!("{}", err.render()),
        _ => eprintln!("{}", err.render()),
    }
}
