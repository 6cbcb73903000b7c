//! Inline annotation pass applied to the translated program before
//! instrumentation.
//!
//! Every `procedure <name>(` declaration whose name does not appear on the
//! right-hand side of a `::` line in the companion info file is rewritten to
//! `procedure {:inline 1} <name>(`. The pass runs exactly once per generated
//! program, right after translation. Declarations that already carry an
//! attribute are not matched by the declaration pattern, so output of an
//! earlier pass is left as it is rather than annotated again.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

static PROCEDURE_DECL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"procedure[ ]*([a-zA-Z0-9_$]*)[ ]*\(").expect("procedure pattern is valid")
});

/// Procedure names listed in the info file as already defined elsewhere.
pub fn parse_defined_procedures(info: &str) -> HashSet<String> {
    info.lines()
        .filter(|line| line.contains("::"))
        .filter_map(|line| line.split("::").nth(1))
        .map(str::to_string)
        .collect()
}

/// Rewrites every procedure declaration, returning the new text and the number
/// of declarations marked for inlining.
pub fn mark_inline_procedures(program: &str, defined: &HashSet<String>) -> (String, usize) {
    let mut inlined = 0usize;
    let rewritten = PROCEDURE_DECL.replace_all(program, |caps: &Captures<'_>| {
        let name = &caps[1];
        if defined.contains(name) {
            format!("procedure {name}(")
        } else {
            inlined += 1;
            format!("procedure {{:inline 1}} {name}(")
        }
    });
    (rewritten.into_owned(), inlined)
}

pub fn rewrite_program(program_path: &Path, info_path: &Path) -> Result<usize> {
    let info = fs::read_to_string(info_path)
        .with_context(|| format!("Failed to read info file: {}", info_path.display()))?;
    let program = fs::read_to_string(program_path)
        .with_context(|| format!("Failed to read program: {}", program_path.display()))?;

    let defined = parse_defined_procedures(&info);
    let (rewritten, inlined) = mark_inline_procedures(&program, &defined);
    fs::write(program_path, rewritten)
        .with_context(|| format!("Failed to write program: {}", program_path.display()))?;

    debug!(
        program = %program_path.display(),
        defined = defined.len(),
        inlined,
        "Inline annotations applied"
    );
    Ok(inlined)
}
