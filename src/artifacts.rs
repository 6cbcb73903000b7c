use std::path::{Path, PathBuf};

/// Splits a path into its stem and extension, treating `.re.c` as a single
/// extension so pre-processed sources resume at the compile stage.
pub fn split_filename_ext(path: &str) -> (String, String) {
    let (filename, ext) = split_last_ext(path);
    if ext == ".c" && filename.ends_with(".re") {
        let (filename, _) = split_last_ext(filename);
        return (filename.to_string(), ".re.c".to_string());
    }
    (filename.to_string(), ext.to_string())
}

fn split_last_ext(path: &str) -> (&str, &str) {
    let name_start = path.rfind(['/', '\\']).map(|idx| idx + 1).unwrap_or(0);
    let name = &path[name_start..];
    match name.rfind('.') {
        // A leading dot names a hidden file, not an extension.
        Some(dot) if name[..dot].chars().any(|c| c != '.') => {
            let split = name_start + dot;
            (&path[..split], &path[split..])
        }
        _ => (path, ""),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    pub input: PathBuf,
    pub stem: String,
    pub extension: String,
    pub re: PathBuf,
    pub bc: PathBuf,
    pub bpl: PathBuf,
    pub info: PathBuf,
    pub fp_info: PathBuf,
    pub summaries_info: PathBuf,
    pub smt2: PathBuf,
}

impl ArtifactSet {
    pub fn for_input(input: &str) -> Self {
        let (stem, extension) = split_filename_ext(input);
        let with = |suffix: &str| PathBuf::from(format!("{stem}{suffix}"));
        Self {
            input: PathBuf::from(input),
            re: with(".re.c"),
            bc: with(".bc"),
            bpl: with(".bpl"),
            info: with(".info"),
            fp_info: with(".fp.info"),
            summaries_info: with(".summaries.info"),
            smt2: with(".smt2"),
            stem,
            extension,
        }
    }

    pub fn base_name(&self) -> String {
        Path::new(&self.stem)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn directory(&self, working_dir: &Path) -> PathBuf {
        let resolved = working_dir.join(&self.input);
        resolved
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| working_dir.to_path_buf())
    }

    /// fnmatch-style pattern naming the race checker's per-pair outputs.
    pub fn racy_candidate_pattern(&self) -> String {
        format!("{}_check_racy_*.bpl", glob::Pattern::escape(&self.base_name()))
    }

    pub fn family_pattern(&self, ext: &str) -> String {
        format!("{}*.{ext}", glob::Pattern::escape(&self.base_name()))
    }

    /// Absolute form of the input without extension, as the instrumentation
    /// tools expect for `/originalFile:`.
    pub fn original_file(&self, working_dir: &Path) -> PathBuf {
        working_dir.join(format!("{}{}", self.stem, self.extension))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_recognises_compound_extension() {
        assert_eq!(
            split_filename_ext("drivers/foo.re.c"),
            ("drivers/foo".to_string(), ".re.c".to_string())
        );
        assert_eq!(split_filename_ext("foo.c"), ("foo".to_string(), ".c".to_string()));
        assert_eq!(split_filename_ext("foo.bpl"), ("foo".to_string(), ".bpl".to_string()));
        assert_eq!(split_filename_ext("dir.d/foo"), ("dir.d/foo".to_string(), String::new()));
        assert_eq!(split_filename_ext(".hidden"), (".hidden".to_string(), String::new()));
    }

    #[test]
    fn artifacts_share_the_input_stem() {
        let set = ArtifactSet::for_input("net/e1000.c");
        assert_eq!(set.bc, PathBuf::from("net/e1000.bc"));
        assert_eq!(set.summaries_info, PathBuf::from("net/e1000.summaries.info"));
        assert_eq!(set.base_name(), "e1000");
        assert_eq!(set.racy_candidate_pattern(), "e1000_check_racy_*.bpl");
        assert_eq!(set.family_pattern("wbpl"), "e1000*.wbpl");
        assert_eq!(
            set.directory(Path::new("/work")),
            PathBuf::from("/work/net")
        );
    }

    #[test]
    fn racy_pattern_matches_only_candidates() {
        let set = ArtifactSet::for_input("foo.c");
        let pattern = glob::Pattern::new(&set.racy_candidate_pattern()).unwrap();
        assert!(pattern.matches("foo_check_racy_0_1.bpl"));
        assert!(!pattern.matches("foo.bpl"));
        assert!(!pattern.matches("bar_check_racy_0_1.bpl"));
    }
}
