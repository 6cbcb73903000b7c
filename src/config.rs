use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::debug;

use crate::stages::{Stage, StageKind};

pub const CONFIG_ENV: &str = "WHOOP_TOOLS_CONFIG";
pub const CONFIG_FILE_NAME: &str = "findtools.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct ToolPaths {
    pub chauffeur_dir: PathBuf,
    pub llvm_bin_dir: PathBuf,
    pub llvm_lib_dir: PathBuf,
    pub smack_bin_dir: PathBuf,
    pub smack_src_dir: PathBuf,
    pub whoop_dir: PathBuf,
    pub whoop_bin_dir: PathBuf,
    pub corral_bin_dir: PathBuf,
    pub z3_bin_dir: PathBuf,
    pub cvc4_bin_dir: PathBuf,
    #[serde(default = "default_clang_version")]
    pub clang_version: String,
    #[serde(default = "default_use_mono")]
    pub use_mono: bool,
}

fn default_clang_version() -> String {
    "3.5.2".to_string()
}

fn default_use_mono() -> bool {
    cfg!(unix)
}

impl ToolPaths {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tool configuration: {}", path.display()))?;
        let paths: ToolPaths = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse tool configuration: {}", path.display()))?;
        Ok(paths)
    }

    /// Finds the configuration file: explicit path, then `WHOOP_TOOLS_CONFIG`,
    /// then `findtools.yaml` beside the executable or in the current directory.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Some(path) = env::var_os(CONFIG_ENV) {
            return Self::load(Path::new(&path));
        }

        let mut candidates = Vec::new();
        if let Ok(exe) = env::current_exe()
            && let Some(dir) = exe.parent()
        {
            candidates.push(dir.join(CONFIG_FILE_NAME));
        }
        if let Ok(cwd) = env::current_dir() {
            candidates.push(cwd.join(CONFIG_FILE_NAME));
        }

        for candidate in &candidates {
            debug!(candidate = %candidate.display(), "Probing tool configuration");
            if candidate.is_file() {
                return Self::load(candidate);
            }
        }

        Err(anyhow!(
            "Cannot find '{}'. Pass --tools-config or set {}",
            CONFIG_FILE_NAME,
            CONFIG_ENV
        ))
    }

    pub fn command(&self, kind: StageKind) -> Vec<String> {
        let managed = |dir: &Path, exe: &str| {
            let mut command = Vec::with_capacity(2);
            if self.use_mono {
                command.push("mono".to_string());
            }
            command.push(path_string(&dir.join(exe)));
            command
        };
        match kind {
            StageKind::SourceTransform => vec![path_string(&self.chauffeur_dir.join("chauffeur"))],
            StageKind::Compile => vec![path_string(&self.llvm_bin_dir.join("clang"))],
            StageKind::BitcodeToIr => vec![path_string(&self.smack_bin_dir.join("smack"))],
            StageKind::Instrument => managed(&self.whoop_bin_dir, "WhoopEngine.exe"),
            StageKind::Infer => managed(&self.whoop_bin_dir, "WhoopCruncher.exe"),
            StageKind::RaceCheck => managed(&self.whoop_bin_dir, "WhoopRaceChecker.exe"),
            StageKind::BugFind => managed(&self.corral_bin_dir, "corral.exe"),
        }
    }

    pub fn stages(&self) -> Vec<Stage> {
        StageKind::ALL
            .into_iter()
            .map(|kind| Stage::new(kind, self.command(kind)))
            .collect()
    }

    pub fn core_includes(&self) -> Vec<PathBuf> {
        let model = self.whoop_dir.join("Model");
        vec![
            self.smack_src_dir.join("smack"),
            model.clone(),
            model.join("linux"),
            model.join("asm"),
        ]
    }

    pub fn other_model_includes(&self) -> Vec<PathBuf> {
        let seq = self.whoop_dir.join("OtherModels").join("seq1").join("include");
        vec![
            self.smack_src_dir.join("smack"),
            seq.join("ddverify"),
            seq.clone(),
            seq.join("linux"),
        ]
    }

    pub fn clang_resource_include(&self) -> PathBuf {
        self.llvm_lib_dir
            .join("clang")
            .join(&self.clang_version)
            .join("include")
    }

    pub fn whoop_decl(&self) -> PathBuf {
        self.whoop_dir.join("Model").join("whoop_decl.bpl")
    }

    pub fn z3_exe(&self) -> PathBuf {
        self.z3_bin_dir.join("z3.exe")
    }

    pub fn cvc4_exe(&self) -> PathBuf {
        self.cvc4_bin_dir.join("cvc4.exe")
    }
}

pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().to_string()
}
