use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::ErrorCode;
use crate::options::TimingMode;
use crate::stages::StageKind;

#[derive(Debug, Default, Serialize, Clone, PartialEq)]
pub struct StageMetrics {
    pub calls: u64,
    pub total_secs: f64,
    pub max_secs: f64,
}

/// Cumulative wall time per stage for one run. Repeated invocations of a stage
/// are summed, never overwritten.
#[derive(Debug, Default, Clone)]
pub struct Timing {
    stages: BTreeMap<StageKind, StageMetrics>,
}

impl Timing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stage(&mut self, stage: StageKind) -> StageTimer<'_> {
        StageTimer {
            stage,
            started_at: Instant::now(),
            timing: self,
            recorded: false,
        }
    }

    pub fn record(&mut self, stage: StageKind, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let metrics = self.stages.entry(stage).or_default();
        metrics.calls += 1;
        metrics.total_secs += secs;
        if secs > metrics.max_secs {
            metrics.max_secs = secs;
        }
        debug!(
            stage = stage.as_str(),
            elapsed_secs = secs,
            total_secs = metrics.total_secs,
            "Stage duration recorded"
        );
    }

    pub fn elapsed(&self, stage: StageKind) -> Option<f64> {
        self.stages.get(&stage).map(|m| m.total_secs)
    }

    pub fn calls(&self, stage: StageKind) -> u64 {
        self.stages.get(&stage).map(|m| m.calls).unwrap_or(0)
    }

    pub fn total(&self) -> f64 {
        self.stages.values().map(|m| m.total_secs).sum()
    }

    /// Budget for the next invocation of `stage`. Time already spent on the
    /// stage is deducted, but the remainder never drops below one second once
    /// the stage has run. Zero means unbounded.
    pub fn remaining_budget(&self, stage: StageKind, timeout_secs: u64) -> u64 {
        if timeout_secs == 0 {
            return 0;
        }
        match self.elapsed(stage) {
            Some(spent) => {
                let spent = spent.floor() as u64;
                timeout_secs.saturating_sub(spent).max(1)
            }
            None => timeout_secs,
        }
    }

    pub fn report(&self, mode: &TimingMode, outcome: ErrorCode) -> Option<String> {
        match mode {
            TimingMode::Off => None,
            TimingMode::Human => Some(self.render_human()),
            TimingMode::Csv { label } => Some(self.render_csv(label, outcome)),
        }
    }

    pub fn render_human(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Timing information ({:.2} secs):", self.total());
        if self.stages.is_empty() {
            out.push_str("- no tools ran\n");
            return out;
        }

        let pad_tool = self
            .stages
            .keys()
            .map(|stage| stage.tool_name().len())
            .max()
            .unwrap_or(0);
        let pad_time = self
            .stages
            .values()
            .map(|m| format_secs(m.total_secs).len())
            .max()
            .unwrap_or(0);
        for stage in StageKind::ALL {
            if let Some(metrics) = self.stages.get(&stage) {
                let _ = writeln!(
                    out,
                    "- {:<pad_tool$} : {:>pad_time$}",
                    stage.tool_name(),
                    format_secs(metrics.total_secs),
                );
            }
        }
        out
    }

    /// One row: optional label, PASS or FAIL(code), each stage in pipeline
    /// order (zero if it never ran), then the total.
    pub fn render_csv(&self, label: &str, outcome: ErrorCode) -> String {
        let mut row = Vec::with_capacity(StageKind::ALL.len() + 3);
        if !label.is_empty() {
            row.push(label.to_string());
        }
        row.push(match outcome {
            ErrorCode::Success => "PASS".to_string(),
            other => format!("FAIL({})", other.as_i32()),
        });
        for stage in StageKind::ALL {
            row.push(format!("{:.3}", self.elapsed(stage).unwrap_or(0.0)));
        }
        row.push(format!("{:.3}", self.total()));
        row.join(",")
    }

    pub fn snapshot(&self, outcome: ErrorCode) -> TimingSnapshot {
        TimingSnapshot {
            generated_at: Utc::now(),
            outcome: outcome.as_str(),
            exit_code: outcome.as_i32(),
            total_secs: self.total(),
            stages: self
                .stages
                .iter()
                .map(|(stage, metrics)| (stage.tool_name(), metrics.clone()))
                .collect(),
        }
    }
}

fn format_secs(secs: f64) -> String {
    format!("{secs:.3} secs")
}

#[derive(Debug, Serialize)]
pub struct TimingSnapshot {
    pub generated_at: DateTime<Utc>,
    pub outcome: &'static str,
    pub exit_code: i32,
    pub total_secs: f64,
    pub stages: BTreeMap<&'static str, StageMetrics>,
}

pub struct StageTimer<'a> {
    stage: StageKind,
    started_at: Instant,
    timing: &'a mut Timing,
    recorded: bool,
}

impl StageTimer<'_> {
    pub fn finish(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let duration = self.started_at.elapsed();
        if !self.recorded {
            self.timing.record(self.stage, duration);
            self.recorded = true;
        }
        duration
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(timing: &Timing) {
    info!(
        total_secs = timing.total(),
        stage_count = timing.stages.len(),
        "Pipeline timing summary"
    );
    for (stage, metrics) in &timing.stages {
        info!(
            stage = stage.as_str(),
            calls = metrics.calls,
            total_secs = metrics.total_secs,
            max_secs = metrics.max_secs,
            "Stage timing"
        );
    }
}
