//! Dry-run preview
//!
//! Replays command lines against a digital twin of a live graph. The live
//! graph is only read while the twin is built; every command runs on the
//! twin's virtual controllers.

use crate::error::SchedulerError;
use crate::manager::CommandManager;
use motionkit_control::{
    Action, CommandLine, ControllerManager, ControllerRegistry, PlannedStep, SubstitutionRules,
};
use motionkit_core::{LogRecord, MemoryLogSink, Vector3};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tool state sampled after a line
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToolSample {
    /// Line index, starting at 1
    pub line: usize,
    /// Tool position
    pub position: Vector3,
    /// Whether the tool left its bounds
    pub is_out_of_bounds: bool,
    /// Whether the shutter was open
    pub is_on: bool,
    /// Estimated real time at the end of the line, in seconds
    pub elapsed_s: f64,
}

/// Result of a preview run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviewReport {
    /// Number of lines submitted
    pub lines: usize,
    /// Number of lines that completed on the twin
    pub completed_lines: usize,
    /// Tool samples, one per completed line
    pub samples: Vec<ToolSample>,
    /// True if any sample was out of bounds
    pub any_out_of_bounds: bool,
    /// Estimated real-time duration of the completed lines, in seconds
    pub estimated_duration_s: f64,
    /// Failure that stopped the replay
    pub failure: Option<String>,
    /// Scheduler log of the replay
    pub log: Vec<LogRecord>,
}

impl PreviewReport {
    /// True if every line completed inside the tool bounds
    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && !self.any_out_of_bounds && self.completed_lines == self.lines
    }
}

/// Runs previews against twins of a live graph
#[derive(Clone)]
pub struct PreviewRunner {
    registry: ControllerRegistry,
    rules: SubstitutionRules,
}

impl PreviewRunner {
    /// Preview with the standard virtual substitutions
    pub fn new(registry: ControllerRegistry) -> Self {
        Self::with_rules(registry, SubstitutionRules::virtual_twin())
    }

    /// Preview with custom substitutions
    pub fn with_rules(registry: ControllerRegistry, rules: SubstitutionRules) -> Self {
        Self { registry, rules }
    }

    /// Replay `lines` on a fresh twin of `live`
    ///
    /// A failing line ends the replay and is reported in
    /// [`PreviewReport::failure`]. Errors building the twin are returned.
    pub async fn run(
        &self,
        live: &ControllerManager,
        lines: &[CommandLine],
    ) -> Result<PreviewReport, SchedulerError> {
        let twin = Arc::new(live.create_virtual_copy(&self.registry, &self.rules)?);
        let log = MemoryLogSink::new();
        let scheduler = CommandManager::new(twin.clone(), Arc::new(log.clone()));

        let mut report = PreviewReport {
            lines: lines.len(),
            ..PreviewReport::default()
        };

        for (index, line) in lines.iter().enumerate() {
            scheduler.enqueue_command_line(line.clone())?;
            if let Err(e) = scheduler.start().await {
                tracing::debug!("Preview stopped at line {}: {}", index + 1, e);
                report.failure = Some(e.to_string());
                break;
            }

            let steps = twin.drain_trajectories();
            report.estimated_duration_s += line_duration(&steps).max(master_wait(&twin, line));
            report.completed_lines += 1;

            if let Err(e) = twin.refresh_states().await {
                report.failure = Some(e.to_string());
                break;
            }
            if let Some(tool) = twin.tool_information() {
                let state = tool.recalculate();
                report.any_out_of_bounds |= state.is_out_of_bounds;
                report.samples.push(ToolSample {
                    line: index + 1,
                    position: state.position,
                    is_out_of_bounds: state.is_out_of_bounds,
                    is_on: state.is_on,
                    elapsed_s: report.estimated_duration_s,
                });
            }
        }

        report.log = log.records();
        tracing::info!(
            "Preview: {}/{} line(s), {:.3}s estimated",
            report.completed_lines,
            report.lines,
            report.estimated_duration_s
        );
        Ok(report)
    }
}

/// Real time of one line: devices run in parallel, steps on one device run
/// back to back
fn line_duration(steps: &[PlannedStep]) -> f64 {
    let mut per_device: BTreeMap<(&str, Option<&str>), f64> = BTreeMap::new();
    for step in steps {
        *per_device
            .entry((step.controller.as_str(), step.device.as_deref()))
            .or_default() += step.duration;
    }
    per_device.values().copied().fold(0.0, f64::max)
}

/// Longest `Wait` a master handles itself in `line`
///
/// Masters keep their kind in a twin, so their waits run in real time and
/// leave no trajectory.
fn master_wait(twin: &ControllerManager, line: &CommandLine) -> f64 {
    line.iter()
        .filter(|command| command.action == Action::Wait)
        .filter(|command| {
            twin.route(command)
                .and_then(|target| twin.controller(&target))
                .map(|controller| controller.as_master().is_some())
                .unwrap_or(false)
        })
        .filter_map(|command| command.parameter(0).ok())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(controller: &str, device: Option<&str>, duration: f64) -> PlannedStep {
        PlannedStep {
            controller: controller.to_string(),
            device: device.map(str::to_string),
            action: Action::MoveAbsolute,
            duration,
            profile: None,
        }
    }

    #[test]
    fn test_line_duration_parallel_devices() {
        let steps = vec![
            step("stages", Some("x"), 0.5),
            step("stages", Some("y"), 0.8),
            step("stages", Some("x"), 0.4),
        ];
        assert!((line_duration(&steps) - 0.9).abs() < 1e-12);
        assert_eq!(line_duration(&[]), 0.0);
    }

    #[test]
    fn test_clean_report() {
        let report = PreviewReport {
            lines: 2,
            completed_lines: 2,
            ..PreviewReport::default()
        };
        assert!(report.is_clean());

        let failed = PreviewReport {
            failure: Some("boom".into()),
            ..report
        };
        assert!(!failed.is_clean());
    }
}
