//! CSV export of the run: one summary row per role plus the step-time history.
//!
//! - `cycle_summary.csv`: counters and min/max/avg step time and residual budget per role.
//! - `step_history.csv`: role,index,step_time_us,residual_ms for the bounded histories.

use std::{
    fs::create_dir_all,
    path::{Path, PathBuf},
};

use csv::Writer;
use log::info;
use serde::Serialize;

use crate::{
    client::supervision::Slot,
    error::{LinkError, LinkResult},
    utils::metrics::{SharedMetrics, calculate_stats, calculate_stats_u64},
};

#[derive(Debug, Serialize)]
struct SummaryRow {
    role: &'static str,
    cycles: u64,
    completed: u64,
    skipped: u64,
    step_failures: u64,
    tag_faults: u64,
    overruns: u64,
    step_time_min_us: f64,
    step_time_max_us: f64,
    step_time_avg_us: f64,
    residual_min_ms: f64,
    residual_avg_ms: f64,
}

#[derive(Debug, Serialize)]
struct HistoryRow {
    role: &'static str,
    index: usize,
    step_time_us: u64,
    residual_ms: f64,
}

fn csv_error(path: &Path, e: csv::Error) -> LinkError {
    LinkError::Config(format!("cannot write {}: {}", path.display(), e))
}

/// Writes one row per role that ran at least one cycle.
pub fn export_summary_csv(metrics: &SharedMetrics, dir: &Path) -> LinkResult<PathBuf> {
    create_dir_all(dir)?;
    let path = dir.join("cycle_summary.csv");

    let rows: Vec<SummaryRow> = {
        let m = metrics.lock();
        Slot::ALL
            .iter()
            .filter(|slot| m.role(**slot).cycles > 0)
            .map(|slot| {
                let r = m.role(*slot);
                let step = calculate_stats_u64(&r.step_time_us);
                let residual = calculate_stats(&r.residual_ms);
                SummaryRow {
                    role: slot.name(),
                    cycles: r.cycles,
                    completed: r.completed,
                    skipped: r.skipped,
                    step_failures: r.step_failures,
                    tag_faults: r.tag_faults,
                    overruns: r.overruns,
                    step_time_min_us: step.map(|s| s.min).unwrap_or(0.0),
                    step_time_max_us: step.map(|s| s.max).unwrap_or(0.0),
                    step_time_avg_us: step.map(|s| s.mean).unwrap_or(0.0),
                    residual_min_ms: residual.map(|s| s.min).unwrap_or(0.0),
                    residual_avg_ms: residual.map(|s| s.mean).unwrap_or(0.0),
                }
            })
            .collect()
    };

    let mut wtr = Writer::from_path(&path).map_err(|e| csv_error(&path, e))?;
    for row in &rows {
        wtr.serialize(row).map_err(|e| csv_error(&path, e))?;
    }
    wtr.flush()?;

    info!("Cycle summary ({} roles) exported to {}", rows.len(), path.display());
    Ok(path)
}

pub fn export_history_csv(metrics: &SharedMetrics, dir: &Path) -> LinkResult<PathBuf> {
    create_dir_all(dir)?;
    let path = dir.join("step_history.csv");

    let mut wtr = Writer::from_path(&path).map_err(|e| csv_error(&path, e))?;
    let mut written = 0usize;
    {
        let m = metrics.lock();
        for slot in Slot::ALL {
            let r = m.role(slot);
            for (index, (step, residual)) in r.step_time_us.iter().zip(&r.residual_ms).enumerate() {
                wtr.serialize(HistoryRow {
                    role: slot.name(),
                    index,
                    step_time_us: *step,
                    residual_ms: *residual,
                })
                .map_err(|e| csv_error(&path, e))?;
                written += 1;
            }
        }
    }
    wtr.flush()?;

    info!("Appended {} history rows to {}", written, path.display());
    Ok(path)
}

/// Summary and history in one go; failures are returned, not logged away.
pub fn run_exports(metrics: &SharedMetrics, dir: &Path) -> LinkResult<()> {
    export_summary_csv(metrics, dir)?;
    export_history_csv(metrics, dir)?;
    Ok(())
}
