//! Per-slice registration driver. Visits every slice pair in physical
//! order, registering the high-resolution original against the
//! low-resolution resampled slice, and recovers from metric sample
//! deficits by shrinking the fixed mask and retrying.

use instant::Instant;
use serde::{Deserialize, Serialize};

use crate::registration::{Registration, RegistrationError};
use crate::stack::Stack;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Retry ceiling: give up on a slice after this many mask shrinks.
    pub max_shrinks_per_slice: u32,
    /// Give up once the fixed mask area falls below this fraction of its
    /// pre-retry area.
    pub min_mask_fraction: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            max_shrinks_per_slice: 10,
            min_mask_fraction: 0.01,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SliceOutcome {
    pub index: usize,
    pub name: String,
    pub skipped: bool,
    pub converged: bool,
    pub shrink_retries: u32,
    pub final_metric: Option<f64>,
    pub elapsed_ms: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlignmentReport {
    pub slices: Vec<SliceOutcome>,
}

impl AlignmentReport {
    pub fn converged_count(&self) -> usize {
        self.slices.iter().filter(|s| s.converged).count()
    }

    pub fn skipped_count(&self) -> usize {
        self.slices.iter().filter(|s| s.skipped).count()
    }

    pub fn unconverged_count(&self) -> usize {
        self.slices
            .iter()
            .filter(|s| !s.skipped && !s.converged)
            .count()
    }

    pub fn total_retries(&self) -> u32 {
        self.slices.iter().map(|s| s.shrink_retries).sum()
    }
}

/// Drives one registration pass over a LoRes/HiRes stack pair. The
/// registration engine is shared, sequentially rebound per slice; each
/// HiRes transform is optimized in place so no copy-back is needed.
pub struct StackAligner<'a> {
    lo_res: &'a mut Stack,
    hi_res: &'a mut Stack,
    registration: &'a mut Registration,
    config: DriverConfig,
}

impl<'a> StackAligner<'a> {
    pub fn new(
        lo_res: &'a mut Stack,
        hi_res: &'a mut Stack,
        registration: &'a mut Registration,
        config: DriverConfig,
    ) -> StackAligner<'a> {
        StackAligner {
            lo_res,
            hi_res,
            registration,
            config,
        }
    }

    /// Run the pass. Every slice is visited exactly once; slice-level
    /// problems are recorded and logged but never abort the run.
    pub fn align(&mut self) -> crate::Result<AlignmentReport> {
        anyhow::ensure!(
            self.lo_res.len() == self.hi_res.len(),
            "stack sizes differ: {} vs {}",
            self.lo_res.len(),
            self.hi_res.len()
        );

        let mut outcomes = Vec::with_capacity(self.lo_res.len());
        for index in 0..self.lo_res.len() {
            outcomes.push(self.align_slice(index)?);
        }

        let report = AlignmentReport { slices: outcomes };
        self.log_summary(&report);
        Ok(report)
    }

    /// Register a single slice pair, leaving the rest of the stack
    /// untouched. Used when re-running one problem slice.
    pub fn align_one(&mut self, index: usize) -> crate::Result<AlignmentReport> {
        anyhow::ensure!(
            self.lo_res.len() == self.hi_res.len(),
            "stack sizes differ: {} vs {}",
            self.lo_res.len(),
            self.hi_res.len()
        );
        let outcome = self.align_slice(index)?;
        let report = AlignmentReport {
            slices: vec![outcome],
        };
        self.log_summary(&report);
        Ok(report)
    }

    fn log_summary(&self, report: &AlignmentReport) {
        log::info!(
            "finished registration: {} converged, {} skipped, {} unconverged, {} retries",
            report.converged_count(),
            report.skipped_count(),
            report.unconverged_count(),
            report.total_retries()
        );
    }

    fn align_slice(&mut self, index: usize) -> crate::Result<SliceOutcome> {
        let name = self.lo_res.file_name(index)?.to_string();
        log::info!("slice {}: {}", index, name);

        if !(self.lo_res.image_exists(index)? && self.hi_res.image_exists(index)?) {
            log::info!("slice {}: image missing, skipping", index);
            return Ok(SliceOutcome {
                index,
                name,
                skipped: true,
                converged: false,
                shrink_retries: 0,
                final_metric: None,
                elapsed_ms: 0.0,
            });
        }

        let start = Instant::now();
        let initial_area = self.lo_res.mask_area(index)?;
        let area_floor = ((initial_area as f64 * self.config.min_mask_fraction).ceil() as usize).max(1);
        let fixed_spacing = self.lo_res.spacings_2d();
        let moving_spacing = self.hi_res.original_spacings();
        let mut shrink_retries = 0u32;

        let convergence = loop {
            let attempt = {
                let fixed = self.lo_res.resampled_slice(index)?;
                let fixed_mask = self.lo_res.resampled_mask(index)?;
                let (moving, moving_mask, transform) = self.hi_res.registration_bindings(index)?;
                self.registration.run(
                    fixed,
                    fixed_mask,
                    fixed_spacing,
                    moving,
                    moving_mask,
                    moving_spacing,
                    transform,
                )
            };
            match attempt {
                Ok(convergence) => {
                    log::info!(
                        "slice {}: converged ({}) after {} iterations, metric {:.6}",
                        index,
                        convergence.stop_condition,
                        convergence.iterations,
                        convergence.final_metric
                    );
                    break Some(convergence);
                }
                Err(RegistrationError::SampleDeficit { usable, required }) => {
                    let area = self.lo_res.mask_area(index)?;
                    if shrink_retries >= self.config.max_shrinks_per_slice || area <= area_floor {
                        log::error!(
                            "slice {}: giving up after {} shrinks (mask area {}, floor {})",
                            index,
                            shrink_retries,
                            area,
                            area_floor
                        );
                        break None;
                    }
                    log::warn!(
                        "slice {}: {} of {} samples usable, halving fixed mask and retrying",
                        index,
                        usable,
                        required
                    );
                    self.lo_res.shrink_mask_slice(index)?;
                    shrink_retries += 1;
                }
                Err(other) => return Err(other.into()),
            }
        };

        Ok(SliceOutcome {
            index,
            name,
            skipped: false,
            converged: convergence.is_some(),
            shrink_retries,
            final_metric: convergence.as_ref().map(|c| c.final_metric),
            elapsed_ms: start.elapsed().as_millis() as f32,
        })
    }
}
