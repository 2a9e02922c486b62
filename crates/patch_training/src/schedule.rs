//! Learning-rate schedules and their step cadence.

use std::f64::consts::PI;

use burn::lr_scheduler::cosine::{CosineAnnealingLrScheduler, CosineAnnealingLrSchedulerConfig};
use burn::lr_scheduler::LrScheduler;

use crate::error::{TrainError, TrainResult};

/// When a schedule advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCadence {
    PerBatch,
    PerEpoch,
}

/// One-cycle schedule: cosine warm-up from `max_lr / div_factor` to `max_lr` over the first
/// `pct_start` of the run, then cosine decay to `initial / final_div_factor`.
#[derive(Debug, Clone)]
pub struct OneCycle {
    pub max_lr: f64,
    pub total_steps: usize,
    pub pct_start: f64,
    pub div_factor: f64,
    pub final_div_factor: f64,
    step: usize,
}

impl OneCycle {
    pub fn new(max_lr: f64, epochs: usize, steps_per_epoch: usize) -> Self {
        Self {
            max_lr,
            total_steps: epochs * steps_per_epoch,
            pct_start: 0.3,
            div_factor: 25.0,
            final_div_factor: 1e4,
            step: 0,
        }
    }

    fn initial_lr(&self) -> f64 {
        self.max_lr / self.div_factor
    }

    fn min_lr(&self) -> f64 {
        self.initial_lr() / self.final_div_factor
    }

    pub fn lr(&self) -> f64 {
        let warmup_end = self.pct_start * self.total_steps as f64 - 1.0;
        let last = self.total_steps as f64 - 1.0;
        let step = self.step as f64;
        if step <= warmup_end {
            cosine_anneal(self.initial_lr(), self.max_lr, fraction(step, 0.0, warmup_end))
        } else {
            cosine_anneal(self.max_lr, self.min_lr(), fraction(step, warmup_end, last))
        }
    }
}

/// Schedule chosen once at setup. Each variant advances only on its own cadence.
#[derive(Clone)]
pub enum LrSchedule {
    Cyclic(OneCycle),
    /// burn's cosine annealing to 0 over `epochs` steps, plus the number of steps taken.
    Cosine {
        scheduler: CosineAnnealingLrScheduler,
        steps: usize,
    },
}

impl std::fmt::Debug for LrSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LrSchedule::Cyclic(s) => f.debug_tuple("Cyclic").field(s).finish(),
            LrSchedule::Cosine { steps, .. } => f
                .debug_struct("Cosine")
                .field("steps", steps)
                .field("lr", &self.lr())
                .finish(),
        }
    }
}

impl LrSchedule {
    pub fn cyclic(max_lr: f64, epochs: usize, steps_per_epoch: usize) -> Self {
        LrSchedule::Cyclic(OneCycle::new(max_lr, epochs, steps_per_epoch))
    }

    pub fn cosine(base_lr: f64, epochs: usize) -> TrainResult<Self> {
        let scheduler = CosineAnnealingLrSchedulerConfig::new(base_lr, epochs)
            .with_min_lr(0.0)
            .init()
            .map_err(|e| TrainError::InvalidArgument(format!("cosine schedule: {e}")))?;
        Ok(LrSchedule::Cosine {
            scheduler,
            steps: 0,
        })
    }

    pub fn cadence(&self) -> StepCadence {
        match self {
            LrSchedule::Cyclic(_) => StepCadence::PerBatch,
            LrSchedule::Cosine { .. } => StepCadence::PerEpoch,
        }
    }

    /// Learning rate for the next optimizer step.
    pub fn lr(&self) -> f64 {
        match self {
            LrSchedule::Cyclic(s) => s.lr(),
            // burn's `step` returns the current rate before advancing, so step a copy.
            LrSchedule::Cosine { scheduler, .. } => scheduler.clone().step(),
        }
    }

    /// Called after every training batch.
    pub fn on_batch_end(&mut self) {
        if let LrSchedule::Cyclic(s) = self {
            s.step += 1;
        }
    }

    /// Called once after a full training pass.
    pub fn on_epoch_end(&mut self) {
        if let LrSchedule::Cosine { scheduler, steps } = self {
            LrScheduler::step(scheduler);
            *steps += 1;
        }
    }

    /// Advances taken on the per-batch cadence.
    pub fn batch_steps(&self) -> usize {
        match self {
            LrSchedule::Cyclic(s) => s.step,
            LrSchedule::Cosine { .. } => 0,
        }
    }

    /// Advances taken on the per-epoch cadence.
    pub fn epoch_steps(&self) -> usize {
        match self {
            LrSchedule::Cyclic(_) => 0,
            LrSchedule::Cosine { steps, .. } => *steps,
        }
    }

    pub fn total_steps(&self) -> usize {
        self.batch_steps() + self.epoch_steps()
    }
}

fn fraction(step: f64, start: f64, end: f64) -> f64 {
    let span = end - start;
    if span <= 0.0 {
        return 1.0;
    }
    ((step - start) / span).clamp(0.0, 1.0)
}

fn cosine_anneal(start: f64, end: f64, pct: f64) -> f64 {
    end + (start - end) / 2.0 * ((PI * pct).cos() + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn drive(schedule: &mut LrSchedule, epochs: usize, steps_per_epoch: usize) {
        for _ in 0..epochs {
            for _ in 0..steps_per_epoch {
                schedule.on_batch_end();
            }
            schedule.on_epoch_end();
        }
    }

    #[test]
    fn cyclic_steps_every_batch() {
        let mut s = LrSchedule::cyclic(0.1, 2, 3);
        assert_eq!(s.cadence(), StepCadence::PerBatch);
        drive(&mut s, 2, 3);
        assert_eq!(s.batch_steps(), 6);
        assert_eq!(s.epoch_steps(), 0);
    }

    #[test]
    fn cosine_steps_every_epoch() {
        let mut s = LrSchedule::cosine(0.01, 2).unwrap();
        assert_eq!(s.cadence(), StepCadence::PerEpoch);
        drive(&mut s, 2, 3);
        assert_eq!(s.batch_steps(), 0);
        assert_eq!(s.epoch_steps(), 2);
        assert_eq!(s.total_steps(), 2);
    }

    #[test]
    fn one_cycle_shape() {
        let mut s = OneCycle::new(0.1, 10, 10);
        assert!(close(s.lr(), 0.1 / 25.0));
        // Peak at the end of warm-up (step 29 of 100).
        s.step = 29;
        assert!(close(s.lr(), 0.1));
        s.step = 99;
        assert!(close(s.lr(), 0.1 / 25.0 / 1e4));
        s.step = 60;
        assert!(s.lr() < 0.1 && s.lr() > 0.1 / 25.0 / 1e4);
    }

    #[test]
    fn one_cycle_tiny_run_stays_finite() {
        let mut s = OneCycle::new(0.1, 1, 2);
        for _ in 0..3 {
            assert!(s.lr().is_finite());
            s.step += 1;
        }
    }

    #[test]
    fn cosine_halves_midway() {
        let mut s = LrSchedule::cosine(0.2, 4).unwrap();
        assert!(close(s.lr(), 0.2));
        // Reading the rate never advances the schedule.
        assert!(close(s.lr(), 0.2));
        s.on_epoch_end();
        s.on_epoch_end();
        assert!(close(s.lr(), 0.1));
        s.on_epoch_end();
        s.on_epoch_end();
        assert!(s.lr().abs() < 1e-9);
        assert_eq!(s.epoch_steps(), 4);
    }

    #[test]
    fn cosine_rejects_zero_epochs() {
        assert!(matches!(
            LrSchedule::cosine(0.1, 0),
            Err(TrainError::InvalidArgument(_))
        ));
    }
}
