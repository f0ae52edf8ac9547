//! Waiting phases of one supervised run.
//!
//! A run walks through a fixed plan of stages. Each stage has a phase, whose
//! condition is re-evaluated on every poll, and a budget counted in polls. A stage
//! ends when its condition stops holding or its budget is spent; the run ends when
//! the process exits or the last stage ends.

use std::cmp::min;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    /// Wait while the process stays below the cpu threshold, for programs that
    /// never start working.
    WarmUp,
    /// Wait while the process keeps the cpu busy. `inclusive` also accepts usage
    /// exactly at the threshold.
    Active { inclusive: bool },
    /// Ask the process to close its windows, expecting it to exit.
    Quiesce,
}

impl Phase {
    /// Whether a process using `cpu` percent keeps this phase going.
    pub fn holds(self, cpu: f32, threshold: f32) -> bool {
        match self {
            Phase::WarmUp => cpu < threshold,
            Phase::Active { inclusive: true } => cpu >= threshold,
            Phase::Active { inclusive: false } => cpu > threshold,
            Phase::Quiesce => true,
        }
    }

    pub fn samples_cpu(self) -> bool {
        !matches!(self, Phase::Quiesce)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub phase: Phase,
    /// Budget in polls.
    pub limit: u64,
    /// Start counting from zero instead of continuing the previous stage's clock.
    pub fresh_clock: bool,
}

/// Stages of the uninstrumented pre-test for a budget of `max_time` polls.
///
/// Warm-up and active share one clock, quiesce gets a third of the warm-up bound.
pub fn pretest_plan(max_time: u64) -> Vec<Stage> {
    let warm_up = min(3, max_time / 8);
    vec![
        Stage {
            phase: Phase::WarmUp,
            limit: warm_up,
            fresh_clock: true,
        },
        Stage {
            phase: Phase::Active { inclusive: true },
            limit: max_time / 2,
            fresh_clock: false,
        },
        Stage {
            phase: Phase::Quiesce,
            limit: warm_up / 3,
            fresh_clock: true,
        },
    ]
}

/// Stages of an instrumented run, each getting the whole budget.
pub fn trace_plan(max_time: u64) -> Vec<Stage> {
    vec![
        Stage {
            phase: Phase::Active { inclusive: false },
            limit: max_time,
            fresh_clock: true,
        },
        Stage {
            phase: Phase::Quiesce,
            limit: max_time,
            fresh_clock: true,
        },
    ]
}

/// Position of a run within its plan.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    plan: Vec<Stage>,
    stage: usize,
    clock: u64,
}

impl PhaseMachine {
    pub fn new(plan: Vec<Stage>) -> Self {
        let mut m = Self {
            plan,
            stage: 0,
            clock: 0,
        };
        m.enter(0);
        m
    }

    /// Phase of the next poll, `None` once every stage is over.
    pub fn phase(&mut self) -> Option<Phase> {
        while let Some(stage) = self.plan.get(self.stage) {
            if self.clock < stage.limit {
                return Some(stage.phase);
            }
            self.enter(self.stage + 1);
        }
        None
    }

    /// Records one poll. When the phase condition still `holds` one poll of
    /// budget is spent, otherwise the machine moves on to the next stage.
    pub fn record(&mut self, holds: bool) {
        if self.stage >= self.plan.len() {
            return;
        }
        if holds {
            self.clock += 1;
        } else {
            self.enter(self.stage + 1);
        }
    }

    #[cfg(test)]
    fn clock(&self) -> u64 {
        self.clock
    }

    fn enter(&mut self, stage: usize) {
        self.stage = stage;
        if let Some(s) = self.plan.get(stage) {
            if s.fresh_clock {
                self.clock = 0;
            }
            log::debug!("entering {:?}, budget {} polls", s.phase, s.limit);
        }
    }
}
