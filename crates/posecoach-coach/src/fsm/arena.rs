//! Owns every FSM instance of the active exercise.

use std::sync::Arc;

use posecoach_core::{Side, Timestamp};
use posecoach_signal::MotionBuffer;

use super::machine::StretchFsm;
use super::state::{FsmKey, FsmState, StepOutcome};
use crate::config::StretchConfig;

/// Instances are stepped in a fixed order: left before right, so that any
/// tie in arbitration is deterministic.
#[derive(Debug, Clone)]
pub struct FsmArena {
    config: Arc<StretchConfig>,
    instances: Vec<StretchFsm>,
}

impl FsmArena {
    /// One instance per side for unilateral exercises, one otherwise.
    #[must_use]
    pub fn for_exercise(config: Arc<StretchConfig>, now: Timestamp) -> Self {
        let instances = if config.unilateral {
            Side::BOTH
                .iter()
                .map(|side| StretchFsm::new(Arc::clone(&config), Some(*side), now))
                .collect()
        } else {
            vec![StretchFsm::new(Arc::clone(&config), None, now)]
        };
        Self { config, instances }
    }

    /// Exercise configuration shared by all instances.
    #[must_use]
    pub fn config(&self) -> &Arc<StretchConfig> {
        &self.config
    }

    /// Step every instance once.
    pub fn step_all(
        &mut self,
        buffer: &MotionBuffer,
        now: Timestamp,
    ) -> Vec<(FsmKey, StepOutcome)> {
        self.instances
            .iter_mut()
            .map(|fsm| (fsm.key(), fsm.step(buffer, now)))
            .collect()
    }

    /// Current state of every instance.
    #[must_use]
    pub fn states(&self) -> Vec<(FsmKey, FsmState)> {
        self.instances.iter().map(|f| (f.key(), f.state())).collect()
    }

    /// Look up an instance.
    #[must_use]
    pub fn get(&self, key: &FsmKey) -> Option<&StretchFsm> {
        self.instances.iter().find(|f| f.key() == *key)
    }

    /// Iterate instances in step order.
    pub fn iter(&self) -> impl Iterator<Item = &StretchFsm> {
        self.instances.iter()
    }

    /// Number of instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the arena has no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
