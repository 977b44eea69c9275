//! Configuration of the aggregation workspace
//!
//! The knobs are grouped the same way as the execution args of the client session:
//! plain structs with [`Default`], validated once before any accumulator is created

use std::time::Duration;

use snafu::{Snafu, ensure};

use crate::STANDARD_VECTOR_SIZE;
use crate::error::{Classify, ErrorClass};

#[allow(missing_docs)]
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Batch capacity must be positive"))]
    ZeroBatchCapacity,
    #[snafu(display(
        "Batch capacity `{batch_capacity}` is too large, addressing records can only address `{}` slots",
        u32::MAX
    ))]
    BatchCapacityTooLarge { batch_capacity: usize },
    #[snafu(display("Spill is enabled but the memory budget is not configured"))]
    SpillWithoutBudget,
    #[snafu(display("Spill requires at least one I/O attempt"))]
    ZeroIoAttempts,
    #[snafu(display(
        "Memory budget `{memory_budget}` bytes can not hold a single batch of `{batch_capacity}` groups"
    ))]
    BudgetTooSmall {
        memory_budget: usize,
        batch_capacity: usize,
    },
}

type Result<T> = std::result::Result<T, ConfigError>;

impl Classify for ConfigError {
    #[inline]
    fn class(&self) -> ErrorClass {
        ErrorClass::Invalid
    }
}

/// How the spill manager picks the partitions to spill
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VictimPolicyKind {
    /// Partitions that received the fewest addressing hits since the last spill
    /// decision are spilled first
    #[default]
    FewestHits,
    /// Partitions that occupy the most memory are spilled first
    LargestFootprint,
}

/// Arguments for spilling
#[derive(Debug, Clone)]
pub struct SpillConfig {
    /// How many times a store operation is attempted before the error surfaces
    pub max_io_attempts: usize,
    /// Sleep between two attempts
    pub retry_backoff: Duration,
    /// Victim selection policy
    pub victim_policy: VictimPolicyKind,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            max_io_attempts: 3,
            retry_backoff: Duration::from_millis(10),
            victim_policy: VictimPolicyKind::default(),
        }
    }
}

/// Arguments for the aggregation workspace
#[derive(Debug, Clone)]
pub struct AggregateConfig {
    /// Number of groups a batch can hold
    pub batch_capacity: usize,
    /// Memory budget of the accumulators in bytes. `None` means unbounded
    pub memory_budget: Option<usize>,
    /// Spill is enabled iff it is `Some`
    pub spill: Option<SpillConfig>,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            batch_capacity: STANDARD_VECTOR_SIZE,
            memory_budget: None,
            spill: None,
        }
    }
}

impl AggregateConfig {
    /// Returns true if spilling is enabled
    #[inline]
    pub fn spill_enabled(&self) -> bool {
        self.spill.is_some()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_capacity > 0, ZeroBatchCapacitySnafu);
        ensure!(
            self.batch_capacity <= u32::MAX as usize,
            BatchCapacityTooLargeSnafu {
                batch_capacity: self.batch_capacity
            }
        );

        if let Some(memory_budget) = self.memory_budget {
            // A batch needs at least one validity bit per group
            ensure!(
                memory_budget >= self.batch_capacity.div_ceil(8),
                BudgetTooSmallSnafu {
                    memory_budget,
                    batch_capacity: self.batch_capacity
                }
            );
        }

        if let Some(spill) = &self.spill {
            ensure!(self.memory_budget.is_some(), SpillWithoutBudgetSnafu);
            ensure!(spill.max_io_attempts > 0, ZeroIoAttemptsSnafu);
        }

        Ok(())
    }
}
