use std::fmt::{self, Display};
use std::num::NonZero;
use std::time::Duration;

use thiserror::Error;

use crate::{ProcessorIndex, parse_affinity};

/// How many runs of each test are averaged unless the operator says otherwise.
pub const DEFAULT_LOOPS: u32 = 10;

/// How many back-to-back copies make up one timed trial unless the operator says otherwise.
pub const DEFAULT_REPEATS: u32 = 3;

/// Chunk size of the block copy pattern unless the operator says otherwise.
pub const DEFAULT_BLOCK_SIZE: usize = 262_144;

/// Pause before the readiness and allocation phases unless the operator says otherwise.
/// The pause before the execution phase is twice this.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);

const MIB: usize = 1024 * 1024;

/// The element type of the copied buffers: one machine word.
pub type Word = usize;

/// One of the copy patterns whose bandwidth is measured.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum CopyPattern {
    /// The whole buffer is copied in one bulk operation.
    Plain,

    /// The buffer is copied one word at a time through volatile accesses.
    ElementWise,

    /// The buffer is copied in fixed-size chunks, followed by any remainder.
    Block,
}

impl CopyPattern {
    /// Every pattern, in the order the worker executes them and the report lists them.
    pub const ALL: [Self; 3] = [Self::Plain, Self::ElementWise, Self::Block];

    /// Position of the pattern in [`Self::ALL`], also used as the test number on the command line.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Plain => 0,
            Self::ElementWise => 1,
            Self::Block => 2,
        }
    }

    /// Looks up a pattern by its test number.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// The method label used in per-trial output.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Plain => "MEMCPY",
            Self::ElementWise => "DUMB",
            Self::Block => "MCBLOCK",
        }
    }
}

impl Display for CopyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// The subset of copy patterns enabled for a run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PatternSet {
    enabled: [bool; CopyPattern::ALL.len()],
}

impl PatternSet {
    /// A set with every pattern enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            enabled: [true; CopyPattern::ALL.len()],
        }
    }

    /// Adds a pattern to the set.
    pub fn insert(&mut self, pattern: CopyPattern) {
        if let Some(slot) = self.enabled.get_mut(pattern.index()) {
            *slot = true;
        }
    }

    /// Whether the pattern is enabled.
    #[must_use]
    pub fn contains(&self, pattern: CopyPattern) -> bool {
        self.enabled.get(pattern.index()).copied().unwrap_or(false)
    }

    /// Number of enabled patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.enabled.iter().filter(|x| **x).count()
    }

    /// Whether no pattern is enabled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The enabled patterns in execution order.
    pub fn iter(&self) -> impl Iterator<Item = CopyPattern> + '_ {
        CopyPattern::ALL.into_iter().filter(|p| self.contains(*p))
    }
}

impl FromIterator<CopyPattern> for PatternSet {
    fn from_iter<T: IntoIterator<Item = CopyPattern>>(iter: T) -> Self {
        let mut set = Self::default();

        for pattern in iter {
            set.insert(pattern);
        }

        set
    }
}

/// A configuration that was rejected before any worker process was created.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The buffers would be empty.
    #[error("array size must be at least 1 MiB")]
    ArraySizeZero,

    /// The buffer size in bytes cannot be represented on this platform.
    #[error("array size of {array_mib} MiB does not fit in the address space")]
    ArraySizeOverflow {
        /// The requested size of each buffer.
        array_mib: u64,
    },

    /// The block copy pattern would never make progress.
    #[error("block size must be at least 1 byte")]
    BlockSizeZero,

    /// The block copy pattern needs at least one full block in the buffer.
    #[error(
        "block size of {block_size} bytes is larger than the array size of {array_bytes} bytes"
    )]
    BlockSizeTooLarge {
        /// The requested block size.
        block_size: usize,

        /// The size of each buffer.
        array_bytes: usize,
    },

    /// No workers means nothing to measure.
    #[error("at least one worker process is required")]
    ProcessCountZero,

    /// An endless run can only report one pattern, so more than one is ambiguous.
    #[error("running forever requires exactly one test to be selected, not {enabled}")]
    InfiniteLoopsWithMultipleTests {
        /// How many patterns were enabled.
        enabled: usize,
    },

    /// The pinning specification does not name one processor per worker.
    #[error("CPU affinity settings refer to {resolved} CPUs, rather than {expected}")]
    AffinityCountMismatch {
        /// How many processor indexes the specification resolved to.
        resolved: usize,

        /// The configured worker count.
        expected: usize,
    },

    /// The pinning specification could not be parsed.
    #[error(transparent)]
    Affinity(#[from] crate::affinity::Error),
}

/// Fully resolved and validated settings of one benchmark run.
///
/// Immutable once built. Each worker process inherits its own copy when it is forked.
#[derive(Clone, Debug)]
pub struct Configuration {
    array_mib: u64,
    element_count: usize,
    loops: Option<NonZero<u32>>,
    repeats: u32,
    block_size: usize,
    patterns: PatternSet,
    pins: Vec<ProcessorIndex>,
    quiet: bool,
    show_average: bool,
    settle: Duration,
}

impl Configuration {
    /// Starts building a configuration for buffers of `array_mib` mebibytes each.
    #[must_use]
    pub fn builder(array_mib: u64) -> ConfigurationBuilder {
        ConfigurationBuilder::new(array_mib)
    }

    /// Size of each of the two buffers, in mebibytes.
    #[must_use]
    pub fn array_mib(&self) -> u64 {
        self.array_mib
    }

    /// Number of words in each of the two buffers.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Size of each of the two buffers, in bytes.
    #[must_use]
    pub fn array_bytes(&self) -> usize {
        self.element_count.saturating_mul(size_of::<Word>())
    }

    /// Number of timed trials per pattern, or `None` to run until terminated.
    #[must_use]
    pub fn loops(&self) -> Option<NonZero<u32>> {
        self.loops
    }

    /// Number of full-buffer copies timed together as one trial.
    #[must_use]
    pub fn repeats(&self) -> u32 {
        self.repeats
    }

    /// Chunk size of the block copy pattern, in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// The patterns to measure. Never empty.
    #[must_use]
    pub fn patterns(&self) -> PatternSet {
        self.patterns
    }

    /// Processor index for each worker, in worker order. The length is the worker count.
    #[must_use]
    pub fn pins(&self) -> &[ProcessorIndex] {
        &self.pins
    }

    /// Number of worker processes.
    #[must_use]
    pub fn processes(&self) -> usize {
        self.pins.len()
    }

    /// Whether per-trial lines and the run plan are suppressed.
    #[must_use]
    pub fn quiet(&self) -> bool {
        self.quiet
    }

    /// Whether workers print a per-pattern average after their trials.
    #[must_use]
    pub fn show_average(&self) -> bool {
        self.show_average
    }

    /// Pause before the readiness and allocation phases (doubled before execution).
    #[must_use]
    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Mebibytes moved by one trial (one buffer copied `repeats` times).
    #[expect(
        clippy::cast_precision_loss,
        reason = "array sizes are far below the 2^52 MiB where precision is lost"
    )]
    #[must_use]
    pub fn trial_mib(&self) -> f64 {
        self.array_mib as f64 * f64::from(self.repeats)
    }
}

/// Collects raw operator input and validates it into a [`Configuration`].
#[derive(Clone, Debug)]
pub struct ConfigurationBuilder {
    array_mib: u64,
    loops: u32,
    repeats: u32,
    block_size: usize,
    patterns: PatternSet,
    processes: usize,
    affinity: Option<String>,
    quiet: bool,
    show_average: bool,
    settle: Duration,
}

impl ConfigurationBuilder {
    fn new(array_mib: u64) -> Self {
        Self {
            array_mib,
            loops: DEFAULT_LOOPS,
            repeats: DEFAULT_REPEATS,
            block_size: DEFAULT_BLOCK_SIZE,
            patterns: PatternSet::default(),
            processes: 1,
            affinity: None,
            quiet: false,
            show_average: true,
            settle: DEFAULT_SETTLE,
        }
    }

    /// Number of trials per pattern; zero means run forever.
    #[must_use]
    pub fn loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// Number of full-buffer copies per trial.
    #[must_use]
    pub fn repeats(mut self, repeats: u32) -> Self {
        self.repeats = repeats;
        self
    }

    /// Chunk size of the block copy pattern, in bytes.
    #[must_use]
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Enables one pattern. If no pattern is ever enabled, all of them run.
    #[must_use]
    pub fn pattern(mut self, pattern: CopyPattern) -> Self {
        self.patterns.insert(pattern);
        self
    }

    /// Number of worker processes.
    #[must_use]
    pub fn processes(mut self, processes: usize) -> Self {
        self.processes = processes;
        self
    }

    /// Pinning specification in the syntax of [`parse_affinity`]. Without one, worker `i` is
    /// pinned to processor `i - 1`.
    #[must_use]
    pub fn affinity(mut self, spec: impl Into<String>) -> Self {
        self.affinity = Some(spec.into());
        self
    }

    /// Suppresses per-trial lines and the run plan.
    #[must_use]
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Whether workers print their per-pattern averages.
    #[must_use]
    pub fn show_average(mut self, show_average: bool) -> Self {
        self.show_average = show_average;
        self
    }

    /// Pause before the readiness and allocation phases.
    #[must_use]
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Validates the collected input. Nothing has been spawned yet when this fails.
    pub fn build(self) -> Result<Configuration, ConfigError> {
        if self.processes == 0 {
            return Err(ConfigError::ProcessCountZero);
        }

        let pins = match &self.affinity {
            Some(spec) => parse_affinity(spec)?,
            None => (0..self.processes)
                .map(|i| ProcessorIndex::try_from(i).unwrap_or(ProcessorIndex::MAX))
                .collect(),
        };

        if pins.len() != self.processes {
            return Err(ConfigError::AffinityCountMismatch {
                resolved: pins.len(),
                expected: self.processes,
            });
        }

        let patterns = if self.patterns.is_empty() {
            PatternSet::all()
        } else {
            self.patterns
        };

        if self.loops == 0 && patterns.len() != 1 {
            return Err(ConfigError::InfiniteLoopsWithMultipleTests {
                enabled: patterns.len(),
            });
        }

        if self.array_mib == 0 {
            return Err(ConfigError::ArraySizeZero);
        }

        let array_bytes = usize::try_from(self.array_mib)
            .ok()
            .and_then(|mib| mib.checked_mul(MIB))
            .ok_or(ConfigError::ArraySizeOverflow {
                array_mib: self.array_mib,
            })?;

        if self.block_size == 0 {
            return Err(ConfigError::BlockSizeZero);
        }

        if self.block_size > array_bytes {
            return Err(ConfigError::BlockSizeTooLarge {
                block_size: self.block_size,
                array_bytes,
            });
        }

        Ok(Configuration {
            array_mib: self.array_mib,
            element_count: array_bytes / size_of::<Word>(),
            loops: NonZero::new(self.loops),
            repeats: self.repeats,
            block_size: self.block_size,
            patterns,
            pins,
            quiet: self.quiet,
            show_average: self.show_average,
            settle: self.settle,
        })
    }
}
