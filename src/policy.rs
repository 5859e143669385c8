//! Memory policies bounding in-memory buffering.
//!
//! The SPIMI inverter and the external sorter both fill a buffer until their
//! [`MemoryPolicy`] says there is no more room, then flush it to storage.
//! Production builds watch available system memory, while tests use a fixed
//! element cap so flush boundaries are deterministic.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Memory left free before the inverter flushes a segment.
pub const DEFAULT_MEMORY_FLOOR: u64 = 10 * 1024 * 1024;

/// Largest buffer the default policy lets one inverter or sorter hold.
///
/// Also the whole budget when available memory cannot be measured.
pub const DEFAULT_BUFFER_BYTES: usize = 256 * 1024 * 1024;

/// Snapshot of a buffer's current size, handed to the policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferUsage {
    /// Number of buffered elements (postings or records).
    pub elements: usize,
    /// Approximate heap bytes held by the buffer.
    pub approx_bytes: usize,
}

/// Decides whether a buffer may take another element.
pub trait MemoryPolicy: Send {
    /// Whether one more element fits given the current usage.
    fn has_capacity(&mut self, usage: &BufferUsage) -> bool;

    /// Called after the buffer has been flushed and emptied.
    fn reset(&mut self) {}

    /// Short description for log output.
    fn describe(&self) -> String;
}

impl fmt::Debug for dyn MemoryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoryPolicy({})", self.describe())
    }
}

/// Caps the buffer at a fixed number of elements.
#[derive(Debug, Clone)]
pub struct ElementCountPolicy {
    max_elements: usize,
}

impl ElementCountPolicy {
    pub fn new(max_elements: usize) -> Self {
        ElementCountPolicy {
            max_elements: max_elements.max(1),
        }
    }
}

impl MemoryPolicy for ElementCountPolicy {
    fn has_capacity(&mut self, usage: &BufferUsage) -> bool {
        usage.elements < self.max_elements
    }

    fn describe(&self) -> String {
        format!("max {} elements", self.max_elements)
    }
}

/// Caps the buffer at an approximate byte budget.
#[derive(Debug, Clone)]
pub struct ByteBudgetPolicy {
    max_bytes: usize,
}

impl ByteBudgetPolicy {
    pub fn new(max_bytes: usize) -> Self {
        ByteBudgetPolicy { max_bytes }
    }
}

impl MemoryPolicy for ByteBudgetPolicy {
    fn has_capacity(&mut self, usage: &BufferUsage) -> bool {
        usage.approx_bytes < self.max_bytes
    }

    fn describe(&self) -> String {
        format!("max {} buffered bytes", self.max_bytes)
    }
}

/// Keeps buffering while the system reports at least `floor_bytes` available
/// and the buffer itself stays under `max_buffer_bytes`.
///
/// Available memory is sampled from `/proc/meminfo` every `check_interval`
/// calls. On systems where it cannot be read only the buffer budget applies.
#[derive(Debug)]
pub struct AvailableMemoryPolicy {
    floor_bytes: u64,
    check_interval: usize,
    calls_since_check: usize,
    last_answer: bool,
    budget: ByteBudgetPolicy,
    measurable: bool,
}

impl AvailableMemoryPolicy {
    pub fn new(floor_bytes: u64, check_interval: usize) -> Self {
        AvailableMemoryPolicy {
            floor_bytes,
            check_interval: check_interval.max(1),
            calls_since_check: 0,
            last_answer: true,
            budget: ByteBudgetPolicy::new(DEFAULT_BUFFER_BYTES),
            measurable: true,
        }
    }

    /// Cap the buffer at `max_buffer_bytes` whatever the system has free.
    pub fn with_max_buffer_bytes(mut self, max_buffer_bytes: usize) -> Self {
        self.budget = ByteBudgetPolicy::new(max_buffer_bytes);
        self
    }

    fn sample(&mut self) -> bool {
        match available_memory() {
            Some(available) => available >= self.floor_bytes,
            None => {
                log::warn!(
                    "Available memory is not measurable on this system, \
                     using only the {} byte buffer budget",
                    self.budget.max_bytes
                );
                self.measurable = false;
                true
            }
        }
    }
}

impl Default for AvailableMemoryPolicy {
    fn default() -> Self {
        AvailableMemoryPolicy::new(DEFAULT_MEMORY_FLOOR, default_check_interval())
    }
}

impl MemoryPolicy for AvailableMemoryPolicy {
    fn has_capacity(&mut self, usage: &BufferUsage) -> bool {
        if !self.budget.has_capacity(usage) {
            return false;
        }
        if !self.measurable {
            return true;
        }

        if self.calls_since_check == 0 {
            self.last_answer = self.sample();
        }
        self.calls_since_check = (self.calls_since_check + 1) % self.check_interval;
        self.last_answer
    }

    fn reset(&mut self) {
        self.calls_since_check = 0;
        self.last_answer = true;
    }

    fn describe(&self) -> String {
        if self.measurable {
            format!(
                "keep {} bytes available, {}",
                self.floor_bytes,
                self.budget.describe()
            )
        } else {
            self.budget.describe()
        }
    }
}

/// Adapts a closure into a [`MemoryPolicy`].
pub struct FnPolicy<F> {
    predicate: F,
}

impl<F> FnPolicy<F>
where
    F: FnMut(&BufferUsage) -> bool + Send,
{
    pub fn new(predicate: F) -> Self {
        FnPolicy { predicate }
    }
}

impl<F> MemoryPolicy for FnPolicy<F>
where
    F: FnMut(&BufferUsage) -> bool + Send,
{
    fn has_capacity(&mut self, usage: &BufferUsage) -> bool {
        (self.predicate)(usage)
    }

    fn describe(&self) -> String {
        "custom".to_string()
    }
}

/// Read `MemAvailable` from `/proc/meminfo`, in bytes.
fn available_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix("MemAvailable:")?;
        let kib: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        Some(kib * 1024)
    })
}

fn default_check_interval() -> usize {
    1024
}

fn default_max_buffer_bytes() -> usize {
    DEFAULT_BUFFER_BYTES
}

/// Serializable description of a memory policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MemoryPolicyConfig {
    /// Flush when available system memory drops below `floor_bytes` or the
    /// buffer reaches `max_buffer_bytes`.
    AvailableMemory {
        floor_bytes: u64,
        #[serde(default = "default_check_interval")]
        check_interval: usize,
        #[serde(default = "default_max_buffer_bytes")]
        max_buffer_bytes: usize,
    },
    /// Flush when the buffer holds about `max_bytes`.
    MaxBufferedBytes { max_bytes: usize },
    /// Flush after `max_elements` elements.
    MaxElements { max_elements: usize },
}

impl Default for MemoryPolicyConfig {
    fn default() -> Self {
        MemoryPolicyConfig::AvailableMemory {
            floor_bytes: DEFAULT_MEMORY_FLOOR,
            check_interval: default_check_interval(),
            max_buffer_bytes: DEFAULT_BUFFER_BYTES,
        }
    }
}

impl MemoryPolicyConfig {
    /// Instantiate the configured policy.
    pub fn build(&self) -> Box<dyn MemoryPolicy> {
        match *self {
            MemoryPolicyConfig::AvailableMemory {
                floor_bytes,
                check_interval,
                max_buffer_bytes,
            } => Box::new(
                AvailableMemoryPolicy::new(floor_bytes, check_interval)
                    .with_max_buffer_bytes(max_buffer_bytes),
            ),
            MemoryPolicyConfig::MaxBufferedBytes { max_bytes } => {
                Box::new(ByteBudgetPolicy::new(max_bytes))
            }
            MemoryPolicyConfig::MaxElements { max_elements } => {
                Box::new(ElementCountPolicy::new(max_elements))
            }
        }
    }
}
