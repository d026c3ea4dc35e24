use crate::error::HeapError;

/// Default block granularity in bytes. Every block size is a multiple of it.
pub const MIN_BLOCK_SIZE: usize = 4;

/// What to do when a guard word turns out to be overwritten on free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuardPolicy {
    /// The free fails and the block stays allocated. Through
    /// [`crate::HeapManager::free`] this is fatal.
    #[default]
    Abort,
    /// Log the corruption and free the block anyway.
    Report,
}

/// Parameters of a [`crate::HeapManager`].
///
/// ```
/// use vheap::{GuardPolicy, HeapConfig};
///
/// let config = HeapConfig::new(64 * 1024, 1024 * 1024)
///     .with_guard_policy(GuardPolicy::Report);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Bytes committed up front, rounded up to the page size.
    pub min_size: usize,
    /// Bytes of address space reserved, rounded up to the page size.
    pub max_size: usize,
    /// Block granularity, a power of two not larger than the page size.
    pub granularity: usize,
    pub guard_policy: GuardPolicy,
}

impl HeapConfig {
    pub const fn new(min_size: usize, max_size: usize) -> Self {
        Self {
            min_size,
            max_size,
            granularity: MIN_BLOCK_SIZE,
            guard_policy: GuardPolicy::Abort,
        }
    }

    pub const fn with_granularity(mut self, granularity: usize) -> Self {
        self.granularity = granularity;
        self
    }

    pub const fn with_guard_policy(mut self, guard_policy: GuardPolicy) -> Self {
        self.guard_policy = guard_policy;
        self
    }

    pub(crate) fn validate(&self, page_size: usize) -> Result<(), HeapError> {
        if self.min_size > self.max_size {
            return Err(HeapError::InvalidBounds {
                min_size: self.min_size,
                max_size: self.max_size,
            });
        }

        if !self.granularity.is_power_of_two() || self.granularity > page_size {
            return Err(HeapError::InvalidGranularity {
                granularity: self.granularity,
                page_size,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = HeapConfig::new(0, 4096);

        assert_eq!(MIN_BLOCK_SIZE, config.granularity);
        assert_eq!(GuardPolicy::Abort, config.guard_policy);
        assert!(config.validate(4096).is_ok());
    }

    #[test]
    fn min_above_max_is_rejected() {
        let err = HeapConfig::new(8192, 4096).validate(4096);

        assert!(matches!(err, Err(HeapError::InvalidBounds { min_size: 8192, max_size: 4096 })));
    }

    #[test]
    fn granularity_must_be_power_of_two_within_a_page() {
        assert!(HeapConfig::new(0, 0).with_granularity(12).validate(4096).is_err());
        assert!(HeapConfig::new(0, 0).with_granularity(8192).validate(4096).is_err());
        assert!(HeapConfig::new(0, 0).with_granularity(16).validate(4096).is_ok());
    }
}
