//! Configuration structures for tidal trees.

use crate::error::{Result, TidalError};
use serde::{Deserialize, Serialize};

/// Default number of entries (leaf) or children (branch) a page holds before it splits.
pub const DEFAULT_PAGE_SPLIT_SIZE: usize = 32;

/// Smallest accepted split size. Below this a split page would fall under
/// minimum occupancy immediately.
pub const MIN_PAGE_SPLIT_SIZE: usize = 4;

/// Page layout configuration for a persistent tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Maximum page arity. A page that grows past this splits in two.
    pub page_split_size: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_split_size: DEFAULT_PAGE_SPLIT_SIZE,
        }
    }
}

impl TreeConfig {
    /// Creates a configuration with the given split size.
    pub fn new(page_split_size: usize) -> Self {
        Self { page_split_size }
    }

    /// Checks that the configuration describes a usable page layout.
    pub fn validate(&self) -> Result<()> {
        if self.page_split_size < MIN_PAGE_SPLIT_SIZE {
            return Err(TidalError::InvalidParameter {
                name: "page_split_size".to_string(),
                value: self.page_split_size.to_string(),
            });
        }
        if self.page_split_size > u32::MAX as usize {
            return Err(TidalError::ConfigError(format!(
                "page_split_size {} exceeds {}",
                self.page_split_size,
                u32::MAX
            )));
        }
        Ok(())
    }

    /// Minimum arity a non-root page keeps after a delete (50% fill).
    pub fn min_occupancy(&self) -> usize {
        self.page_split_size / 2
    }
}
