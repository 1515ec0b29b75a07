//! Engine settings

use converge_common::defaults::{DEFAULT_LIST_CONCURRENCY, default_manager};

/// How the bulk lister hydrates the tags of listed objects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// One tag fetch at a time, in listing order
    Sequential,
    /// Up to `n` tag fetches in flight; results still come out in listing order
    Concurrent(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListerConfig {
    pub fan_out: FanOut,
}

impl ListerConfig {
    pub fn sequential() -> Self {
        Self {
            fan_out: FanOut::Sequential,
        }
    }

    /// Concurrency of 0 or 1 selects sequential hydration
    pub fn with_concurrency(concurrency: usize) -> Self {
        let fan_out = match concurrency {
            0 | 1 => FanOut::Sequential,
            n => FanOut::Concurrent(n),
        };
        Self { fan_out }
    }
}

impl Default for ListerConfig {
    fn default() -> Self {
        Self::with_concurrency(DEFAULT_LIST_CONCURRENCY)
    }
}

/// Settings for a [`crate::ConvergenceEngine`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Identity written to and checked against the ownership tag
    pub manager: String,
    pub lister: ListerConfig,
    /// Region the cloud client talks to; descriptors pinned elsewhere are rejected
    pub region: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            manager: default_manager(),
            lister: ListerConfig::default(),
            region: None,
        }
    }
}

impl EngineSettings {
    pub fn with_manager(mut self, manager: impl Into<String>) -> Self {
        self.manager = manager.into();
        self
    }

    pub fn with_lister(mut self, lister: ListerConfig) -> Self {
        self.lister = lister;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}
