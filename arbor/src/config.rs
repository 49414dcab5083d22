//! Process wide knobs of a heap.
//!
//! A [`Config`] is built once and handed to [`Heap::with_config`](crate::Heap::with_config).
//! The hooks can be rebound later through the heap itself.
//!
//! ```rust,ignore
//! let heap = Heap::with_config(
//!     Config::default()
//!         .null_tracking(true)
//!         .log_sink(|msg| eprintln!("arbor: {msg}")),
//! );
//! ```

use std::fmt;

use crate::{
    chunk::{MAX_SIZE, SHRINK_THRESHOLD},
    error::Violation,
};

/// Called with a violation right before the heap panics.
pub type FatalHook = Box<dyn Fn(&Violation)>;
/// Receives diagnostic lines.
pub type LogSink = Box<dyn Fn(&str)>;

pub struct Config {
    pub(crate) null_tracking: bool,
    pub(crate) max_size: usize,
    pub(crate) shrink_threshold: usize,
    pub(crate) fatal_hook: FatalHook,
    pub(crate) log_sink: LogSink,
}

pub(crate) fn default_fatal_hook() -> FatalHook {
    Box::new(|violation| tracing::error!(target: "arbor", "{violation}"))
}

pub(crate) fn default_log_sink() -> LogSink {
    Box::new(|msg| tracing::warn!(target: "arbor", "{msg}"))
}

impl Default for Config {
    fn default() -> Self {
        Config {
            null_tracking: false,
            max_size: MAX_SIZE,
            shrink_threshold: SHRINK_THRESHOLD,
            fatal_hook: default_fatal_hook(),
            log_sink: default_log_sink(),
        }
    }
}

impl Config {
    /// Attach top level chunks to a `null_context` chunk.
    pub fn null_tracking(mut self, enabled: bool) -> Self {
        self.null_tracking = enabled;
        self
    }

    /// The hard cap on the size of a single chunk.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn shrink_threshold(mut self, threshold: usize) -> Self {
        self.shrink_threshold = threshold;
        self
    }

    pub fn fatal_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Violation) + 'static,
    {
        self.fatal_hook = Box::new(hook);
        self
    }

    pub fn log_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + 'static,
    {
        self.log_sink = Box::new(sink);
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("null_tracking", &self.null_tracking)
            .field("max_size", &self.max_size)
            .field("shrink_threshold", &self.shrink_threshold)
            .finish_non_exhaustive()
    }
}
