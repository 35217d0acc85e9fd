//! Runtime mode detection.
//!
//! A runtime is embedded when its own browsing context is not the top-level one.
//! Detection runs once and the answer is memoized for the life of the process,
//! since it decides which session strategy gets built.

use std::fmt;
use std::sync::OnceLock;

use tracing::info;

use crate::config::ModeSetting;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Embedded,
    Standalone,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Embedded => f.write_str("embedded"),
            Mode::Standalone => f.write_str("standalone"),
        }
    }
}

/// Opaque identity of a browsing context (window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowRef(pub u64);

/// The host's view of its own window and the top-level window.
pub trait BrowsingContext {
    fn window_ref(&self) -> WindowRef;
    fn top_window_ref(&self) -> WindowRef;
}

/// Fixed window references, for hosts that know their placement up front.
#[derive(Debug, Clone, Copy)]
pub struct StaticContext {
    pub window: WindowRef,
    pub top: WindowRef,
}

impl StaticContext {
    pub fn top_level() -> Self {
        Self {
            window: WindowRef(0),
            top: WindowRef(0),
        }
    }

    pub fn framed() -> Self {
        Self {
            window: WindowRef(1),
            top: WindowRef(0),
        }
    }
}

impl BrowsingContext for StaticContext {
    fn window_ref(&self) -> WindowRef {
        self.window
    }

    fn top_window_ref(&self) -> WindowRef {
        self.top
    }
}

/// Pure comparison of the two window references.
pub fn detect(ctx: &dyn BrowsingContext) -> Mode {
    if ctx.window_ref() != ctx.top_window_ref() {
        Mode::Embedded
    } else {
        Mode::Standalone
    }
}

/// Memoizing detector: the first call decides, later calls return the same mode.
#[derive(Debug, Default)]
pub struct ModeDetector {
    mode: OnceLock<Mode>,
}

impl ModeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, setting: ModeSetting, ctx: &dyn BrowsingContext) -> Mode {
        *self.mode.get_or_init(|| {
            let mode = match setting {
                ModeSetting::Auto => detect(ctx),
                ModeSetting::Embedded => Mode::Embedded,
                ModeSetting::Standalone => Mode::Standalone,
            };
            info!(mode = %mode, setting = ?setting, "Runtime mode resolved");
            mode
        })
    }

    pub fn mode(&self) -> Option<Mode> {
        self.mode.get().copied()
    }
}
