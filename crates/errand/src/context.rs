// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use tick::Clock;
use tokio::runtime::Handle;

use crate::constants::DEFAULT_CONTEXT_NAME;

/// Resources shared by every orchestrated call: a clock, a runtime, and a name.
///
/// The runtime handle is the worker pool on which listings and paged listings run
/// their attempts. It is injected explicitly, so its lifetime is tied to whoever owns
/// the runtime rather than to global state. The clock drives backoff delays and
/// cache timestamps, which lets tests control time through `tick::ClockControl`.
///
/// The name is attached to every log event as `pipeline.name`.
///
/// # Examples
///
/// ```
/// use errand::Context;
/// use tick::Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let context = Context::new(tokio::runtime::Handle::current(), Clock::new_tokio()).name("profile_api");
/// assert_eq!(context.pipeline_name(), "profile_api");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Context {
    name: Cow<'static, str>,
    clock: Clock,
    handle: Handle,
}

impl Context {
    /// Creates a context that spawns on `handle` and measures time with `clock`.
    #[must_use]
    pub fn new(handle: Handle, clock: Clock) -> Self {
        Self {
            name: Cow::Borrowed(DEFAULT_CONTEXT_NAME),
            clock,
            handle,
        }
    }

    /// Sets the name reported in log events.
    #[must_use]
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Returns the name reported in log events.
    #[must_use]
    pub fn pipeline_name(&self) -> &str {
        &self.name
    }

    /// Returns the clock used for delays and timestamps.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Returns the runtime handle attempts are spawned on.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}
