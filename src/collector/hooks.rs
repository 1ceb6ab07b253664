//! Lifecycle hook dispatch
//!
//! Consumers (reporters, statistics) register callbacks per phase while the
//! harness starts up. [`HookRegistryBuilder::build`] freezes the registry;
//! dispatch only ever reads it. ASSERT events never reach hooks: they are
//! folded into [`TestStats`] instead.

use crate::worker::PlannedTest;

use super::runner::RunSummary;
use super::{TestReport, TestStats};

/// Phase a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreEverything,
    PreInit,
    PreTest,
    PostTest,
    PostFini,
    PostEverything,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::PreEverything,
        Phase::PreInit,
        Phase::PreTest,
        Phase::PostTest,
        Phase::PostFini,
        Phase::PostEverything,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Data handed to the hooks of one phase
#[derive(Debug, Clone, Copy)]
pub enum HookPayload<'a> {
    /// The whole run plan, before any worker starts
    PreEverything(&'a [PlannedTest]),
    PreInit(&'a PlannedTest),
    PreTest(&'a PlannedTest),
    PostTest {
        test: &'a PlannedTest,
        stats: &'a TestStats,
    },
    /// Final report of a test, whatever its outcome
    PostFini(&'a TestReport),
    PostEverything(&'a RunSummary),
}

impl HookPayload<'_> {
    /// The phase this payload belongs to
    pub fn phase(&self) -> Phase {
        match self {
            Self::PreEverything(_) => Phase::PreEverything,
            Self::PreInit(_) => Phase::PreInit,
            Self::PreTest(_) => Phase::PreTest,
            Self::PostTest { .. } => Phase::PostTest,
            Self::PostFini(_) => Phase::PostFini,
            Self::PostEverything(_) => Phase::PostEverything,
        }
    }
}

/// A registered callback
pub type Hook = Box<dyn Fn(&HookPayload<'_>) + Send + Sync>;

/// Collects hooks during startup
#[derive(Default)]
pub struct HookRegistryBuilder {
    hooks: [Vec<Hook>; 6],
}

impl HookRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `hook` to the callbacks of `phase`
    pub fn register<F>(&mut self, phase: Phase, hook: F) -> &mut Self
    where
        F: Fn(&HookPayload<'_>) + Send + Sync + 'static,
    {
        self.hooks[phase.index()].push(Box::new(hook));
        self
    }

    /// Freeze the registry
    pub fn build(self) -> HookRegistry {
        HookRegistry { hooks: self.hooks }
    }
}

/// Read-only hook registry
#[derive(Default)]
pub struct HookRegistry {
    hooks: [Vec<Hook>; 6],
}

impl HookRegistry {
    /// Registry with no hooks at all
    pub fn empty() -> Self {
        Self::default()
    }

    /// Invoke every hook registered for the payload's phase, in registration
    /// order
    ///
    /// A panicking hook is not caught.
    pub fn dispatch(&self, payload: HookPayload<'_>) {
        let phase = payload.phase();
        for hook in &self.hooks[phase.index()] {
            hook(&payload);
        }
    }

    pub fn count(&self, phase: Phase) -> usize {
        self.hooks[phase.index()].len()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for phase in Phase::ALL {
            map.entry(&phase, &self.count(phase));
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::TestId;
    use std::sync::{Arc, Mutex};

    fn planned() -> PlannedTest {
        PlannedTest {
            id: TestId::new("hooks", "order"),
            param: None,
            timeout: None,
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = HookRegistryBuilder::new();
        for label in ["first", "second", "third"] {
            let log = Arc::clone(&log);
            builder.register(Phase::PreInit, move |payload| {
                if let HookPayload::PreInit(test) = payload {
                    log.lock().unwrap().push(format!("{} {}", label, test));
                }
            });
        }
        let registry = builder.build();

        registry.dispatch(HookPayload::PreInit(&planned()));
        assert_eq!(
            *log.lock().unwrap(),
            vec!["first hooks::order", "second hooks::order", "third hooks::order"]
        );
    }

    #[test]
    fn test_dispatch_only_matching_phase() {
        let calls = Arc::new(Mutex::new(0));
        let mut builder = HookRegistryBuilder::new();
        let counter = Arc::clone(&calls);
        builder.register(Phase::PostTest, move |_| *counter.lock().unwrap() += 1);
        let registry = builder.build();

        let test = planned();
        registry.dispatch(HookPayload::PreTest(&test));
        assert_eq!(*calls.lock().unwrap(), 0);

        let stats = TestStats::default();
        registry.dispatch(HookPayload::PostTest { test: &test, stats: &stats });
        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(registry.count(Phase::PostTest), 1);
        assert_eq!(registry.count(Phase::PreInit), 0);
    }

    #[test]
    #[should_panic(expected = "reporter exploded")]
    fn test_panicking_hook_is_not_caught() {
        let mut builder = HookRegistryBuilder::new();
        builder.register(Phase::PreTest, |_| panic!("reporter exploded"));
        builder.build().dispatch(HookPayload::PreTest(&planned()));
    }
}
