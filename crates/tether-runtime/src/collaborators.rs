//! Interfaces of the external collaborators the orchestrator drives.
//!
//! Memory, identity, timers, channels, and skills live outside this crate.
//! Each one is optional: an absent collaborator is simply skipped during
//! start/stop and reported as missing in status projections.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RuntimeError;

/// Start/stop/health contract shared by every collaborator.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Stable name used in logs and status output.
    fn name(&self) -> &str;

    /// Initialize. A failure is logged and the collaborator marked unhealthy.
    async fn start(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Shut down. Failures are logged.
    async fn stop(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    /// Current health.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Summary numbers from the memory store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Indexed documents.
    pub documents: usize,
    /// Searchable chunks across all documents.
    pub chunks: usize,
}

/// The hybrid search/index store.
pub trait MemoryStore: Lifecycle {
    /// Current index statistics.
    fn stats(&self) -> MemoryStats;

    /// Most recently written keys, newest first.
    fn recent_keys(&self, limit: usize) -> Vec<String>;
}

/// Full identity payload delivered once after each context reset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Persona definition.
    pub soul: String,
    /// What is known about the user.
    pub user: String,
    /// Mutable working state.
    pub state: String,
}

/// The identity/profile loader.
pub trait IdentitySource: Lifecycle {
    /// Full identity documents.
    fn full(&self) -> Identity;

    /// Short digest sent with ordinary deliveries.
    fn digest(&self) -> String;
}

/// The timer/cron scheduler.
pub trait TimerService: Lifecycle {
    /// Names of currently armed timers.
    fn active_timers(&self) -> Vec<String>;
}

/// Buffered conversation transcript, flushed before a context reset.
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    /// Persist anything still buffered.
    async fn flush(&self) -> Result<(), RuntimeError>;
}

/// The set of collaborators wired into an orchestrator. `None` means the
/// feature is disabled.
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Search/index store.
    pub memory: Option<Arc<dyn MemoryStore>>,
    /// Identity loader.
    pub identity: Option<Arc<dyn IdentitySource>>,
    /// Timer scheduler.
    pub timers: Option<Arc<dyn TimerService>>,
    /// Channel adapters.
    pub channels: Option<Arc<dyn Lifecycle>>,
    /// Plugin loader.
    pub skills: Option<Arc<dyn Lifecycle>>,
    /// Transcript buffer.
    pub transcript: Option<Arc<dyn TranscriptSink>>,
}

impl Collaborators {
    /// No collaborators at all.
    pub fn none() -> Self {
        Self::default()
    }

    /// Active timer names, empty without a timer service.
    pub fn active_timers(&self) -> Vec<String> {
        self.timers.as_ref().map(|t| t.active_timers()).unwrap_or_default()
    }

    /// Memory stats, if a memory store is wired.
    pub fn memory_stats(&self) -> Option<MemoryStats> {
        self.memory.as_ref().map(|m| m.stats())
    }

    /// Recent memory keys, empty without a memory store.
    pub fn recent_memory_keys(&self, limit: usize) -> Vec<String> {
        self.memory.as_ref().map(|m| m.recent_keys(limit)).unwrap_or_default()
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("memory", &self.memory.is_some())
            .field("identity", &self.identity.is_some())
            .field("timers", &self.timers.is_some())
            .field("channels", &self.channels.is_some())
            .field("skills", &self.skills.is_some())
            .field("transcript", &self.transcript.is_some())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod fakes {
    //! In-memory collaborators for tests.

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Records lifecycle calls into a shared log.
    pub struct FakeLifecycle {
        pub name: String,
        pub log: Arc<Mutex<Vec<String>>>,
        pub fail_start: bool,
    }

    #[async_trait]
    impl Lifecycle for FakeLifecycle {
        fn name(&self) -> &str {
            &self.name
        }
        async fn start(&self) -> Result<(), RuntimeError> {
            self.log.lock().push(format!("start:{}", self.name));
            if self.fail_start {
                return Err(RuntimeError::collaborator(&self.name, "boom"));
            }
            Ok(())
        }
        async fn stop(&self) -> Result<(), RuntimeError> {
            self.log.lock().push(format!("stop:{}", self.name));
            Ok(())
        }
    }

    pub struct FakeMemory {
        pub inner: FakeLifecycle,
    }

    #[async_trait]
    impl Lifecycle for FakeMemory {
        fn name(&self) -> &str {
            self.inner.name()
        }
        async fn start(&self) -> Result<(), RuntimeError> {
            self.inner.start().await
        }
        async fn stop(&self) -> Result<(), RuntimeError> {
            self.inner.stop().await
        }
    }

    impl MemoryStore for FakeMemory {
        fn stats(&self) -> MemoryStats {
            MemoryStats {
                documents: 4,
                chunks: 42,
            }
        }
        fn recent_keys(&self, limit: usize) -> Vec<String> {
            ["notes/today.md", "people/ana.md", "projects/tether.md"]
                .iter()
                .take(limit)
                .map(ToString::to_string)
                .collect()
        }
    }

    pub struct FakeTimers {
        pub inner: FakeLifecycle,
    }

    #[async_trait]
    impl Lifecycle for FakeTimers {
        fn name(&self) -> &str {
            self.inner.name()
        }
        async fn start(&self) -> Result<(), RuntimeError> {
            self.inner.start().await
        }
        async fn stop(&self) -> Result<(), RuntimeError> {
            self.inner.stop().await
        }
    }

    impl TimerService for FakeTimers {
        fn active_timers(&self) -> Vec<String> {
            vec!["morning-briefing".into(), "inbox-check".into()]
        }
    }

    pub struct FakeIdentity {
        pub inner: FakeLifecycle,
    }

    #[async_trait]
    impl Lifecycle for FakeIdentity {
        fn name(&self) -> &str {
            self.inner.name()
        }
        async fn start(&self) -> Result<(), RuntimeError> {
            self.inner.start().await
        }
        async fn stop(&self) -> Result<(), RuntimeError> {
            self.inner.stop().await
        }
    }

    impl IdentitySource for FakeIdentity {
        fn full(&self) -> Identity {
            Identity {
                soul: "calm".into(),
                user: "ana".into(),
                state: "idle".into(),
            }
        }
        fn digest(&self) -> String {
            "calm/ana/idle".into()
        }
    }

    /// Counts flushes; optionally fails.
    #[derive(Default)]
    pub struct FakeTranscript {
        pub flushes: AtomicUsize,
        pub fail: AtomicBool,
    }

    #[async_trait]
    impl TranscriptSink for FakeTranscript {
        async fn flush(&self) -> Result<(), RuntimeError> {
            let _ = self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(RuntimeError::collaborator("transcript", "disk full"));
            }
            Ok(())
        }
    }

    pub fn lifecycle(name: &str, log: &Arc<Mutex<Vec<String>>>, fail_start: bool) -> FakeLifecycle {
        FakeLifecycle {
            name: name.to_string(),
            log: Arc::clone(log),
            fail_start,
        }
    }

    /// Every collaborator wired, sharing one call log.
    pub fn full_set(log: &Arc<Mutex<Vec<String>>>) -> Collaborators {
        Collaborators {
            memory: Some(Arc::new(FakeMemory {
                inner: lifecycle("memory", log, false),
            })),
            identity: Some(Arc::new(FakeIdentity {
                inner: lifecycle("identity", log, false),
            })),
            timers: Some(Arc::new(FakeTimers {
                inner: lifecycle("timers", log, false),
            })),
            channels: Some(Arc::new(lifecycle("channels", log, false))),
            skills: Some(Arc::new(lifecycle("skills", log, false))),
            transcript: Some(Arc::new(FakeTranscript::default())),
        }
    }
}
