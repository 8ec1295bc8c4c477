//! Instance context for log correlation
//!
//! Every Spillway process gets an instance id at startup. Spans opened while
//! an [`InstanceContextGuard`] is alive carry that context, so log lines from
//! several processes writing to one aggregator can be told apart.
//!
//! The context is process-wide rather than thread-local: buffer work runs on
//! tokio worker threads that have no relationship to the thread that set it.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// Identity of the running process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceContext {
    /// Service name, e.g. "spillway"
    pub service: String,
    /// Unique id for this process lifetime
    pub instance_id: Uuid,
    /// When the context was created
    pub started_at: DateTime<Utc>,
}

impl InstanceContext {
    /// New context with a fresh instance id
    pub fn new(service: impl Into<String>) -> Self {
        Self::with_instance_id(service, Uuid::new_v4())
    }

    /// Context with a caller-chosen instance id
    pub fn with_instance_id(service: impl Into<String>, instance_id: Uuid) -> Self {
        Self {
            service: service.into(),
            instance_id,
            started_at: Utc::now(),
        }
    }

    /// Short form of the instance id for log lines
    pub fn short_id(&self) -> String {
        self.instance_id.simple().to_string()[..8].to_string()
    }

    /// Root span carrying the context as fields
    ///
    /// JSONL output includes span fields, so entering this span puts
    /// `service` and `instance` on every line logged beneath it.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "instance",
            service = %self.service,
            instance = %self.short_id()
        )
    }
}

static INSTANCE_CONTEXT: RwLock<Option<InstanceContext>> = parking_lot::const_rwlock(None);

/// RAII guard for the instance context
///
/// Sets the context on creation and restores the previous one on drop.
pub struct InstanceContextGuard {
    previous: Option<InstanceContext>,
}

impl InstanceContextGuard {
    /// Install `context` for the lifetime of the guard
    pub fn new(context: InstanceContext) -> Self {
        let previous = INSTANCE_CONTEXT.write().replace(context);
        Self { previous }
    }

    /// Get the current instance context (if any)
    pub fn current() -> Option<InstanceContext> {
        INSTANCE_CONTEXT.read().clone()
    }

    /// Get the current instance id (if set)
    pub fn current_instance_id() -> Option<Uuid> {
        INSTANCE_CONTEXT.read().as_ref().map(|ctx| ctx.instance_id)
    }
}

impl Drop for InstanceContextGuard {
    fn drop(&mut self) {
        *INSTANCE_CONTEXT.write() = self.previous.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both assertions share the process-wide slot, so they live in one test
    #[test]
    fn test_guard_sets_and_restores() {
        let outer = InstanceContext::new("outer");
        let inner = InstanceContext::new("inner");

        {
            let _outer = InstanceContextGuard::new(outer.clone());
            assert_eq!(InstanceContextGuard::current(), Some(outer.clone()));

            {
                let _inner = InstanceContextGuard::new(inner.clone());
                assert_eq!(
                    InstanceContextGuard::current_instance_id(),
                    Some(inner.instance_id)
                );
            }

            // Restored after the inner guard drops
            assert_eq!(InstanceContextGuard::current(), Some(outer));
        }
    }

    #[test]
    fn test_short_id() {
        let id = Uuid::new_v4();
        let ctx = InstanceContext::with_instance_id("spillway", id);
        assert_eq!(ctx.short_id().len(), 8);
        assert!(id.simple().to_string().starts_with(&ctx.short_id()));
    }
}
