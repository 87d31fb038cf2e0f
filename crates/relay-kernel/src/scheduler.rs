use crate::registry::Registry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub expired: usize,
    pub removed: usize,
    pub cleanup_ran: bool,
}

/// Periodic driver for the registry's time-based transitions.
///
/// Every tick expires stale pending records; the cleanup sweep runs once
/// `cleanup_interval_ms` has passed since the previous one. The first tick
/// only arms the cleanup timer.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    cleanup_interval_ms: u64,
    last_cleanup: Option<u64>,
}

impl TickScheduler {
    pub fn new(cleanup_interval_ms: u64) -> Self {
        Self {
            cleanup_interval_ms,
            last_cleanup: None,
        }
    }

    pub fn tick(&mut self, registry: &mut Registry) -> TickReport {
        let now = registry.now();
        let last = *self.last_cleanup.get_or_insert(now);

        let mut report = TickReport {
            expired: registry.expire_stale(),
            ..TickReport::default()
        };
        if now.saturating_sub(last) >= self.cleanup_interval_ms {
            report.removed = registry.cleanup();
            report.cleanup_ran = true;
            self.last_cleanup = Some(now);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ids::UuidV4Ids;
    use crate::notify::NoopSink;
    use crate::registry::{NewRequest, Policy};
    use relay_contracts::Status;
    use std::sync::Arc;

    fn registry(clock: Arc<ManualClock>) -> Registry {
        Registry::new(
            Policy::default(),
            clock,
            Arc::new(UuidV4Ids),
            Arc::new(NoopSink),
        )
    }

    fn request() -> NewRequest {
        NewRequest {
            tool_name: "Bash".to_string(),
            message: "$ rm -rf target".to_string(),
            subtitle: "Bash command".to_string(),
            ..NewRequest::default()
        }
    }

    #[test]
    fn tick_expires_pending_records() {
        let clock = Arc::new(ManualClock::new(0));
        let mut registry = registry(clock.clone());
        let mut scheduler = TickScheduler::new(60_000);
        registry.create(request()).unwrap();

        clock.advance(50);
        assert_eq!(scheduler.tick(&mut registry).expired, 0);

        clock.advance(120_000);
        let report = scheduler.tick(&mut registry);
        assert_eq!(report.expired, 1);
        assert_eq!(registry.list()[0].status, Status::Expired);
    }

    #[test]
    fn cleanup_runs_on_its_own_cadence() {
        let clock = Arc::new(ManualClock::new(0));
        let mut registry = registry(clock.clone());
        let mut scheduler = TickScheduler::new(60_000);

        assert!(!scheduler.tick(&mut registry).cleanup_ran);
        clock.advance(59_999);
        assert!(!scheduler.tick(&mut registry).cleanup_ran);
        clock.advance(1);
        assert!(scheduler.tick(&mut registry).cleanup_ran);
        clock.advance(50);
        assert!(!scheduler.tick(&mut registry).cleanup_ran);
    }

    #[test]
    fn cleanup_tick_removes_retired_records() {
        let clock = Arc::new(ManualClock::new(0));
        let mut registry = registry(clock.clone());
        let mut scheduler = TickScheduler::new(60_000);
        scheduler.tick(&mut registry);
        let id = registry.create(request()).unwrap().request.id;

        clock.advance(300_001);
        let report = scheduler.tick(&mut registry);
        assert!(report.cleanup_ran);
        assert_eq!(report.removed, 1);
        assert!(registry.get(&id).is_err());
    }
}
