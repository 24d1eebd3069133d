//! Bootstrap state machine
//!
//! ```text
//! NotStarted -> TablesCreated -> ForeignKeysApplied -> ViewsCreated -> [Seeded] -> Done
//!     |
//!     +-> Failed(CatalogLoad | Consistency)
//! ```
//!
//! Per-statement failures never move the machine to `Failed`; a phase with
//! failed statements still completes.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    CatalogLoad,
    Consistency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapPhase {
    NotStarted,
    TablesCreated,
    ForeignKeysApplied,
    ViewsCreated,
    Seeded,
    Done,
    Failed(FailedStage),
}

impl BootstrapPhase {
    pub fn can_transition_to(&self, next: BootstrapPhase) -> bool {
        use BootstrapPhase::*;
        matches!(
            (self, next),
            (NotStarted, TablesCreated)
                | (NotStarted, Failed(_))
                | (TablesCreated, ForeignKeysApplied)
                | (ForeignKeysApplied, ViewsCreated)
                | (ViewsCreated, Seeded)
                | (ViewsCreated, Done)
                | (Seeded, Done)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapPhase::Done | BootstrapPhase::Failed(_))
    }
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapPhase::NotStarted => write!(f, "not started"),
            BootstrapPhase::TablesCreated => write!(f, "tables created"),
            BootstrapPhase::ForeignKeysApplied => write!(f, "foreign keys applied"),
            BootstrapPhase::ViewsCreated => write!(f, "views created"),
            BootstrapPhase::Seeded => write!(f, "seeded"),
            BootstrapPhase::Done => write!(f, "done"),
            BootstrapPhase::Failed(FailedStage::CatalogLoad) => write!(f, "failed (catalog load)"),
            BootstrapPhase::Failed(FailedStage::Consistency) => write!(f, "failed (consistency)"),
        }
    }
}

/// Current phase plus every phase passed through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    history: Vec<BootstrapPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            history: vec![BootstrapPhase::NotStarted],
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> BootstrapPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(BootstrapPhase::NotStarted)
    }

    /// Move to `next`; an illegal transition is logged and ignored
    pub fn advance(&mut self, next: BootstrapPhase) -> bool {
        let current = self.current();
        if !current.can_transition_to(next) {
            log::error!("Ignoring invalid bootstrap transition {current} -> {next}");
            return false;
        }
        log::debug!("Bootstrap phase: {current} -> {next}");
        self.history.push(next);
        true
    }

    pub fn history(&self) -> &[BootstrapPhase] {
        &self.history
    }

    pub fn into_history(self) -> Vec<BootstrapPhase> {
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_with_seed() {
        let mut tracker = PhaseTracker::default();
        for next in [
            BootstrapPhase::TablesCreated,
            BootstrapPhase::ForeignKeysApplied,
            BootstrapPhase::ViewsCreated,
            BootstrapPhase::Seeded,
            BootstrapPhase::Done,
        ] {
            assert!(tracker.advance(next));
        }
        assert_eq!(tracker.history().len(), 6);
        assert!(tracker.current().is_terminal());
    }

    #[test]
    fn test_failure_only_from_not_started() {
        let failed = BootstrapPhase::Failed(FailedStage::Consistency);
        assert!(BootstrapPhase::NotStarted.can_transition_to(failed));
        assert!(!BootstrapPhase::TablesCreated.can_transition_to(failed));
        assert!(!BootstrapPhase::ViewsCreated.can_transition_to(failed));
    }

    #[test]
    fn test_phases_cannot_be_skipped() {
        let mut tracker = PhaseTracker::default();
        assert!(!tracker.advance(BootstrapPhase::ViewsCreated));
        assert_eq!(tracker.current(), BootstrapPhase::NotStarted);
        assert!(!BootstrapPhase::Done.can_transition_to(BootstrapPhase::TablesCreated));
    }

    #[test]
    fn test_display() {
        assert_eq!(BootstrapPhase::ForeignKeysApplied.to_string(), "foreign keys applied");
        assert_eq!(
            BootstrapPhase::Failed(FailedStage::CatalogLoad).to_string(),
            "failed (catalog load)"
        );
    }
}
