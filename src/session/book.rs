//! Local position book reconciled from store pushes

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::common::types::{Position, PositionChange};
use crate::margin::guard::MarginSnapshot;

/// Positions of one user keyed by id
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_positions(positions: impl IntoIterator<Item = Position>) -> Self {
        Self {
            positions: positions.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Position> {
        self.positions.get(id)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Insert or replace a position without lifecycle checks
    pub fn upsert(&mut self, position: Position) {
        self.positions.insert(position.id.clone(), position);
    }

    /// Reconcile a realtime change notification
    ///
    /// Updates that would move a position backwards in its lifecycle are
    /// stale and ignored. Returns whether the book changed.
    pub fn apply(&mut self, change: PositionChange) -> bool {
        match change {
            PositionChange::Inserted(position) | PositionChange::Updated(position) => {
                match self.positions.get(&position.id) {
                    Some(current)
                        if current.status != position.status
                            && !current.status.can_transition_to(position.status) =>
                    {
                        debug!(
                            "Ignoring stale update for {}: {} -> {}",
                            position.id, current.status, position.status
                        );
                        false
                    }
                    Some(current) if *current == position => false,
                    _ => {
                        self.upsert(position);
                        true
                    }
                }
            }
            PositionChange::Deleted { id } => self.positions.remove(&id).is_some(),
        }
    }

    /// Open and pending positions
    pub fn committed(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_committed())
    }

    pub fn committed_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.committed().cloned().collect();
        positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at).then_with(|| a.id.cmp(&b.id)));
        positions
    }

    pub fn margin_snapshot(&self) -> MarginSnapshot {
        MarginSnapshot::from_positions(self.positions.values())
    }

    /// Symbols the price feed must carry for this book
    pub fn symbols_of_interest(&self) -> BTreeSet<String> {
        self.committed().map(|p| p.symbol.clone()).collect()
    }
}
