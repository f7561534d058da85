use mirror_core::{CommitPolicy, Position};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct PartitionProgress {
    highest_fetched: Option<i64>,
    unfinished: BTreeSet<i64>,
    committed: Option<i64>,
}

impl PartitionProgress {
    fn committable(&self, policy: CommitPolicy) -> Option<i64> {
        let highest = self.highest_fetched?;
        let candidate = match policy {
            CommitPolicy::Fetched => highest,
            CommitPolicy::Completed => match self.unfinished.first() {
                Some(lowest) => lowest - 1,
                None => highest,
            },
        };
        let advances = self.committed.map_or(true, |done| candidate > done);
        (candidate >= 0 && advances).then_some(candidate)
    }
}

/// Per-partition record of how far the source has been read and finished,
/// and how far it has been committed.
///
/// The dispatcher records every admitted position, workers mark them
/// finished, and the commit timer asks for the positions it may commit
/// under the configured [`CommitPolicy`].
#[derive(Debug)]
pub struct CommitCursor {
    policy: CommitPolicy,
    partitions: Mutex<HashMap<(String, i32), PartitionProgress>>,
}

impl CommitCursor {
    /// An empty cursor; nothing is committable until a record is fetched.
    pub fn new(policy: CommitPolicy) -> Self {
        Self {
            policy,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, i32), PartitionProgress>> {
        self.partitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Notes that the record at `position` was admitted for processing.
    pub fn record_fetched(&self, position: &Position) {
        let mut partitions = self.lock();
        let progress = partitions
            .entry((position.topic.clone(), position.partition))
            .or_default();
        progress.highest_fetched = Some(
            progress
                .highest_fetched
                .map_or(position.offset, |h| h.max(position.offset)),
        );
        progress.unfinished.insert(position.offset);
    }

    /// Notes that the record at `position` is done, whatever its outcome.
    pub fn record_finished(&self, position: &Position) {
        if let Some(progress) = self
            .lock()
            .get_mut(&(position.topic.clone(), position.partition))
        {
            progress.unfinished.remove(&position.offset);
        }
    }

    /// Positions that would move some partition's commit forward.
    ///
    /// Empty when nothing new is committable.
    pub fn committable(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .lock()
            .iter()
            .filter_map(|((topic, partition), progress)| {
                progress
                    .committable(self.policy)
                    .map(|offset| Position::new(topic.clone(), *partition, offset))
            })
            .collect();
        positions.sort_by(|a, b| (&a.topic, a.partition).cmp(&(&b.topic, b.partition)));
        positions
    }

    /// Records a confirmed commit so the positions are not offered again.
    pub fn mark_committed(&self, positions: &[Position]) {
        let mut partitions = self.lock();
        for position in positions {
            if let Some(progress) =
                partitions.get_mut(&(position.topic.clone(), position.partition))
            {
                progress.committed = Some(
                    progress
                        .committed
                        .map_or(position.offset, |c| c.max(position.offset)),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(partition: i32, offset: i64) -> Position {
        Position::new("traffic", partition, offset)
    }

    #[test]
    fn nothing_committable_before_first_fetch() {
        let cursor = CommitCursor::new(CommitPolicy::Fetched);
        assert!(cursor.committable().is_empty());
    }

    #[test]
    fn fetched_policy_commits_highest_fetched_regardless_of_completion() {
        let cursor = CommitCursor::new(CommitPolicy::Fetched);
        for offset in 0..5 {
            cursor.record_fetched(&pos(0, offset));
        }
        cursor.record_fetched(&pos(1, 9));

        assert_eq!(cursor.committable(), vec![pos(0, 4), pos(1, 9)]);
    }

    #[test]
    fn completed_policy_stops_below_lowest_unfinished() {
        let cursor = CommitCursor::new(CommitPolicy::Completed);
        for offset in 10..15 {
            cursor.record_fetched(&pos(0, offset));
        }
        cursor.record_finished(&pos(0, 10));
        cursor.record_finished(&pos(0, 11));
        cursor.record_finished(&pos(0, 13));

        assert_eq!(cursor.committable(), vec![pos(0, 11)]);

        cursor.record_finished(&pos(0, 12));
        cursor.record_finished(&pos(0, 14));
        assert_eq!(cursor.committable(), vec![pos(0, 14)]);
    }

    #[test]
    fn completed_policy_with_first_record_in_flight_has_nothing_to_commit() {
        let cursor = CommitCursor::new(CommitPolicy::Completed);
        cursor.record_fetched(&pos(0, 0));
        assert!(cursor.committable().is_empty());
    }

    #[test]
    fn committed_positions_are_not_offered_again() {
        let cursor = CommitCursor::new(CommitPolicy::Fetched);
        cursor.record_fetched(&pos(0, 3));
        let positions = cursor.committable();
        cursor.mark_committed(&positions);

        assert!(cursor.committable().is_empty());

        cursor.record_fetched(&pos(0, 4));
        assert_eq!(cursor.committable(), vec![pos(0, 4)]);
    }
}
