use crate::state::snapshot::LeaderboardEntry;

/// Top-N ranking as last reported by the server.
#[derive(Debug, Clone, Default)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
    limit: usize,
}

impl Leaderboard {
    /// Create an empty leaderboard displaying at most `limit` entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit,
        }
    }

    /// Replace the ranking, returning `true` when the visible top-N changed.
    pub fn replace(&mut self, entries: Vec<LeaderboardEntry>) -> bool {
        let ranked = rank(entries, self.limit);
        if ranked == self.entries {
            return false;
        }
        self.entries = ranked;
        true
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }
}

/// Order entries by descending score and keep the first `limit`.
///
/// The sort is stable, so ties keep the order in which the server listed them.
pub fn rank(mut entries: Vec<LeaderboardEntry>, limit: usize) -> Vec<LeaderboardEntry> {
    entries.sort_by(|a, b| b.score.cmp(&a.score));
    entries.truncate(limit);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, score: i64) -> LeaderboardEntry {
        LeaderboardEntry {
            name: name.into(),
            score,
        }
    }

    #[test]
    fn ties_keep_insertion_order() {
        let ranked = rank(
            vec![entry("b", 5), entry("a", 9), entry("c", 5), entry("d", 1)],
            3,
        );
        let names: Vec<_> = ranked.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn replace_reports_visible_changes_only() {
        let mut board = Leaderboard::new(2);
        assert!(board.replace(vec![entry("a", 3), entry("b", 2), entry("c", 1)]));
        // Only the truncated tail differs.
        assert!(!board.replace(vec![entry("a", 3), entry("b", 2), entry("z", 0)]));
        assert!(board.replace(vec![entry("b", 4), entry("a", 3)]));
        assert_eq!(board.entries()[0].name, "b");
    }
}
