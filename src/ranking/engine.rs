//! Rank engine.

use super::types::{FieldRule, Placement, RankRule, Ranked, SortOrder, TieField, TieKey};
use std::cmp::Ordering;

/// A tie rule paired with its direction.
struct OrderedRule<T> {
    rule: Box<dyn RankRule<T>>,
    order: SortOrder,
}

/// Orders items by final score (descending) and assigns competition ranks.
///
/// Scores within `epsilon` of a group's leading score form one tie group
/// and share the rank of the group's first position; the next group
/// resumes at its position index + 1, so `[90, 90, 80]` ranks
/// `[1, 1, 3]`. Inside a tie group items are ordered by the tie rules in
/// sequence, then by student id ascending.
///
/// # Examples
///
/// ```ignore
/// let engine = RankEngine::new()
///     .with_tie_key(TieKey::desc(TieField::WeightedUnitSum))
///     .with_epsilon(1e-9);
///
/// for placement in engine.rank(&results) {
///     results[placement.index].final_rank = placement.rank;
/// }
/// ```
pub struct RankEngine<T> {
    rules: Vec<OrderedRule<T>>,
    epsilon: f64,
}

impl<T: Ranked> RankEngine<T> {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            epsilon: 1e-9,
        }
    }

    /// Builds an engine from configured tie keys.
    pub fn from_keys(keys: &[TieKey], epsilon: f64) -> Self {
        keys.iter()
            .fold(Self::new().with_epsilon(epsilon), |engine, key| {
                engine.with_tie_key(*key)
            })
    }

    /// Sets the epsilon for floating-point comparison.
    pub fn with_epsilon(mut self, eps: f64) -> Self {
        self.epsilon = eps.max(0.0);
        self
    }

    /// Adds a built-in tie key.
    pub fn with_tie_key(self, key: TieKey) -> Self {
        self.with_tie_rule(FieldRule(key.field), key.order)
    }

    /// Adds a custom tie rule.
    pub fn with_tie_rule<R: RankRule<T> + 'static>(mut self, rule: R, order: SortOrder) -> Self {
        self.rules.push(OrderedRule {
            rule: Box::new(rule),
            order,
        });
        self
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.rule.name()).collect()
    }

    /// Returns one placement per item, in ranked order.
    pub fn rank(&self, items: &[T]) -> Vec<Placement> {
        let scores: Vec<f64> = items.iter().map(Ranked::final_score).collect();
        let mut indices: Vec<usize> = (0..items.len()).collect();
        indices.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

        let tie_values: Vec<Vec<f64>> = items
            .iter()
            .map(|item| self.rules.iter().map(|r| r.rule.score(item)).collect())
            .collect();

        let mut placements = Vec::with_capacity(items.len());
        let mut start = 0;
        while start < indices.len() {
            let leader = scores[indices[start]];
            let mut end = start + 1;
            while end < indices.len() && (leader - scores[indices[end]]).abs() <= self.epsilon {
                end += 1;
            }

            let group = &mut indices[start..end];
            group.sort_by(|&a, &b| self.tie_cmp(&tie_values[a], &tie_values[b], &items[a], &items[b]));
            let rank = (start + 1) as u32;
            placements.extend(group.iter().map(|&index| Placement { index, rank }));
            start = end;
        }

        placements
    }

    fn tie_cmp(&self, va: &[f64], vb: &[f64], a: &T, b: &T) -> Ordering {
        for ((x, y), rule) in va.iter().zip(vb).zip(&self.rules) {
            if (x - y).abs() <= self.epsilon {
                continue;
            }
            let ord = x.total_cmp(y);
            return match rule.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
        }
        a.student_id().cmp(b.student_id())
    }
}

impl<T: Ranked> Default for RankEngine<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Competition ranks for bare scores, in input order.
pub fn competition_ranks(scores: &[f64], epsilon: f64) -> Vec<u32> {
    struct Bare(String, f64);
    impl Ranked for Bare {
        fn student_id(&self) -> &str {
            &self.0
        }
        fn final_score(&self) -> f64 {
            self.1
        }
        fn tie_value(&self, _: TieField) -> f64 {
            0.0
        }
    }

    // zero-padded so id order matches input order
    let items: Vec<Bare> = scores
        .iter()
        .enumerate()
        .map(|(i, &s)| Bare(format!("{i:020}"), s))
        .collect();
    let mut ranks = vec![0; scores.len()];
    for p in RankEngine::new().with_epsilon(epsilon).rank(&items) {
        ranks[p.index] = p.rank;
    }
    ranks
}
