//! Pairing of boxes under an acceptance predicate.

use crate::common::*;

/// How candidates on the left side are paired with candidates on the right side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Each left item takes the first acceptable right item in input order.
    /// A right item may be taken by several left items.
    GreedyFirstMatch,
    /// One-to-one maximum-cardinality matching.
    MaximumBipartite,
}

impl Default for MatchStrategy {
    fn default() -> Self {
        Self::GreedyFirstMatch
    }
}

impl MatchStrategy {
    /// Returns, for each left index, the matched right index.
    pub fn match_pairs<F>(
        &self,
        n_left: usize,
        n_right: usize,
        mut accept: F,
    ) -> Vec<Option<usize>>
    where
        F: FnMut(usize, usize) -> bool,
    {
        match self {
            Self::GreedyFirstMatch => (0..n_left)
                .map(|left| (0..n_right).find(|&right| accept(left, right)))
                .collect(),
            Self::MaximumBipartite => {
                let edges: Vec<Vec<usize>> = (0..n_left)
                    .map(|left| (0..n_right).filter(|&right| accept(left, right)).collect())
                    .collect();
                maximum_bipartite(&edges, n_right)
            }
        }
    }
}

/// Kuhn's augmenting path algorithm. Left items are processed in input order and their
/// candidates are tried in input order, so the result is deterministic.
fn maximum_bipartite(edges: &[Vec<usize>], n_right: usize) -> Vec<Option<usize>> {
    fn augment(
        left: usize,
        edges: &[Vec<usize>],
        visited: &mut [bool],
        right_owner: &mut [Option<usize>],
    ) -> bool {
        // prefer an unowned candidate before displacing an owner
        let free = edges[left]
            .iter()
            .copied()
            .find(|&right| !visited[right] && right_owner[right].is_none());
        if let Some(right) = free {
            visited[right] = true;
            right_owner[right] = Some(left);
            return true;
        }

        for &right in &edges[left] {
            if visited[right] {
                continue;
            }
            visited[right] = true;

            let reassigned = match right_owner[right] {
                None => true,
                Some(owner) => augment(owner, edges, visited, right_owner),
            };
            if reassigned {
                right_owner[right] = Some(left);
                return true;
            }
        }
        false
    }

    let mut right_owner = vec![None; n_right];
    for left in 0..edges.len() {
        let mut visited = vec![false; n_right];
        augment(left, edges, &mut visited, &mut right_owner);
    }

    let mut assignment = vec![None; edges.len()];
    right_owner
        .iter()
        .enumerate()
        .filter_map(|(right, owner)| Some((right, (*owner)?)))
        .for_each(|(right, left)| assignment[left] = Some(right));
    assignment
}

/// Marks chairs as occupied by nearby people.
#[derive(Debug, Clone)]
pub struct ProximityMatcher {
    pub distance_threshold: R64,
    pub strategy: MatchStrategy,
}

impl ProximityMatcher {
    pub fn new(distance_threshold: R64, strategy: MatchStrategy) -> Self {
        Self {
            distance_threshold,
            strategy,
        }
    }

    /// Indices of chairs whose center is strictly closer than the threshold to a
    /// matched person's center.
    pub fn occupied_chairs<C, P>(&self, chairs: &[C], people: &[P]) -> Vec<usize>
    where
        C: Rect<Type = R64>,
        P: Rect<Type = R64>,
    {
        let threshold = self.distance_threshold;
        self.strategy
            .match_pairs(chairs.len(), people.len(), |chair, person| {
                chairs[chair].center_distance_to(&people[person]) < threshold
            })
            .into_iter()
            .positions(|matched| matched.is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(xyxy: [f64; 4]) -> XYXY<R64> {
        let [x1, y1, x2, y2] = xyxy;
        XYXY::from_xyxy([r64(x1), r64(y1), r64(x2), r64(y2)])
    }

    #[test]
    fn greedy_takes_first_candidate() {
        let pairs = MatchStrategy::GreedyFirstMatch.match_pairs(3, 2, |_, _| true);
        assert_eq!(pairs, vec![Some(0), Some(0), Some(0)]);
    }

    #[test]
    fn bipartite_is_one_to_one() {
        let pairs = MatchStrategy::MaximumBipartite.match_pairs(3, 2, |_, _| true);
        assert_eq!(pairs, vec![Some(0), Some(1), None]);
    }

    #[test]
    fn bipartite_reassigns_along_augmenting_path() {
        // left 0 accepts {0, 1}, left 1 accepts {0} only
        let accept = |left: usize, right: usize| left == 0 || right == 0;
        let greedy = MatchStrategy::GreedyFirstMatch.match_pairs(2, 2, accept);
        let optimal = MatchStrategy::MaximumBipartite.match_pairs(2, 2, accept);

        assert_eq!(greedy, vec![Some(0), Some(0)]);
        assert_eq!(optimal, vec![Some(1), Some(0)]);
    }

    #[test]
    fn one_chair_one_nearby_person() {
        let matcher = ProximityMatcher::new(r64(150.0), MatchStrategy::GreedyFirstMatch);
        let chairs = [rect([0.0, 0.0, 10.0, 10.0])];
        let people = [rect([5.0, 5.0, 15.0, 15.0])];
        assert_eq!(matcher.occupied_chairs(&chairs, &people), vec![0]);
    }

    #[test]
    fn far_chair_stays_free() {
        let matcher = ProximityMatcher::new(r64(150.0), MatchStrategy::GreedyFirstMatch);
        let chairs = [
            rect([0.0, 0.0, 10.0, 10.0]),
            rect([1000.0, 1000.0, 1010.0, 1010.0]),
        ];
        let people = [rect([5.0, 5.0, 15.0, 15.0])];
        assert_eq!(matcher.occupied_chairs(&chairs, &people), vec![0]);
    }

    #[test]
    fn distance_equal_to_threshold_is_free() {
        // centers (5, 5) and (105, 5) are exactly 100px apart
        let chairs = [rect([0.0, 0.0, 10.0, 10.0])];
        let people = [rect([100.0, 0.0, 110.0, 10.0])];

        let at_threshold = ProximityMatcher::new(r64(100.0), MatchStrategy::GreedyFirstMatch);
        assert!(at_threshold.occupied_chairs(&chairs, &people).is_empty());

        let above = ProximityMatcher::new(r64(100.5), MatchStrategy::GreedyFirstMatch);
        assert_eq!(above.occupied_chairs(&chairs, &people), vec![0]);
    }

    #[test]
    fn one_person_near_two_chairs() {
        let chairs = [rect([0.0, 0.0, 10.0, 10.0]), rect([20.0, 0.0, 30.0, 10.0])];
        let people = [rect([10.0, 0.0, 20.0, 10.0])];

        let greedy = ProximityMatcher::new(r64(150.0), MatchStrategy::GreedyFirstMatch);
        assert_eq!(greedy.occupied_chairs(&chairs, &people), vec![0, 1]);

        let bipartite = ProximityMatcher::new(r64(150.0), MatchStrategy::MaximumBipartite);
        assert_eq!(bipartite.occupied_chairs(&chairs, &people), vec![0]);
    }

    #[test]
    fn no_people_means_no_occupied_chairs() {
        let matcher = ProximityMatcher::new(r64(150.0), MatchStrategy::MaximumBipartite);
        let people: [XYXY<R64>; 0] = [];
        assert!(matcher
            .occupied_chairs(&[rect([0.0, 0.0, 10.0, 10.0])], &people)
            .is_empty());
    }
}
