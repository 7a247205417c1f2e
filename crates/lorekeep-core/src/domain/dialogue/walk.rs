//! Weighted random walks
//!
//! Roulette-wheel selection over outgoing continuations. `NEXT` counts with weight
//! 1.0, `BRANCH_TO` with its stored (clamped) weight.

use std::collections::HashMap;

use rand::Rng;

use super::relation::Relation;
use super::traversal::GraphView;

/// A candidate continuation and its sampling weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate<'a> {
    pub to: &'a str,
    pub weight: f64,
}

/// Pick one candidate with probability proportional to its weight
///
/// Returns the first candidate whose cumulative weight meets or exceeds the
/// draw, or the last one if floating-point error leaves the draw uncovered.
pub fn roulette_select<'a, R: Rng + ?Sized>(
    candidates: &[Candidate<'a>],
    rng: &mut R,
) -> Option<Candidate<'a>> {
    let total: f64 = candidates.iter().map(|c| c.weight).sum();
    if candidates.is_empty() || !total.is_finite() || total <= 0.0 {
        return candidates.first().copied();
    }

    let draw = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for candidate in candidates {
        cumulative += candidate.weight;
        if cumulative >= draw {
            return Some(*candidate);
        }
    }
    candidates.last().copied()
}

/// Outgoing continuations keyed by source id, in relation order
pub fn continuations(relations: &[Relation]) -> HashMap<&str, Vec<Candidate<'_>>> {
    let mut out: HashMap<&str, Vec<Candidate<'_>>> = HashMap::new();
    for relation in relations {
        out.entry(relation.from.as_str()).or_default().push(Candidate {
            to: relation.to.as_str(),
            weight: relation.sampling_weight(),
        });
    }
    out
}

/// Walk from `start` for at most `max_steps` steps
///
/// The returned ids include `start`. The walk ends early at a node without
/// continuations; revisits are allowed.
pub fn weighted_walk<R: Rng + ?Sized>(
    view: &GraphView,
    start: &str,
    max_steps: u32,
    rng: &mut R,
) -> Vec<String> {
    let edges = continuations(&view.relations);
    let mut path = vec![start.to_string()];
    let mut current = start;

    for _ in 0..max_steps {
        let Some(candidates) = edges.get(current) else {
            break;
        };
        let Some(chosen) = roulette_select(candidates, rng) else {
            break;
        };
        path.push(chosen.to.to_string());
        current = chosen.to;
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dialogue::relation::RelationType;
    use crate::domain::dialogue::utterance::{NewUtterance, Utterance};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn node(id: &str) -> Utterance {
        let mut u = Utterance::create(NewUtterance::new(id));
        u.id = id.to_string();
        u
    }

    fn forked_view() -> GraphView {
        GraphView {
            nodes: vec![node("a"), node("b"), node("c")],
            relations: vec![Relation::branch("a", "b", 1.0), Relation::branch("a", "c", 3.0)],
        }
    }

    #[test]
    fn test_roulette_single_candidate() {
        let mut rng = StdRng::seed_from_u64(7);
        let candidates = [Candidate { to: "only", weight: 0.01 }];
        for _ in 0..100 {
            assert_eq!(roulette_select(&candidates, &mut rng).unwrap().to, "only");
        }
        assert!(roulette_select(&[], &mut rng).is_none());
    }

    #[test]
    fn test_weighted_walk_follows_weights() {
        let view = forked_view();
        let mut rng = StdRng::seed_from_u64(42);
        let mut picked_c = 0;
        let runs = 10_000;

        for _ in 0..runs {
            let path = weighted_walk(&view, "a", 1, &mut rng);
            assert_eq!(path.len(), 2);
            if path[1] == "c" {
                picked_c += 1;
            }
        }

        // Expected 7500 (3:1 odds); the band is roughly seven standard deviations wide
        assert!((7200..=7800).contains(&picked_c), "picked c {} times", picked_c);
    }

    #[test]
    fn test_weighted_walk_stops_at_leaf() {
        let view = GraphView {
            nodes: vec![node("a"), node("b")],
            relations: vec![Relation::new("a", "b", RelationType::Next)],
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(weighted_walk(&view, "a", 20, &mut rng), vec!["a", "b"]);
    }

    #[test]
    fn test_weighted_walk_respects_max_steps_on_cycle() {
        let view = GraphView {
            nodes: vec![node("a"), node("b")],
            relations: vec![
                Relation::new("a", "b", RelationType::Next),
                Relation::new("b", "a", RelationType::Next),
            ],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let path = weighted_walk(&view, "a", 5, &mut rng);
        assert_eq!(path, vec!["a", "b", "a", "b", "a", "b"]);
    }

    #[test]
    fn test_same_seed_same_walk() {
        let view = forked_view();
        let first = weighted_walk(&view, "a", 1, &mut StdRng::seed_from_u64(99));
        let second = weighted_walk(&view, "a", 1, &mut StdRng::seed_from_u64(99));
        assert_eq!(first, second);
    }
}
