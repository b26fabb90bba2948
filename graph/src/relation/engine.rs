use super::cache::RelationCache;
use crate::core::CommitLookup;
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Towards descendants (newer commits)
    Up,
    /// Towards parents (older commits)
    Down,
}

#[derive(Debug, Clone, Copy)]
struct Step<'a> {
    id: &'a str,
    /// Whether cached answers may be read and written for this entry
    cache_enabled: bool,
    /// Index of the step this one was reached from
    prev: Option<usize>,
}

/// Whether `target_id` is an ancestor of, a descendant of, or equal to
/// `active_id`.
///
/// Commit times bound the search: from an older target only descendants up to
/// the active time are followed, from a newer target only parents down to it.
/// Commits sharing the active time are explored without trusting or writing
/// negative answers, since their own relation may not be settled yet.
/// Unknown ids are treated as having no edges.
pub fn is_related<G>(active_id: &str, cache: &mut RelationCache, graph: &G, target_id: &str) -> bool
where
    G: CommitLookup + ?Sized,
{
    if target_id == active_id {
        return true;
    }
    if let Some(related) = cache.get(target_id) {
        return related;
    }

    let (Some(active), Some(target)) = (graph.node(active_id), graph.node(target_id)) else {
        return false;
    };
    let search = Search {
        graph,
        active_id,
        active_time: active.time,
    };

    let related = match target.time.cmp(&active.time) {
        Ordering::Less => search.run(cache, target_id, Direction::Up, true),
        Ordering::Greater => search.run(cache, target_id, Direction::Down, true),
        Ordering::Equal => {
            search.run(cache, target_id, Direction::Up, false)
                || search.run(cache, target_id, Direction::Down, false)
        }
    };
    tracing::trace!(active_id, target_id, related, cached = cache.len(), "relation resolved");
    related
}

struct Search<'a, G: ?Sized> {
    graph: &'a G,
    active_id: &'a str,
    active_time: i64,
}

impl<'a, G: CommitLookup + ?Sized> Search<'a, G> {
    /// Breadth-first walk from `start` in `direction`, bounded by the active
    /// commit's time.
    fn run(&self, cache: &mut RelationCache, start: &'a str, direction: Direction, cache_enabled: bool) -> bool {
        if let Some(related) = cache.get(start) {
            return related;
        }

        let graph: &'a G = self.graph;
        let mut visited: HashSet<&str> = HashSet::new();
        let mut to_visit = vec![Step {
            id: start,
            cache_enabled,
            prev: None,
        }];

        let mut index = 0;
        while index < to_visit.len() {
            let step = to_visit[index];
            let current = index;
            index += 1;

            if !visited.insert(step.id) {
                continue;
            }
            if step.id == self.active_id {
                mark_found(cache, &to_visit, step.prev);
                return true;
            }
            if step.cache_enabled {
                match cache.get(step.id) {
                    Some(true) => {
                        mark_found(cache, &to_visit, step.prev);
                        return true;
                    }
                    Some(false) => continue,
                    None => {}
                }
            }

            let Some(node) = graph.node(step.id) else {
                continue;
            };
            let neighbours = match direction {
                Direction::Up => node.descendant_ids.as_slice(),
                Direction::Down => node.parent_ids.as_slice(),
            };
            for next_id in neighbours {
                let Some(next) = graph.node(next_id) else {
                    continue;
                };
                let in_window = match direction {
                    Direction::Up => next.time <= self.active_time,
                    Direction::Down => next.time >= self.active_time,
                };
                if in_window {
                    to_visit.push(Step {
                        id: next.id.as_str(),
                        cache_enabled: step.cache_enabled && next.time != self.active_time,
                        prev: Some(current),
                    });
                }
            }
        }

        for step in to_visit.iter().filter(|step| step.cache_enabled) {
            cache.mark(step.id, false);
        }
        false
    }
}

/// Mark every step on the chain ending at `prev` as related
fn mark_found(cache: &mut RelationCache, steps: &[Step<'_>], mut prev: Option<usize>) {
    while let Some(index) = prev {
        cache.mark(steps[index].id, true);
        prev = steps[index].prev;
    }
}
