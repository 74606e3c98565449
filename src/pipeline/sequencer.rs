//! Component ordering.
//!
//! Components run in `position` order, except that a component declaring
//! a `predecessorId` never runs before that predecessor. The order is a
//! topological sort (Kahn) over predecessor links with ready components
//! taken by `(position, id)`.

use crate::block::ComponentDef;
use crate::error::{Violation, ViolationKind};
use crate::model::ComponentId;
use std::collections::{BTreeMap, BTreeSet};

/// Returns indices into `components` in execution order.
pub fn order_components(components: &[ComponentDef]) -> Result<Vec<usize>, Vec<Violation>> {
    let mut violations = Vec::new();
    let mut by_id: BTreeMap<ComponentId, usize> = BTreeMap::new();
    for (i, c) in components.iter().enumerate() {
        if by_id.insert(c.id, i).is_some() {
            violations.push(order_violation(c.id, format!("duplicate component id {}", c.id)));
        }
    }

    let mut indegree = vec![0usize; components.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); components.len()];
    for (i, c) in components.iter().enumerate() {
        let Some(pred) = c.predecessor_id else {
            continue;
        };
        match by_id.get(&pred) {
            Some(&p) if p == i => violations.push(order_violation(
                c.id,
                "component is its own predecessor".to_string(),
            )),
            Some(&p) => {
                successors[p].push(i);
                indegree[i] += 1;
            }
            None => violations.push(order_violation(
                c.id,
                format!("predecessor {pred} does not exist"),
            )),
        }
    }
    if !violations.is_empty() {
        return Err(violations);
    }

    let key = |i: usize| (components[i].position, components[i].id, i);
    let mut ready: BTreeSet<(i32, ComponentId, usize)> = (0..components.len())
        .filter(|&i| indegree[i] == 0)
        .map(key)
        .collect();
    let mut order = Vec::with_capacity(components.len());

    while let Some(next) = ready.pop_first() {
        let i = next.2;
        order.push(i);
        for &s in &successors[i] {
            indegree[s] -= 1;
            if indegree[s] == 0 {
                ready.insert(key(s));
            }
        }
    }

    if order.len() < components.len() {
        let stuck: Vec<_> = (0..components.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| components[i].id)
            .collect();
        return Err(stuck
            .into_iter()
            .map(|id| order_violation(id, "component is part of a predecessor cycle".to_string()))
            .collect());
    }

    Ok(order)
}

fn order_violation(id: ComponentId, message: String) -> Violation {
    Violation::new(ViolationKind::ComponentOrder, message).in_component(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(id: ComponentId, position: i32, predecessor_id: Option<ComponentId>) -> ComponentDef {
        ComponentDef {
            id,
            name: String::new(),
            position,
            predecessor_id,
            chain: Vec::new(),
        }
    }

    fn ids(components: &[ComponentDef]) -> Vec<ComponentId> {
        order_components(components)
            .unwrap()
            .into_iter()
            .map(|i| components[i].id)
            .collect()
    }

    #[test]
    fn test_position_order() {
        let cs = [component(1, 2, None), component(2, 0, None), component(3, 1, None)];
        assert_eq!(ids(&cs), vec![2, 3, 1]);
    }

    #[test]
    fn test_predecessor_overrides_position() {
        let cs = [component(1, 0, Some(2)), component(2, 5, None), component(3, 1, None)];
        assert_eq!(ids(&cs), vec![3, 2, 1]);
    }

    #[test]
    fn test_equal_positions_tie_by_id() {
        let cs = [component(9, 0, None), component(4, 0, None)];
        assert_eq!(ids(&cs), vec![4, 9]);
    }

    #[test]
    fn test_cycle_and_unknown_rejected() {
        let cycle = [component(1, 0, Some(2)), component(2, 1, Some(1))];
        let err = order_components(&cycle).unwrap_err();
        assert_eq!(err.len(), 2);
        assert!(err.iter().all(|v| v.kind == ViolationKind::ComponentOrder));

        let unknown = [component(1, 0, Some(42))];
        assert_eq!(order_components(&unknown).unwrap_err()[0].component_id, Some(1));

        let own = [component(1, 0, Some(1))];
        assert!(order_components(&own).is_err());
    }
}
