use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::state::GraphState;

/// Terminal pseudo-node. Reaching it completes the machine.
pub const END: &str = "__end__";

/// Maps state to a branch key. An `Err` carries the offending discriminant.
pub type Router = Arc<dyn Fn(&GraphState) -> Result<String, String> + Send + Sync>;

/// Outgoing transition of a node.
#[derive(Clone)]
pub enum Transition {
    /// Always go to this node.
    Next(String),
    /// Evaluate the router and follow the matching branch.
    Route {
        router: Router,
        branches: BTreeMap<String, String>,
    },
}

impl Transition {
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Self::Next(to) => vec![to.as_str()],
            Self::Route { branches, .. } => branches.values().map(String::as_str).collect(),
        }
    }

    /// Resolve the next node for `state`. `Err` holds the discriminant that
    /// matched no branch.
    pub fn resolve(&self, state: &GraphState) -> Result<String, String> {
        match self {
            Self::Next(to) => Ok(to.clone()),
            Self::Route { router, branches } => {
                let key = router(state)?;
                branches.get(&key).cloned().ok_or(key)
            }
        }
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next(to) => f.debug_tuple("Next").field(to).finish(),
            Self::Route { branches, .. } => f.debug_struct("Route").field("branches", branches).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::state::StateSchema;
    use serde_json::{json, Map};

    fn state(flag: &str) -> GraphState {
        let mut input = Map::new();
        input.insert("flag".into(), json!(flag));
        StateSchema::new()
            .overwrite("flag", json!(""))
            .initial_state(input)
            .unwrap()
    }

    #[test]
    fn route_follows_matching_branch() {
        let t = Transition::Route {
            router: Arc::new(|s: &GraphState| Ok(s.get_str("flag").unwrap_or_default().to_string())),
            branches: BTreeMap::from([
                ("yes".to_string(), "a".to_string()),
                ("no".to_string(), END.to_string()),
            ]),
        };
        assert_eq!(t.resolve(&state("yes")).unwrap(), "a");
        assert_eq!(t.resolve(&state("no")).unwrap(), END);
        assert_eq!(t.resolve(&state("maybe")).unwrap_err(), "maybe");
    }

    #[test]
    fn next_is_unconditional() {
        let t = Transition::Next("b".into());
        assert_eq!(t.resolve(&state("anything")).unwrap(), "b");
        assert_eq!(t.targets(), vec!["b"]);
    }
}
