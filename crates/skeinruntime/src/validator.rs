use skeincore::{NodeKind, ValidationError, Workflow};
use std::collections::{HashMap, HashSet};

/// Structural checks on a workflow document, in order: unique ids,
/// reference integrity of edges, input nodes without upstreams, then
/// acyclicity.
///
/// Pure and idempotent; runs before execution start and before accepting
/// generator output. Disconnected nodes are legal.
pub fn validate(workflow: &Workflow) -> Result<(), ValidationError> {
    let mut node_ids: HashSet<&str> = HashSet::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }

    let mut edge_ids: HashSet<&str> = HashSet::with_capacity(workflow.edges.len());
    for edge in &workflow.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            return Err(ValidationError::DuplicateEdgeId(edge.id.clone()));
        }
        if !node_ids.contains(edge.source.as_str()) {
            return Err(ValidationError::DanglingEdge {
                edge_id: edge.id.clone(),
                node_id: edge.source.clone(),
            });
        }
        if !node_ids.contains(edge.target.as_str()) {
            return Err(ValidationError::DanglingEdge {
                edge_id: edge.id.clone(),
                node_id: edge.target.clone(),
            });
        }
    }

    for node in &workflow.nodes {
        if node.kind == NodeKind::Input
            && workflow.edges.iter().any(|e| e.target == node.id)
        {
            return Err(ValidationError::InputHasUpstream(node.id.clone()));
        }
    }

    check_acyclic(workflow)
}

/// Depth-first traversal with a visit set and an in-stack set; any edge
/// into the in-stack set is a back-edge and therefore a cycle.
fn check_acyclic(workflow: &Workflow) -> Result<(), ValidationError> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &workflow.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    enum Frame<'a> {
        Enter(&'a str),
        Exit(&'a str),
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut in_stack: HashSet<&str> = HashSet::new();
    let mut stack: Vec<Frame> = Vec::new();

    for node in &workflow.nodes {
        if visited.contains(node.id.as_str()) {
            continue;
        }
        stack.push(Frame::Enter(node.id.as_str()));

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    if visited.contains(id) {
                        continue;
                    }
                    visited.insert(id);
                    in_stack.insert(id);
                    stack.push(Frame::Exit(id));

                    if let Some(next) = adjacency.get(id) {
                        for &target in next {
                            if in_stack.contains(target) {
                                return Err(ValidationError::CycleDetected {
                                    node_id: target.to_string(),
                                });
                            }
                            if !visited.contains(target) {
                                stack.push(Frame::Enter(target));
                            }
                        }
                    }
                }
                Frame::Exit(id) => {
                    in_stack.remove(id);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skeincore::{InputData, Node, NodeData, PassthroughData, Workflow};

    fn passthrough(id: &str) -> Node {
        Node::new(id, id.to_uppercase(), NodeData::Merge(PassthroughData::default()))
    }

    fn graph(nodes: &[&str], edges: &[(&str, &str)]) -> Workflow {
        let mut wf = Workflow::new("wf", "test");
        for id in nodes {
            wf.add_node(passthrough(id));
        }
        for (source, target) in edges {
            wf.connect(*source, *target);
        }
        wf
    }

    #[test]
    fn accepts_a_dag_with_disconnected_nodes() {
        let wf = graph(&["a", "b", "c", "island"], &[("a", "b"), ("b", "c")]);
        assert!(validate(&wf).is_ok());
    }

    #[test]
    fn rejects_dangling_edge_naming_the_missing_endpoint() {
        let mut wf = graph(&["a", "b"], &[("a", "b")]);
        wf.connect("b", "ghost");
        match validate(&wf) {
            Err(ValidationError::DanglingEdge { node_id, .. }) => assert_eq!(node_id, "ghost"),
            other => panic!("expected DanglingEdge, got {:?}", other),
        }
    }

    #[test]
    fn rejects_cycle() {
        let wf = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c"), ("c", "b")]);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::CycleDetected { .. })
        ));
    }

    #[test]
    fn rejects_self_loop() {
        let wf = graph(&["a"], &[("a", "a")]);
        assert!(matches!(
            validate(&wf),
            Err(ValidationError::CycleDetected { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_node_id() {
        let mut wf = Workflow::new("wf", "test");
        wf.add_node(passthrough("a"));
        wf.add_node(passthrough("a"));
        assert_eq!(
            validate(&wf),
            Err(ValidationError::DuplicateNodeId("a".to_string()))
        );
    }

    #[test]
    fn rejects_input_with_upstream() {
        let mut wf = Workflow::new("wf", "test");
        wf.add_node(passthrough("a"));
        wf.add_node(Node::new("in", "In", NodeData::Input(InputData::default())));
        wf.connect("a", "in");
        assert_eq!(
            validate(&wf),
            Err(ValidationError::InputHasUpstream("in".to_string()))
        );
    }
}
