//! Debug exports of the final graph.
//!
//! The renderer proper consumes the TfData JSON document; these exports
//! exist for quick inspection of the pipeline output without a renderer
//! round trip.

use crate::error::Result;
use crate::graph::Graph;
use crate::types::OutputFormat;
use petgraph::dot::{Config, Dot};
use petgraph::graph::DiGraph;
use std::collections::BTreeMap;

/// Render the graph in the requested debug format. `Json` callers
/// should serialize the whole `TfData` instead; here it falls back to
/// the adjacency map alone.
pub fn export_graph(graph: &Graph, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Dot => Ok(export_dot(graph)),
        OutputFormat::Mermaid => Ok(export_mermaid(graph)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(graph)?),
    }
}

fn to_petgraph(graph: &Graph) -> DiGraph<String, ()> {
    let mut pg: DiGraph<String, ()> = DiGraph::new();
    let mut indices = BTreeMap::new();
    for (node, _) in graph.iter() {
        let index = pg.add_node(node.clone());
        indices.insert(node.clone(), index);
    }
    for (node, children) in graph.iter() {
        for child in children {
            if let (Some(&a), Some(&b)) = (indices.get(node), indices.get(child)) {
                pg.add_edge(a, b, ());
            }
        }
    }
    pg
}

/// Graphviz DOT via petgraph's exporter.
fn export_dot(graph: &Graph) -> String {
    let pg = to_petgraph(graph);
    format!(
        "{:?}",
        Dot::with_config(&pg, &[Config::EdgeNoLabel])
    )
}

/// Mermaid flowchart, top-down.
fn export_mermaid(graph: &Graph) -> String {
    let mut out = String::from("flowchart TD\n");
    for (node, children) in graph.iter() {
        if children.is_empty() {
            out.push_str(&format!("    {}\n", mermaid_id(node)));
        }
        for child in children {
            out.push_str(&format!(
                "    {}[\"{}\"] --> {}[\"{}\"]\n",
                mermaid_id(node),
                node,
                mermaid_id(child),
                child
            ));
        }
    }
    out
}

fn mermaid_id(node: &str) -> String {
    node.replace(['.', '~', '-'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Graph {
        let mut graph = Graph::new();
        graph.add_edge("aws_vpc.main", "aws_subnet.a");
        graph.add_edge("aws_subnet.a", "aws_instance.web~1");
        graph
    }

    #[test]
    fn test_dot_contains_nodes_and_edges() {
        let dot = export_graph(&sample(), OutputFormat::Dot).unwrap();
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("aws_vpc.main"));
        assert!(dot.contains("->"));
    }

    #[test]
    fn test_mermaid_shape() {
        let mermaid = export_graph(&sample(), OutputFormat::Mermaid).unwrap();
        assert!(mermaid.starts_with("flowchart TD"));
        assert!(mermaid.contains("aws_vpc_main[\"aws_vpc.main\"] --> aws_subnet_a[\"aws_subnet.a\"]"));
    }

    #[test]
    fn test_json_roundtrip() {
        let json = export_graph(&sample(), OutputFormat::Json).unwrap();
        let parsed: Graph = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample());
    }
}
