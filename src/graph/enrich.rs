//! Relation enrichment (pipeline stage C5).
//!
//! Scans every metadata value on every node for references to other
//! known nodes and adds the edges the planner graph missed. Direction
//! follows the reverse-arrow table; references inside `depends_on`
//! blocks never produce outgoing arrows; hidden endpoints drop the
//! edge; and implied-connection keywords substitute the first known
//! node of the implied type.

use crate::graph::ids;
use crate::provider::ProviderContext;
use crate::types::TfData;

/// Characters stripped from reference strings before matching.
const CLEANUP: &[char] = &[
    '\\', '`', '*', '{', '}', '(', ')', '>', '!', '$', '\'', '"', ',', '[', ']',
];

fn cleanup(text: &str) -> String {
    text.replace(CLEANUP, " ")
}

/// Run the enrichment pass.
pub fn run(tfdata: &mut TfData, ctx: &ProviderContext) {
    let visible = tfdata.node_list.len().saturating_sub(tfdata.hidden.len());
    tracing::info!(
        visible = visible,
        total = tfdata.node_list.len(),
        "computing relations between resources"
    );

    let nodes = tfdata.node_list.clone();
    let mut new_edges: Vec<(String, String)> = Vec::new();

    for source in &nodes {
        if tfdata.hidden.contains(source) {
            continue;
        }
        let Some(meta) = tfdata.meta_data.get(source) else {
            continue;
        };

        for (key, value) in meta {
            let mut leaves = Vec::new();
            value.string_leaves(&mut leaves);
            let from_depends_on = key == "depends_on";

            for leaf in leaves {
                let reference = cleanup(leaf);
                if reference.trim().is_empty() {
                    continue;
                }
                let mut matches: Vec<&String> = nodes
                    .iter()
                    .filter(|candidate| {
                        *candidate != source
                            && reference.contains(ids::strip_suffix(ids::strip_module(candidate)))
                    })
                    .collect();

                // No direct match: try the implied-connection keywords.
                if matches.is_empty() && !from_depends_on {
                    for (keyword, implied_type) in ctx.implied_connections {
                        if !key.contains(keyword) && !reference.contains(keyword) {
                            continue;
                        }
                        if let Some(implied) = nodes
                            .iter()
                            .find(|n| ids::strip_module(n).starts_with(implied_type))
                        {
                            matches.push(implied);
                            break;
                        }
                    }
                }

                for matched in matches {
                    if tfdata.hidden.contains(matched) || tfdata.hidden.contains(source) {
                        continue;
                    }
                    // depends_on never creates an outgoing arrow from the
                    // declaring resource.
                    if from_depends_on {
                        continue;
                    }

                    if let Some((parent, child)) =
                        directed(ctx, source, matched, &reference)
                    {
                        new_edges.push((parent, child));
                    }
                }
            }
        }
    }

    for (parent, child) in new_edges {
        if parent == child {
            continue;
        }
        tracing::debug!(parent = %parent, child = %child, "relation");
        tfdata.graphdict.add_edge(&parent, &child);
    }
}

/// Pick edge direction for one discovered reference.
///
/// Default is source -> matched. The reverse-arrow table flips it when
/// the *referenced* text matches; when both ends match, the entry
/// earlier in the table is the outer context and wins.
fn directed(
    ctx: &ProviderContext,
    source: &str,
    matched: &str,
    reference: &str,
) -> Option<(String, String)> {
    let origin_rank = ctx.reverse_arrow_rank(reference);
    let dest_rank = ctx.reverse_arrow_rank(ids::strip_module(source));

    let reverse = match (origin_rank, dest_rank) {
        (Some(origin), Some(dest)) => dest >= origin,
        (Some(_), None) => true,
        _ => false,
    };

    if reverse {
        Some((matched.to_string(), source.to_string()))
    } else {
        Some((source.to_string(), matched.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider;
    use crate::types::{AttrValue, Metadata};
    use pretty_assertions::assert_eq;

    fn tfdata_with(nodes: &[&str]) -> TfData {
        let mut tfdata = TfData::default();
        for node in nodes {
            tfdata.node_list.push((*node).to_string());
            tfdata.graphdict.add_node(*node);
            tfdata.meta_data.insert((*node).to_string(), Metadata::new());
        }
        tfdata
    }

    fn set_meta(tfdata: &mut TfData, node: &str, key: &str, value: &str) {
        tfdata
            .meta_data
            .get_mut(node)
            .unwrap()
            .insert(key.to_string(), AttrValue::from(value));
    }

    #[test]
    fn test_reference_creates_edge() {
        let mut tfdata = tfdata_with(&["aws_instance.web", "aws_sqs_queue.jobs"]);
        set_meta(
            &mut tfdata,
            "aws_instance.web",
            "queue_url",
            "${aws_sqs_queue.jobs.id}",
        );
        run(&mut tfdata, &provider::aws::context());
        assert_eq!(
            tfdata.graphdict.children("aws_instance.web"),
            ["aws_sqs_queue.jobs"]
        );
    }

    #[test]
    fn test_reference_to_container_reverses() {
        let mut tfdata = tfdata_with(&["aws_instance.web", "aws_subnet.a"]);
        set_meta(
            &mut tfdata,
            "aws_instance.web",
            "subnet_id",
            "${aws_subnet.a.id}",
        );
        run(&mut tfdata, &provider::aws::context());
        // Subnet contains instance, not the other way around.
        assert_eq!(
            tfdata.graphdict.children("aws_subnet.a"),
            ["aws_instance.web"]
        );
        assert!(tfdata.graphdict.children("aws_instance.web").is_empty());
    }

    #[test]
    fn test_outer_context_wins_when_both_reverse() {
        // A subnet referencing its VPC: both are in the reverse table,
        // but the VPC is listed earlier (more outer), so VPC -> subnet.
        let mut tfdata = tfdata_with(&["aws_subnet.a", "aws_vpc.main"]);
        set_meta(&mut tfdata, "aws_subnet.a", "vpc_id", "${aws_vpc.main.id}");
        run(&mut tfdata, &provider::aws::context());
        assert_eq!(tfdata.graphdict.children("aws_vpc.main"), ["aws_subnet.a"]);
    }

    #[test]
    fn test_depends_on_produces_no_edge() {
        let mut tfdata = tfdata_with(&["aws_instance.web", "aws_sqs_queue.jobs"]);
        set_meta(
            &mut tfdata,
            "aws_instance.web",
            "depends_on",
            "aws_sqs_queue.jobs",
        );
        run(&mut tfdata, &provider::aws::context());
        assert!(tfdata.graphdict.children("aws_instance.web").is_empty());
        assert!(tfdata.graphdict.children("aws_sqs_queue.jobs").is_empty());
    }

    #[test]
    fn test_hidden_endpoint_drops_edge() {
        let mut tfdata = tfdata_with(&["aws_instance.web", "aws_sqs_queue.jobs"]);
        set_meta(
            &mut tfdata,
            "aws_instance.web",
            "queue_url",
            "${aws_sqs_queue.jobs.id}",
        );
        tfdata.hidden.insert("aws_sqs_queue.jobs".to_string());
        run(&mut tfdata, &provider::aws::context());
        assert!(tfdata.graphdict.children("aws_instance.web").is_empty());
    }

    #[test]
    fn test_implied_connection_keyword() {
        let mut tfdata = tfdata_with(&["aws_lb_listener.https", "aws_acm_certificate.cert"]);
        set_meta(
            &mut tfdata,
            "aws_lb_listener.https",
            "certificate_arn",
            "arn:aws:acm:us-east-1:123:certificate/abc",
        );
        run(&mut tfdata, &provider::aws::context());
        assert_eq!(
            tfdata.graphdict.children("aws_lb_listener.https"),
            ["aws_acm_certificate.cert"]
        );
    }

    #[test]
    fn test_enrichment_is_idempotent() {
        let mut tfdata = tfdata_with(&["aws_instance.web", "aws_sqs_queue.jobs"]);
        set_meta(
            &mut tfdata,
            "aws_instance.web",
            "queue_url",
            "${aws_sqs_queue.jobs.id}",
        );
        let ctx = provider::aws::context();
        run(&mut tfdata, &ctx);
        let snapshot = tfdata.graphdict.clone();
        run(&mut tfdata, &ctx);
        assert_eq!(tfdata.graphdict, snapshot);
    }
}
