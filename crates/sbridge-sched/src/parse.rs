use sbridge_domain::{SchedulerNode, StateFlags};

fn csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "(null)")
        .map(String::from)
        .collect()
}

/// Parse `scontrol show nodes` output: multi-line records of
/// whitespace-separated `Key=Value` tokens, one record per `NodeName=`.
///
/// Values containing spaces (free-text reasons) are truncated at the
/// first space, matching how the records have always been consumed.
pub fn parse_show_nodes(stdout: &str) -> Vec<SchedulerNode> {
    let mut nodes = Vec::new();
    let mut current: Option<SchedulerNode> = None;

    for line in stdout.lines() {
        for token in line.split_whitespace() {
            let Some((key, value)) = token.split_once('=') else {
                continue;
            };
            if key == "NodeName" {
                if let Some(node) = current.take() {
                    nodes.push(node);
                }
                current = Some(SchedulerNode {
                    name: value.to_string(),
                    ..Default::default()
                });
                continue;
            }
            let Some(node) = current.as_mut() else {
                continue;
            };
            match key {
                "State" => node.state = StateFlags::parse(value),
                "Reason" => {
                    node.reason = if value == "(null)" { String::new() } else { value.to_string() }
                }
                "NodeAddr" => node.node_addr = Some(value.to_string()),
                "NodeHostName" => node.node_host_name = Some(value.to_string()),
                "AvailableFeatures" | "ActiveFeatures" | "Features" => {
                    if node.features.is_empty() {
                        node.features = csv(value);
                    }
                }
                "Partitions" => node.partitions = csv(value),
                _ => {}
            }
        }
    }
    if let Some(node) = current {
        nodes.push(node);
    }
    nodes
}
