use regex::Regex;

use crate::error::TopologyError;

struct BlockInfo {
    index: usize,
    size: usize,
    group_id: String,
    nodes: Vec<String>,
    commented: bool,
}

/// Best grid shape for a block: the divisor pair of `max_block_size`
/// closest to square, taller than wide.
fn grid_shape(max_block_size: u32) -> (u32, u32) {
    let mut best_rows = max_block_size;
    let mut best_cols = 1u32;
    let mut min_diff = max_block_size.saturating_sub(1);
    for cols in 1..=max_block_size {
        if max_block_size % cols == 0 {
            let rows = max_block_size / cols;
            let diff = rows.abs_diff(cols);
            if diff < min_diff || (diff == min_diff && cols > best_cols) {
                best_rows = rows;
                best_cols = cols;
                min_diff = diff;
            }
        }
    }
    if best_rows < best_cols {
        std::mem::swap(&mut best_rows, &mut best_cols);
    }
    (best_rows, best_cols)
}

fn center(text: &str, width: usize) -> String {
    if text.len() >= width {
        return text.to_string();
    }
    let pad = width - text.len();
    let left = pad / 2;
    format!("{}{}{}", " ".repeat(left), text, " ".repeat(pad - left))
}

/// Render a block topology file as an ASCII grid per block, for
/// operator review. Pure function of the emitted file text.
pub fn visualize_block(
    topology: &str,
    min_block_size: u32,
    max_block_size: u32,
) -> Result<String, TopologyError> {
    if max_block_size == 0 {
        return Err(TopologyError::InvalidBlockSize);
    }

    let pattern = Regex::new(
        r"# Number of Nodes in block(\d+): (\d+)\n# ClusterUUID and CliqueID: (.*)\n(?:# Warning:.*\n){0,2}(#?BlockName=block\d+ Nodes=([^\n]+))",
    )
    .expect("static pattern");

    let mut blocks: Vec<BlockInfo> = Vec::new();
    for caps in pattern.captures_iter(topology) {
        let block_line = caps.get(4).map_or("", |m| m.as_str());
        blocks.push(BlockInfo {
            index: caps[1].parse().unwrap_or(0),
            size: caps[2].parse().unwrap_or(0),
            group_id: caps[3].trim().to_string(),
            nodes: caps[5].split(',').map(String::from).collect(),
            commented: block_line.trim_start().starts_with("#BlockName"),
        });
    }
    if blocks.is_empty() {
        return Ok("# No valid blocks found in topology string.\n".to_string());
    }

    let (rows, cols) = grid_shape(max_block_size);
    let mut sections = Vec::new();
    for block in &blocks {
        let mut lines = Vec::new();
        lines.push(format!("block {}  : # of Nodes = {}", block.index, block.size));
        lines.push(format!("ClusterUUID + CliqueID : {}", block.group_id));
        if block.commented {
            lines.push(format!(
                "** This block is ineligible for scheduling because # of nodes < min block size {}**",
                min_block_size
            ));
        }

        let col_width = block
            .nodes
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(2)
            .max(5)
            + 2;
        let sep = format!(
            "|{}|",
            vec!["-".repeat(col_width); cols as usize].join("|")
        );
        lines.push(sep.clone());
        for r in 0..rows {
            let mut cells = Vec::new();
            for c in 0..cols {
                let idx = (r * cols + c) as usize;
                let cell = block.nodes.get(idx).map_or("X", String::as_str);
                cells.push(center(cell, col_width));
            }
            lines.push(format!("|{}|", cells.join("|")));
            lines.push(sep.clone());
        }
        sections.push(lines.join("\n"));
    }
    Ok(sections.join("\n\n") + "\n")
}

/// Render a tree topology file as an ASCII tree.
pub fn visualize_tree(topology: &str) -> String {
    let switch_pattern = Regex::new(
        r"# Number of Nodes in sw(\d+): (\d+)\nSwitchName=sw\d+ Nodes=([^\n]+)",
    )
    .expect("static pattern");
    let parent_pattern =
        Regex::new(r"SwitchName=sw(\d+) Switches=([^\n]+)").expect("static pattern");

    struct SwitchInfo {
        index: u32,
        size: usize,
        nodes: Vec<String>,
    }

    let switches: Vec<SwitchInfo> = switch_pattern
        .captures_iter(topology)
        .map(|caps| SwitchInfo {
            index: caps[1].parse().unwrap_or(0),
            size: caps[2].parse().unwrap_or(0),
            nodes: caps[3].split(',').map(String::from).collect(),
        })
        .collect();

    if switches.is_empty() {
        return "# No valid switches found in topology string.\n".to_string();
    }

    let mut lines: Vec<String> = Vec::new();
    if let Some(caps) = parent_pattern.captures(topology) {
        let parent_idx: u32 = caps[1].parse().unwrap_or(0);
        let children: Vec<&str> = caps[2].split(',').collect();
        lines.push(format!("Switch {} (root)", parent_idx));
        for (i, child) in children.iter().enumerate() {
            let is_last = i == children.len() - 1;
            let branch = if is_last { "└── " } else { "├── " };
            let child_idx: u32 =
                child.trim_start_matches("sw").parse().unwrap_or(0);
            match switches.iter().find(|s| s.index == child_idx) {
                Some(info) => {
                    lines.push(format!("{}Switch {} ({} nodes)", branch, child_idx, info.size));
                    let node_prefix = if is_last { "    " } else { "│   " };
                    for (j, node) in info.nodes.iter().enumerate() {
                        let node_branch = if j == info.nodes.len() - 1 {
                            "└── "
                        } else {
                            "├── "
                        };
                        lines.push(format!("{}{}{}", node_prefix, node_branch, node));
                    }
                }
                None => lines.push(format!("{}{}", branch, child)),
            }
        }
    } else {
        for info in &switches {
            lines.push(format!("Switch {} ({} nodes)", info.index, info.size));
            for (j, node) in info.nodes.iter().enumerate() {
                let node_branch = if j == info.nodes.len() - 1 {
                    "└── "
                } else {
                    "├── "
                };
                lines.push(format!("    {}{}", node_branch, node));
            }
        }
    }
    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{render_block_topology, render_tree_topology};

    #[test]
    fn block_visualization_round_trips_from_the_emitted_file() {
        let groups = vec![
            ("A 32766".to_string(), vec!["g1".to_string(), "g2".to_string()]),
            (
                "B 32766".to_string(),
                vec!["g3".to_string(), "g4".to_string(), "g5".to_string(), "g6".to_string()],
            ),
        ];
        let content = render_block_topology(&groups, 4, 4).unwrap();
        let vis = visualize_block(&content, 4, 4).unwrap();

        assert!(vis.contains("block 1  : # of Nodes = 2"));
        assert!(vis.contains("ClusterUUID + CliqueID : A 32766"));
        assert!(vis.contains(
            "** This block is ineligible for scheduling because # of nodes < min block size 4**"
        ));
        assert!(vis.contains("block 2  : # of Nodes = 4"));
        // 4 fits a 2x2 grid; the short block pads with X.
        assert!(vis.contains("X"));
        assert!(vis.contains("g6"));
    }

    #[test]
    fn zero_max_block_size_is_rejected() {
        assert!(matches!(
            visualize_block("", 1, 0),
            Err(TopologyError::InvalidBlockSize)
        ));
    }

    #[test]
    fn empty_input_reports_no_blocks() {
        let vis = visualize_block("nothing here", 1, 2).unwrap();
        assert_eq!(vis, "# No valid blocks found in topology string.\n");
    }

    #[test]
    fn tree_visualization_shows_the_root_switch() {
        let torsets = vec![
            ("torset-00".to_string(), vec!["h1".to_string(), "h2".to_string()]),
            ("torset-01".to_string(), vec!["h3".to_string()]),
        ];
        let content = render_tree_topology(&torsets).unwrap();
        let vis = visualize_tree(&content);

        assert!(vis.starts_with("Switch 2 (root)\n"));
        assert!(vis.contains("├── Switch 0 (2 nodes)"));
        assert!(vis.contains("│   ├── h1"));
        assert!(vis.contains("│   └── h2"));
        assert!(vis.contains("└── Switch 1 (1 nodes)"));
        assert!(vis.contains("    └── h3"));
    }

    #[test]
    fn tree_without_a_parent_lists_switches_flat() {
        let torsets = vec![("torset-00".to_string(), vec!["h1".to_string(), "h2".to_string()])];
        let content = render_tree_topology(&torsets).unwrap();
        let vis = visualize_tree(&content);
        assert!(vis.starts_with("Switch 0 (2 nodes)\n"));
        assert!(vis.contains("    ├── h1"));
        assert!(vis.contains("    └── h2"));
    }
}
