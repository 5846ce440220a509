use crate::error::TopologyError;

/// Render block topology from `(group id, hosts)` pairs in insertion
/// order. Blocks below `min_block_size` are emitted commented out (the
/// scheduler would reject them); the trailer advertises `block_size`.
pub fn render_block_topology(
    groups: &[(String, Vec<String>)],
    min_block_size: u32,
    block_size: u32,
) -> Result<String, TopologyError> {
    if groups.is_empty() {
        return Err(TopologyError::EmptyTopology);
    }
    let mut lines = Vec::new();
    for (index, (group_id, hosts)) in groups.iter().enumerate() {
        let block_index = index + 1;
        lines.push(format!("# Number of Nodes in block{}: {}", block_index, hosts.len()));
        lines.push(format!("# ClusterUUID and CliqueID: {}", group_id));
        if group_id.contains("N/A") {
            lines.push(format!(
                "# Warning: Block {} has unknown ClusterUUID and CliqueID",
                block_index
            ));
        }
        if (hosts.len() as u32) < min_block_size {
            lines.push(format!(
                "# Warning: Block {} has less than {} nodes, commenting out",
                block_index, min_block_size
            ));
            lines.push(format!("#BlockName=block{} Nodes={}", block_index, hosts.join(",")));
        } else {
            lines.push(format!("BlockName=block{} Nodes={}", block_index, hosts.join(",")));
        }
    }
    lines.push(format!("BlockSizes={}", block_size));
    Ok(lines.join("\n") + "\n")
}

/// Render tree topology from `(torset, hosts)` pairs. One switch per
/// torset, plus an enclosing switch when there is more than one.
pub fn render_tree_topology(torsets: &[(String, Vec<String>)]) -> Result<String, TopologyError> {
    if torsets.is_empty() {
        return Err(TopologyError::EmptyTopology);
    }
    let mut lines = Vec::new();
    let mut switches = Vec::new();
    let mut max_index = 0u32;
    for (position, (torset, hosts)) in torsets.iter().enumerate() {
        // torset-07 -> sw07; groups without a numeric suffix take their
        // position.
        let index: u32 = torset
            .rsplit('-')
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or(position as u32);
        max_index = max_index.max(index);
        lines.push(format!("# Number of Nodes in sw{:02}: {}", index, hosts.len()));
        lines.push(format!("SwitchName=sw{:02} Nodes={}", index, hosts.join(",")));
        switches.push(format!("sw{:02}", index));
    }
    if torsets.len() > 1 {
        lines.push(format!(
            "SwitchName=sw{:02} Switches={}",
            max_index + 1,
            switches.join(",")
        ));
    }
    Ok(lines.join("\n") + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn undersized_blocks_are_commented_out() {
        let groups = vec![
            ("A 32766".to_string(), hosts(&["g1", "g2"])),
            (
                "B 32766".to_string(),
                (3..=20).map(|i| format!("g{}", i)).collect(),
            ),
        ];
        let content = render_block_topology(&groups, 18, 1).unwrap();

        assert!(content.contains("# Warning: Block 1 has less than 18 nodes"));
        assert!(content.contains("#BlockName=block1 Nodes=g1,g2"));
        assert!(content.contains("\nBlockName=block2 Nodes=g3,"));
        assert!(content.ends_with("BlockSizes=1\n"));
    }

    #[test]
    fn unknown_group_ids_are_flagged() {
        let groups = vec![("N/A N/A".to_string(), hosts(&["g1", "g2"]))];
        let content = render_block_topology(&groups, 1, 1).unwrap();
        assert!(content.contains("# Warning: Block 1 has unknown ClusterUUID and CliqueID"));
        assert!(content.contains("\nBlockName=block1 Nodes=g1,g2"));
    }

    #[test]
    fn empty_groups_are_an_error() {
        assert!(matches!(
            render_block_topology(&[], 1, 1),
            Err(TopologyError::EmptyTopology)
        ));
    }

    #[test]
    fn single_torset_has_no_enclosing_switch() {
        let torsets = vec![("torset-00".to_string(), hosts(&["h1", "h2"]))];
        let content = render_tree_topology(&torsets).unwrap();
        assert_eq!(
            content,
            "# Number of Nodes in sw00: 2\nSwitchName=sw00 Nodes=h1,h2\n"
        );
    }

    #[test]
    fn multiple_torsets_get_an_enclosing_switch() {
        let torsets = vec![
            ("torset-00".to_string(), hosts(&["h1", "h2"])),
            ("torset-01".to_string(), hosts(&["h3"])),
        ];
        let content = render_tree_topology(&torsets).unwrap();
        assert!(content.contains("SwitchName=sw00 Nodes=h1,h2"));
        assert!(content.contains("SwitchName=sw01 Nodes=h3"));
        assert!(content.ends_with("SwitchName=sw02 Switches=sw00,sw01\n"));
    }
}
