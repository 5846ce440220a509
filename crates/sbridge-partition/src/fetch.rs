use sbridge_provider::{Bucket, FleetClient};
use tracing::{debug, error, info, warn};

use crate::error::PartitionError;
use crate::partition::Partition;

fn sanitize_prefix(prefix: &str) -> String {
    prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Enumerate provider buckets and build one [`Partition`] per
/// (node array, VM size) group. Groups with autoscale disabled are
/// skipped; same-name groups are only legal when all are dynamic.
pub async fn fetch_partitions(
    fleet: &dyn FleetClient,
    include_dynamic: bool,
) -> Result<Vec<Partition>, PartitionError> {
    let buckets = fleet.list_buckets().await?;

    // Group by (nodearray, vm_size), preserving first-seen order.
    let mut groups: Vec<((String, String), Vec<Bucket>)> = Vec::new();
    for bucket in buckets {
        let key = (bucket.nodearray.clone(), bucket.vm_size.clone());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.push(bucket),
            None => groups.push((key, vec![bucket])),
        }
    }

    let mut all_partitions: Vec<Partition> = Vec::new();
    for ((nodearray, vm_size), group) in groups {
        let config = group[0].software_configuration.clone();

        match config.autoscale() {
            None => {
                warn!(nodearray, "node array does not define autoscale, skipping");
                continue;
            }
            Some(false) => {
                debug!(nodearray, "autoscale explicitly disabled, skipping");
                continue;
            }
            Some(true) => {}
        }

        if vm_size.is_empty() {
            warn!(nodearray, "machine type not defined, skipping");
            continue;
        }

        let dynamic_config = config.dynamic_config().map(String::from);
        let is_hpc = config.is_hpc();

        let mut kept: Vec<Bucket> = if is_hpc {
            group.iter().filter(|b| b.placement_group.is_some()).cloned().collect()
        } else {
            group.iter().filter(|b| b.placement_group.is_none()).cloned().collect()
        };
        if kept.is_empty() {
            continue;
        }
        if kept.len() > 1 && dynamic_config.is_none() && !is_hpc {
            warn!(
                nodearray,
                "multiple buckets but no dynamic config, keeping the first only"
            );
            kept.truncate(1);
        }

        let max_vm_count: u32 = kept.iter().map(|b| b.max_count).sum();
        if max_vm_count == 0 {
            info!(nodearray, vm_size, "bucket has max_count <= 0, skipping");
            continue;
        }

        let partition_name = config.partition_name().unwrap_or(&nodearray).to_string();

        let raw_prefix = config.node_prefix().unwrap_or("").to_string();
        let prefix = sanitize_prefix(&raw_prefix);
        if prefix != raw_prefix {
            warn!(
                partition = partition_name,
                from = raw_prefix,
                to = prefix,
                "node prefix contained invalid hostname characters"
            );
        }

        let max_scaleset_size = if is_hpc {
            kept[0].max_placement_group_size.max(1)
        } else {
            u32::MAX
        };

        all_partitions.push(Partition::new(
            partition_name,
            nodearray,
            prefix,
            vm_size,
            config.is_default_partition(),
            is_hpc,
            max_scaleset_size,
            max_vm_count,
            dynamic_config,
            kept,
        ));
    }

    // Same-name rules: mixed static/dynamic is disabled outright, and
    // only dynamic partitions may share a name across node arrays.
    let mut names: Vec<String> = Vec::new();
    for partition in &all_partitions {
        if !names.contains(&partition.name) {
            names.push(partition.name.clone());
        }
    }
    let mut filtered: Vec<Partition> = Vec::new();
    for name in names {
        let parts: Vec<&Partition> =
            all_partitions.iter().filter(|p| p.name == name).collect();
        let dynamic_count = parts.iter().filter(|p| p.is_dynamic()).count();
        if dynamic_count != 0 && dynamic_count != parts.len() {
            let disabled: Vec<String> =
                parts.iter().map(|p| format!("{}/{}", p.name, p.nodearray)).collect();
            error!(
                "found partitions with the same name where only some are dynamic, disabling {:?}",
                disabled
            );
            continue;
        }
        if parts.len() > 1 && dynamic_count == 0 {
            let disabled: Vec<String> =
                parts.iter().map(|p| format!("{}/{}", p.name, p.nodearray)).collect();
            error!(
                "only dynamic partitions may span more than one node array, disabling {:?}",
                disabled
            );
            continue;
        }
        filtered.extend(parts.into_iter().cloned());
    }

    let default_count = filtered.iter().filter(|p| p.is_default).count();
    if default_count == 0 {
        warn!("no partition is marked default");
        if filtered.len() == 1 {
            info!("only one partition defined, promoting it to default");
            filtered[0].is_default = true;
        }
    } else if default_count > 1 {
        warn!("more than one partition is marked default");
    }

    if !include_dynamic {
        filtered.retain(|p| !p.is_dynamic());
    }
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use sbridge_domain::SoftwareConfig;
    use sbridge_provider::mock::MockFleet;
    use serde_json::{Map, Value};

    use super::*;

    fn config(entries: &[(&str, Value)]) -> SoftwareConfig {
        let mut map = Map::new();
        map.insert("autoscale".into(), Value::Bool(true));
        for (k, v) in entries {
            map.insert(k.to_string(), v.clone());
        }
        SoftwareConfig(map)
    }

    fn bucket(
        id: &str,
        nodearray: &str,
        vm_size: &str,
        pg: Option<&str>,
        config: SoftwareConfig,
    ) -> Bucket {
        Bucket {
            bucket_id: id.to_string(),
            nodearray: nodearray.to_string(),
            vm_size: vm_size.to_string(),
            placement_group: pg.map(String::from),
            max_count: 8,
            max_placement_group_size: 4,
            available_count: 8,
            software_configuration: config,
        }
    }

    #[tokio::test]
    async fn groups_buckets_into_partitions() {
        let fleet = MockFleet::new();
        fleet.add_bucket(bucket(
            "b0",
            "hpc",
            "Standard_HB120",
            Some("pg0"),
            config(&[("hpc", Value::Bool(true))]),
        ));
        fleet.add_bucket(bucket(
            "b1",
            "htc",
            "Standard_F4",
            None,
            config(&[("hpc", Value::Bool(false))]),
        ));

        let partitions = fetch_partitions(&fleet, false).await.unwrap();
        assert_eq!(partitions.len(), 2);
        assert!(partitions[0].is_hpc);
        assert_eq!(partitions[0].all_nodes()[0], "hpc-pg0-1");
        assert!(!partitions[1].is_hpc);
        assert_eq!(partitions[1].all_nodes()[0], "htc-1");
    }

    #[tokio::test]
    async fn autoscale_disabled_arrays_are_skipped() {
        let fleet = MockFleet::new();
        fleet.add_bucket(bucket(
            "b0",
            "manual",
            "Standard_F4",
            None,
            config(&[("autoscale", Value::Bool(false)), ("hpc", Value::Bool(false))]),
        ));
        let partitions = fetch_partitions(&fleet, true).await.unwrap();
        assert!(partitions.is_empty());
    }

    #[tokio::test]
    async fn node_prefix_is_sanitized() {
        let fleet = MockFleet::new();
        fleet.add_bucket(bucket(
            "b0",
            "htc",
            "Standard_F4",
            None,
            config(&[
                ("hpc", Value::Bool(false)),
                ("node_prefix", Value::String("Lab_7".into())),
            ]),
        ));
        let partitions = fetch_partitions(&fleet, false).await.unwrap();
        assert_eq!(partitions[0].nodename_prefix, "lab-7");
        assert_eq!(partitions[0].all_nodes()[0], "lab-7htc-1");
    }

    #[tokio::test]
    async fn single_partition_is_promoted_to_default() {
        let fleet = MockFleet::new();
        fleet.add_bucket(bucket(
            "b0",
            "htc",
            "Standard_F4",
            None,
            config(&[("hpc", Value::Bool(false))]),
        ));
        let partitions = fetch_partitions(&fleet, false).await.unwrap();
        assert!(partitions[0].is_default);
    }

    #[tokio::test]
    async fn mixed_static_dynamic_same_name_is_disabled() {
        let fleet = MockFleet::new();
        fleet.add_bucket(bucket(
            "b0",
            "arr1",
            "Standard_F4",
            None,
            config(&[("hpc", Value::Bool(false)), ("partition", Value::String("p".into()))]),
        ));
        fleet.add_bucket(bucket(
            "b1",
            "arr2",
            "Standard_F8",
            None,
            config(&[
                ("hpc", Value::Bool(false)),
                ("partition", Value::String("p".into())),
                ("dynamic_config", Value::String("Feature=dyn".into())),
            ]),
        ));
        let partitions = fetch_partitions(&fleet, true).await.unwrap();
        assert!(partitions.is_empty());
    }

    #[tokio::test]
    async fn dynamic_partitions_are_dropped_unless_requested() {
        let fleet = MockFleet::new();
        fleet.add_bucket(bucket(
            "b0",
            "dyn",
            "Standard_F4",
            None,
            config(&[
                ("hpc", Value::Bool(false)),
                ("dynamic_config", Value::String("Feature=dyn".into())),
            ]),
        ));
        assert!(fetch_partitions(&fleet, false).await.unwrap().is_empty());
        let with_dynamic = fetch_partitions(&fleet, true).await.unwrap();
        assert_eq!(with_dynamic.len(), 1);
        assert_eq!(with_dynamic[0].features, vec!["dyn"]);
    }
}
