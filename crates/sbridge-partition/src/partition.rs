use std::collections::HashMap;

use sbridge_domain::sort_nodes;
use sbridge_provider::Bucket;
use serde::Serialize;

use crate::error::PartitionError;

/// One scheduler partition backed by one provider node array. Static
/// partitions pre-enumerate every legal node name per placement group;
/// dynamic partitions claim names at resume time by feature match.
#[derive(Debug, Clone, Serialize)]
pub struct Partition {
    pub name: String,
    pub nodearray: String,
    pub nodename_prefix: String,
    pub machine_type: String,
    pub is_default: bool,
    pub is_hpc: bool,
    pub max_scaleset_size: u32,
    pub max_vm_count: u32,
    pub dynamic_config: Option<String>,
    /// Required feature set identifying this partition for dynamic
    /// nodes (already lowercased).
    pub features: Vec<String>,
    pub buckets: Vec<Bucket>,
    /// Node names per placement group, keyed by the bucket's group.
    #[serde(skip)]
    node_list_by_pg: HashMap<Option<String>, Vec<String>>,
}

impl Partition {
    pub fn new(
        name: String,
        nodearray: String,
        nodename_prefix: String,
        machine_type: String,
        is_default: bool,
        is_hpc: bool,
        max_scaleset_size: u32,
        max_vm_count: u32,
        dynamic_config: Option<String>,
        buckets: Vec<Bucket>,
    ) -> Self {
        let features = dynamic_config
            .as_deref()
            .map(parse_features)
            .unwrap_or_default();
        let mut partition = Self {
            name,
            nodearray,
            nodename_prefix,
            machine_type,
            is_default,
            is_hpc,
            max_scaleset_size,
            max_vm_count,
            dynamic_config,
            features,
            buckets,
            node_list_by_pg: HashMap::new(),
        };
        if partition.dynamic_config.is_none() {
            partition.node_list_by_pg = partition.construct_node_list();
        } else {
            for bucket in &partition.buckets {
                partition
                    .node_list_by_pg
                    .entry(bucket.placement_group.clone())
                    .or_default();
            }
        }
        partition
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic_config.is_some()
    }

    /// Enumerate every legal name. HPC arrays get one name range per
    /// placement group (`{prefix}{array}-pg{k}-{i}`), HTC arrays a flat
    /// range (`{prefix}{array}-{i}`), capped at `max_vm_count` overall.
    fn construct_node_list(&self) -> HashMap<Option<String>, Vec<String>> {
        let mut by_pg = HashMap::new();
        let mut produced = 0u32;

        if !self.is_hpc {
            let names = (1..=self.max_vm_count)
                .map(|i| format!("{}{}-{}", self.nodename_prefix, self.nodearray, i))
                .collect();
            let pg = self.buckets.first().and_then(|b| b.placement_group.clone());
            by_pg.insert(pg, names);
            return by_pg;
        }

        for (k, bucket) in self.buckets.iter().enumerate() {
            let group_size = self.max_scaleset_size.max(1);
            let mut names = Vec::new();
            for i in 1..=group_size {
                if produced >= self.max_vm_count {
                    break;
                }
                names.push(format!(
                    "{}{}-pg{}-{}",
                    self.nodename_prefix, self.nodearray, k, i
                ));
                produced += 1;
            }
            by_pg.insert(bucket.placement_group.clone(), names);
        }
        by_pg
    }

    /// The bucket responsible for a node name this partition owns.
    pub fn bucket_for_node(&self, node_name: &str) -> Result<&Bucket, PartitionError> {
        for (pg, node_list) in &self.node_list_by_pg {
            if node_list.iter().any(|n| n == node_name) {
                if let Some(bucket) =
                    self.buckets.iter().find(|b| b.placement_group.as_ref() == pg.as_ref())
                {
                    return Ok(bucket);
                }
            }
        }
        Err(PartitionError::NoBucket(node_name.to_string()))
    }

    /// Claim a node name for a dynamic partition.
    pub fn add_dynamic_node(
        &mut self,
        node_name: &str,
        placement_group: Option<String>,
    ) -> Result<(), PartitionError> {
        if !self.is_dynamic() {
            return Err(PartitionError::NotDynamic(
                node_name.to_string(),
                self.name.clone(),
            ));
        }
        let node_list = self.node_list_by_pg.entry(placement_group).or_default();
        if !node_list.iter().any(|n| n == node_name) {
            node_list.push(node_name.to_string());
        }
        Ok(())
    }

    /// All owned node names, deterministically sorted.
    pub fn all_nodes(&self) -> Vec<String> {
        let mut names = Vec::new();
        for bucket in &self.buckets {
            if let Some(list) = self.node_list_by_pg.get(&bucket.placement_group) {
                names.extend(list.iter().cloned());
            }
        }
        sort_nodes(&mut names, self.is_hpc);
        names
    }

    /// Feature keys under which this partition is registered for
    /// dynamic claims: the feature set alone, and with the VM size.
    pub fn feature_keys(&self) -> Vec<String> {
        if self.features.is_empty() {
            return Vec::new();
        }
        let mut base: Vec<String> =
            self.features.iter().map(|f| f.to_ascii_lowercase()).collect();
        base.sort();
        base.dedup();

        let mut with_size = base.clone();
        with_size.push(self.machine_type.to_ascii_lowercase());
        with_size.sort();
        with_size.dedup();

        let mut keys = vec![base.join(",")];
        let size_key = with_size.join(",");
        if size_key != keys[0] {
            keys.push(size_key);
        }
        keys
    }
}

/// Pull `Feature=a,b` out of a dynamic-config expression like
/// `Feature=dyn,gpu State=CLOUD`.
fn parse_features(dynamic_config: &str) -> Vec<String> {
    let cleaned = dynamic_config.replace(['"', '\''], "");
    for token in cleaned.split_whitespace() {
        if let Some((key, value)) = token.split_once('=') {
            if key.eq_ignore_ascii_case("feature") {
                return value
                    .split(',')
                    .map(|f| f.trim().to_ascii_lowercase())
                    .filter(|f| !f.is_empty())
                    .collect();
            }
        }
    }
    Vec::new()
}
