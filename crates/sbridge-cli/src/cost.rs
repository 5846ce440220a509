use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use sbridge_core::DEFAULT_COMMAND_TIMEOUT;
use sbridge_partition::fetch_partitions;
use tracing::warn;

use crate::commands::App;
use crate::output::render_table;

const DEFAULT_FIELDS: &str =
    "jobid,user,account,cluster,partition,ncpus,nnodes,submit,start,end,elapsedraw,state";

#[derive(Debug, Clone)]
struct JobRecord {
    fields: Vec<String>,
    partition: String,
    nnodes: u64,
    elapsed_seconds: u64,
}

/// Price accounting records over a date range: pull jobs via `sacct`,
/// rate each by its partition's VM size, and write per-job and
/// per-partition CSVs into the output directory.
pub async fn run(
    app: &App,
    start: &str,
    end: &str,
    output: &Path,
    extra_fields: Option<&str>,
) -> Result<()> {
    for (label, value) in [("start", start), ("end", end)] {
        NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .with_context(|| format!("--{} must be YYYY-MM-DD, got {}", label, value))?;
    }

    let mut fields: Vec<String> =
        DEFAULT_FIELDS.split(',').map(String::from).collect();
    if let Some(extra) = extra_fields {
        for field in extra.split(',') {
            let field = field.trim().to_ascii_lowercase();
            if !field.is_empty() && !fields.contains(&field) {
                fields.push(field);
            }
        }
    }

    let args: Vec<String> = vec![
        "--allusers".into(),
        "--duplicates".into(),
        "--parsable2".into(),
        "--allocations".into(),
        "--noheader".into(),
        "-M".into(),
        app.config.cluster_name.clone(),
        format!("--start={}", start),
        format!("--end={}", end),
        "-o".into(),
        fields.join(","),
    ];
    let stdout = app
        .runner
        .check_output("sacct", &args, DEFAULT_COMMAND_TIMEOUT)
        .await
        .context("sacct failed")?;

    let partition_idx = field_index(&fields, "partition")?;
    let nnodes_idx = field_index(&fields, "nnodes")?;
    let elapsed_idx = field_index(&fields, "elapsedraw")?;

    let mut jobs = Vec::new();
    let mut unprocessed = 0usize;
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let cells: Vec<String> = line.split('|').map(String::from).collect();
        if cells.len() < fields.len() {
            unprocessed += 1;
            continue;
        }
        let (Ok(nnodes), Ok(elapsed)) = (
            cells[nnodes_idx].parse::<u64>(),
            cells[elapsed_idx].parse::<u64>(),
        ) else {
            unprocessed += 1;
            continue;
        };
        jobs.push(JobRecord {
            partition: cells[partition_idx].clone(),
            nnodes,
            elapsed_seconds: elapsed,
            fields: cells,
        });
    }

    // Map partition -> hourly rate through its VM size.
    let partitions = fetch_partitions(app.fleet.as_ref(), true).await?;
    let rate_by_partition: HashMap<String, f64> = partitions
        .iter()
        .filter_map(|p| {
            app.config
                .cost
                .rates
                .get(&p.machine_type)
                .map(|rate| (p.name.clone(), *rate))
        })
        .collect();

    std::fs::create_dir_all(output)
        .with_context(|| format!("creating {}", output.display()))?;

    let mut jobs_csv = String::new();
    jobs_csv.push_str(&fields.join(","));
    jobs_csv.push_str(",cost\n");
    let mut per_partition: HashMap<String, (usize, f64, f64)> = HashMap::new();
    for job in &jobs {
        let rate = rate_by_partition.get(&job.partition).copied();
        if rate.is_none() {
            warn!(partition = %job.partition, "no rate configured, job priced at 0");
        }
        let hours = job.elapsed_seconds as f64 / 3600.0;
        let cost = hours * job.nnodes as f64 * rate.unwrap_or(0.0);
        jobs_csv.push_str(&job.fields.join(","));
        jobs_csv.push_str(&format!(",{:.4}\n", cost));

        let entry = per_partition.entry(job.partition.clone()).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += hours * job.nnodes as f64;
        entry.2 += cost;
    }
    std::fs::write(output.join("jobs.csv"), jobs_csv)
        .with_context(|| format!("writing {}", output.join("jobs.csv").display()))?;

    let mut partition_rows: Vec<Vec<String>> = per_partition
        .iter()
        .map(|(name, (count, node_hours, cost))| {
            vec![
                name.clone(),
                count.to_string(),
                format!("{:.2}", node_hours),
                format!("{:.4}", cost),
            ]
        })
        .collect();
    partition_rows.sort();

    let mut partitions_csv = String::from("partition,jobs,node_hours,cost\n");
    for row in &partition_rows {
        partitions_csv.push_str(&row.join(","));
        partitions_csv.push('\n');
    }
    std::fs::write(output.join("partitions.csv"), partitions_csv)
        .with_context(|| format!("writing {}", output.join("partitions.csv").display()))?;

    print!(
        "{}",
        render_table(&["PARTITION", "JOBS", "NODE_HOURS", "COST"], &partition_rows)
    );
    println!();
    println!("total jobs: {}", jobs.len());
    if unprocessed > 0 {
        println!("unprocessed records: {}", unprocessed);
    }
    Ok(())
}

fn field_index(fields: &[String], name: &str) -> Result<usize> {
    match fields.iter().position(|f| f == name) {
        Some(idx) => Ok(idx),
        None => bail!("required sacct field {} is missing", name),
    }
}
