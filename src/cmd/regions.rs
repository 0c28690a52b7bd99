use crate::loader::{MyDumpLoader, TableMeta};
use crate::region::{allocate_engine_ids, make_table_regions, RegionOptions, TableRegion};
use ahash::AHashSet;
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

pub struct RegionsArgs {
    pub dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub tables: Option<String>,
    pub min_region_size: Option<u64>,
    pub batch_size: Option<u64>,
    pub batch_import_ratio: Option<f64>,
    pub table_concurrency: Option<usize>,
    pub json: bool,
    pub progress: bool,
}

#[derive(Serialize)]
struct RegionsJsonOutput {
    source_dir: String,
    elapsed_secs: f64,
    tables: Vec<TablePlan>,
}

#[derive(Serialize)]
struct TablePlan {
    db: String,
    table: String,
    engines: usize,
    rows: u64,
    bytes: u64,
    regions: Vec<TableRegion>,
}

impl TablePlan {
    fn new(table: &TableMeta, regions: Vec<TableRegion>) -> Self {
        Self {
            db: table.db.clone(),
            table: table.name.clone(),
            engines: regions
                .last()
                .map_or(0, |r| r.engine_id().max(0) as usize + 1),
            rows: regions.iter().map(|r| r.rows()).sum(),
            bytes: regions.iter().map(|r| r.size()).sum(),
            regions,
        }
    }
}

pub fn run(args: RegionsArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    if let Some(dir) = args.dir {
        config.mydumper.source_dir = dir;
    }
    if let Some(size) = args.min_region_size {
        config.mydumper.min_region_size = size;
    }
    if let Some(size) = args.batch_size {
        config.batch.size = size;
    }
    if let Some(ratio) = args.batch_import_ratio {
        config.batch.import_ratio = ratio;
    }
    if let Some(n) = args.table_concurrency {
        config.batch.table_concurrency = n;
    }
    config.validate()?;

    let source_dir = config.mydumper.source_dir.clone();
    let loader = MyDumpLoader::new(&source_dir)
        .with_context(|| format!("cannot load dump directory {}", source_dir.display()))?;

    let filter = parse_table_filter(args.tables.as_deref());
    let tables: Vec<&TableMeta> = loader
        .databases()
        .iter()
        .flat_map(|db| db.tables.iter())
        .filter(|t| table_selected(&filter, t))
        .collect();
    if tables.is_empty() {
        anyhow::bail!("no matching tables found in {}", source_dir.display());
    }

    let opts = RegionOptions::from_config(&config);
    let start_time = Instant::now();

    let pb = if args.progress && !args.json {
        let pb = ProgressBar::new(tables.len() as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tables {msg}",
            )
            .unwrap()
            .progress_chars("█▓▒░  ")
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Some(pb)
    } else {
        None
    };

    let mut plans = Vec::with_capacity(tables.len());
    for table in tables {
        if let Some(pb) = &pb {
            pb.set_message(format!("{}.{}", table.db, table.name));
        }

        let mut regions = make_table_regions(table, &opts)
            .with_context(|| format!("cannot compute regions of `{}`.`{}`", table.db, table.name))?;
        let sizes: Vec<f64> = regions.iter().map(|r| r.size() as f64).collect();
        allocate_engine_ids(
            &mut regions,
            &sizes,
            config.batch.size as f64,
            config.batch.import_ratio,
            config.batch.table_concurrency,
        );
        plans.push(TablePlan::new(table, regions));

        if let Some(pb) = &pb {
            pb.inc(1);
        }
    }

    if let Some(pb) = pb {
        pb.finish_with_message("done");
    }
    let elapsed = start_time.elapsed();

    if args.json {
        let output_json = RegionsJsonOutput {
            source_dir: source_dir.display().to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
            tables: plans,
        };
        println!("{}", serde_json::to_string_pretty(&output_json)?);
        return Ok(());
    }

    println!("✓ Planned {} tables in {:.3?}\n", plans.len(), elapsed);
    println!(
        "{:<40} {:>8} {:>8} {:>14} {:>12}",
        "Table", "Regions", "Engines", "Rows", "Size (MB)"
    );
    println!("{}", "─".repeat(86));

    let mut total_rows: u64 = 0;
    let mut total_bytes: u64 = 0;
    for plan in &plans {
        let name = truncate_string(&format!("{}.{}", plan.db, plan.table), 40);
        println!(
            "{:<40} {:>8} {:>8} {:>14} {:>12.2}",
            name,
            plan.regions.len(),
            plan.engines,
            plan.rows,
            plan.bytes as f64 / (1024.0 * 1024.0)
        );
        total_rows += plan.rows;
        total_bytes += plan.bytes;
    }

    println!("{}", "─".repeat(86));
    println!(
        "{:<40} {:>8} {:>8} {:>14} {:>12.2}",
        "TOTAL",
        plans.iter().map(|p| p.regions.len()).sum::<usize>(),
        "-",
        total_rows,
        total_bytes as f64 / (1024.0 * 1024.0)
    );

    Ok(())
}

fn parse_table_filter(tables: Option<&str>) -> AHashSet<String> {
    tables
        .map(|s| {
            s.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn table_selected(filter: &AHashSet<String>, table: &TableMeta) -> bool {
    filter.is_empty()
        || filter.contains(&table.name)
        || filter.contains(&format!("{}.{}", table.db, table.name))
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_filter() {
        let filter = parse_table_filter(Some("orders, shop.users,"));
        assert_eq!(filter.len(), 2);
        assert!(table_selected(&filter, &TableMeta::new("any", "orders")));
        assert!(table_selected(&filter, &TableMeta::new("shop", "users")));
        assert!(!table_selected(&filter, &TableMeta::new("crm", "users")));
        assert!(table_selected(&parse_table_filter(None), &TableMeta::new("a", "b")));
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("abcdefghijkl", 8), "abcde...");
    }
}
