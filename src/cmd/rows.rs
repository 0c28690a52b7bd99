use crate::loader::SourceFormat;
use crate::region::{RegionReader, TableRegion};
use anyhow::Context;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

pub struct RowsArgs {
    pub file: PathBuf,
    pub config: Option<PathBuf>,
    pub offset: u64,
    pub size: Option<u64>,
    pub row_id_min: u64,
    pub limit: Option<usize>,
    pub raw: bool,
    pub csv_header: bool,
    pub separator: Option<String>,
    pub delimiter: Option<String>,
}

pub fn run(args: RowsArgs) -> anyhow::Result<()> {
    let mut config = super::load_config(args.config.as_deref())?;
    if args.csv_header {
        config.mydumper.csv.header = true;
    }
    if let Some(separator) = args.separator {
        config.mydumper.csv.separator = separator;
    }
    if let Some(delimiter) = args.delimiter {
        config.mydumper.csv.delimiter = delimiter;
    }
    config.validate()?;

    let file_size = std::fs::metadata(&args.file)
        .with_context(|| format!("input file does not exist: {}", args.file.display()))?
        .len();
    if args.offset > file_size {
        anyhow::bail!(
            "offset {} is past the end of {} ({} bytes)",
            args.offset,
            args.file.display(),
            file_size
        );
    }

    let size = args.size.unwrap_or(file_size - args.offset);
    let format = SourceFormat::from_path(&args.file);
    let region = TableRegion::new(&args.file, format, args.offset, size, args.row_id_min, 0);
    let csv = config.mydumper.csv;
    let block_size = config.mydumper.read_block_size;
    let limit = args.limit.unwrap_or(usize::MAX);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if args.raw {
        let mut reader = RegionReader::from_region(&region).with_csv(csv);
        let mut count = 0usize;
        'outer: loop {
            let items = reader.read(block_size as u64)?;
            if items.is_empty() {
                break;
            }
            for item in items {
                out.write_all(&item)?;
                out.write_all(b"\n")?;
                count += 1;
                if count >= limit {
                    break 'outer;
                }
            }
        }
        out.flush()?;
        return Ok(());
    }

    let reader = RegionReader::from_region(&region);
    let mut parser = reader.row_parser(&csv, block_size)?;
    let mut count = 0usize;
    while count < limit {
        let Some(row) = parser.read_row()? else {
            break;
        };
        write!(out, "{}\t", row.row_id)?;
        out.write_all(&row.tuple)?;
        out.write_all(b"\n")?;
        count += 1;
    }
    out.flush()?;

    if let Some(columns) = parser.columns() {
        eprintln!("columns: {}", String::from_utf8_lossy(columns));
    }
    eprintln!("{count} rows");

    Ok(())
}
