use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use seagrav::config::PipelineConfig;
use seagrav::pipeline::{log_file_path, GravityPipeline};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "seagrav",
    about = "Free-water, terrain and Bouguer reduction of marine gravity data"
)]
struct Args {
    /// JSON run configuration (built-in defaults when omitted)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project home; overrides `paths.home` of the configuration
    #[arg(long)]
    home: Option<PathBuf>,

    /// Also write the log to `<output>/seagrav_<timestamp>.log`
    #[arg(long, default_value = "true", value_parser = parse_flag)]
    log_file: bool,
}

fn parse_flag(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(format!("expected true/false, got '{}'", other)),
    }
}

/// Duplicates log records to stderr and a file
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stderr().flush()?;
        self.file.flush()
    }
}

fn init_logging(config: &PipelineConfig, to_file: bool) -> Result<Option<PathBuf>> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.level(),
            record.args()
        )
    });

    let mut log_path = None;
    if to_file {
        let path = log_file_path(config, "seagrav", Local::now());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create log directory {}", parent.display()))?;
        }
        let file = File::create(&path).with_context(|| format!("Cannot create log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
        log_path = Some(path);
    }

    builder.try_init().context("Logger already initialised")?;
    Ok(log_path)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(home) = &args.home {
        config.paths.home = home.clone();
    }

    let log_path = init_logging(&config, args.log_file)?;
    log::info!("seagrav {} started", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &log_path {
        log::info!("Logging to {}", path.display());
    }
    log::debug!("Configuration:\n{}", config.to_json_string()?);

    let pipeline = GravityPipeline::new(config).context("Invalid configuration")?;
    let report = pipeline.run().context("Processing failed")?;

    let r = &report.reconciliation;
    log::info!(
        "Depth reconciliation: {} kept, {} replaced, {} unconfirmed",
        r.kept,
        r.replaced,
        r.unconfirmed
    );
    for ds in &report.datasets {
        match ds.bouguer_range {
            Some((lo, hi)) => log::info!(
                "{}: {} stations, Bouguer {:.1} .. {:.1} mGal, {} undefined",
                ds.tag,
                ds.stations,
                lo,
                hi,
                ds.undefined_bouguer
            ),
            None => log::warn!("{}: {} stations, no defined Bouguer anomaly", ds.tag, ds.stations),
        }
    }
    log::info!(
        "Terrain effect: {} prisms per station, {} coastline polygons",
        report.prisms_per_station,
        report.coastline_polygons
    );
    log::info!(
        "Grids: {}x{} nodes, {} files written",
        report.grid_shape.0,
        report.grid_shape.1,
        report.outputs.len()
    );
    Ok(())
}
