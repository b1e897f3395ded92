use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use stitch2d::core::{parse_level, UnitSystem};
use stitch2d::io::StitchJobConfig;

/// Stitch multi-zone 2D stage measurements into one calibration table.
#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-zone 2D stage calibration")]
struct Args {
    /// JSON job file. Conflicts with the inline layout options.
    #[arg(long, conflicts_with_all = ["rows", "cols", "zones"])]
    config: Option<PathBuf>,

    /// Number of zone rows.
    #[arg(long, required_unless_present = "config")]
    rows: Option<usize>,

    /// Number of zone columns.
    #[arg(long, required_unless_present = "config")]
    cols: Option<usize>,

    /// Zone files in row-major order.
    #[arg(long, num_args = 1.., required_unless_present = "config")]
    zones: Vec<String>,

    /// Calibration table output path.
    #[arg(long)]
    out_cal: Option<String>,

    /// Accuracy report output path.
    #[arg(long)]
    out_dat: Option<String>,

    /// Unit system written to the table headers (METRIC or ENGLISH).
    #[arg(long)]
    user_unit: Option<UnitSystem>,

    /// Also write a JSON run summary here.
    #[arg(long)]
    report: Option<String>,

    /// off, error, warn, info, debug or trace.
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn job(&self) -> Result<StitchJobConfig, Box<dyn Error>> {
        let mut job = match &self.config {
            Some(path) => StitchJobConfig::load_json(path)?,
            None => StitchJobConfig::new(
                self.rows.unwrap_or_default(),
                self.cols.unwrap_or_default(),
                self.zones.clone(),
            ),
        };
        if let Some(p) = &self.out_cal {
            job.output_cal = p.clone();
        }
        if let Some(p) = &self.out_dat {
            job.output_dat = p.clone();
        }
        if self.user_unit.is_some() {
            job.user_unit = self.user_unit;
        }
        if self.report.is_some() {
            job.report = self.report.clone();
        }
        Ok(job)
    }
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let level = parse_level(&args.log_level)
        .ok_or_else(|| format!("unknown log level '{}'", args.log_level))?;
    stitch2d::init_logging(level);

    let job = args.job()?;
    let result = stitch2d::calibrate(&job)?;

    let cal = &result.run.calibration;
    println!(
        "stitched {} zones into a {} x {} grid ({:.1}% covered)",
        result.run.zone_count,
        cal.rows(),
        cal.cols(),
        cal.coverage()
    );
    println!(
        "peak-to-peak: ax1 {:.4}  ax2 {:.4}  vector {:.4}",
        cal.stats.pk_ax1, cal.stats.pk_ax2, cal.stats.pk_vector
    );
    println!("orthogonality: {:.3} arcsec", cal.orthogonality_arcsec);
    for warning in &result.run.warnings {
        println!("warning: {warning}");
    }
    for path in &result.written {
        println!("wrote {}", path.display());
    }
    Ok(())
}
