//! solv-tables
//!
//! Builds inverse exponential map tables for the Sol and Nih geometries and
//! writes them in the binary table format.
//!
//! # Commands
//!
//! - `build`: build a table and report its accuracy
//! - `write <path>`: build a table and save it to `path`
//! - `inspect <path>`: print the header and sample ranges of a saved table

use anyhow::Context;
use clap::{Parser, Subcommand};
use solv_core::{
    build_table, load_table, save_table, BuildOutput, BuildSettings, Dimensions, ExpMap,
    Geometry, NumericalExp, Table,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod error;

pub use error::{exit_code_for_error, CliExitCode};

/// Inverse exponential map table builder
#[derive(Parser, Debug)]
#[command(name = "solv-tables")]
#[command(version)]
#[command(about = "Build inverse exponential map tables for Sol and Nih geometry")]
#[command(propagate_version = true)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Geometry family: sol or nih
    #[arg(short, long, default_value = "sol", global = true)]
    geometry: Geometry,

    /// Table dimensions; defaults to 64 64 64
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"], global = true)]
    dim: Option<Vec<usize>>,

    /// Worker threads; defaults to the available parallelism
    #[arg(long, global = true)]
    workers: Option<usize>,

    /// Integration steps per forward map evaluation
    #[arg(long, global = true)]
    precision: Option<usize>,

    /// JSON file with build settings; command-line flags take precedence
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build a table in memory and report its accuracy
    Build,
    /// Build a table and write it to a file
    Write {
        /// Output file
        path: PathBuf,
    },
    /// Print the dimensions and sample ranges of a table file
    Inspect {
        /// Table file
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let map = NumericalExp::new(cli.geometry);
    match run(&cli, &map) {
        Ok(()) => CliExitCode::Success.into(),
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            exit_code_for_error(&err).into()
        }
    }
}

fn run<M: ExpMap + Sync + ?Sized>(cli: &Cli, map: &M) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Build => {
            let output = build(cli, map)?;
            println!("{}", summarize_build(cli.geometry, &output));
        }
        Commands::Write { path } => {
            let output = build(cli, map)?;
            save_table(&output.table, path)
                .with_context(|| format!("failed to write table to {}", path.display()))?;
            info!(path = %path.display(), "table written");
            println!("{}", summarize_build(cli.geometry, &output));
            println!("wrote {}", path.display());
        }
        Commands::Inspect { path } => {
            let table = load_table(path)
                .with_context(|| format!("failed to read table from {}", path.display()))?;
            println!("{}", describe_table(&table));
        }
    }
    Ok(())
}

fn build<M: ExpMap + Sync + ?Sized>(cli: &Cli, map: &M) -> anyhow::Result<BuildOutput> {
    let settings = resolve_settings(cli)?;
    let dims = resolve_dimensions(cli)?;
    info!(
        geometry = %cli.geometry,
        x = dims.x,
        y = dims.y,
        z = dims.z,
        workers = settings.workers,
        precision = settings.solver.precision,
        "building table"
    );
    let output = build_table(map, cli.geometry, dims, &settings)
        .with_context(|| format!("failed to build {} table", cli.geometry))?;
    Ok(output)
}

fn resolve_settings(cli: &Cli) -> anyhow::Result<BuildSettings> {
    let mut settings = match &cli.config {
        Some(path) => load_settings(path)?,
        None => BuildSettings::default(),
    };
    if let Some(workers) = cli.workers {
        settings.workers = workers;
    }
    if let Some(precision) = cli.precision {
        settings.solver.precision = precision;
    }
    Ok(settings)
}

fn load_settings(path: &Path) -> anyhow::Result<BuildSettings> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn resolve_dimensions(cli: &Cli) -> anyhow::Result<Dimensions> {
    match cli.dim.as_deref() {
        None => Ok(cli.geometry.default_dimensions()),
        Some(&[x, y, z]) => Ok(Dimensions::new(x, y, z)),
        Some(other) => anyhow::bail!("--dim takes exactly three values, got {}", other.len()),
    }
}

fn summarize_build(geometry: Geometry, output: &BuildOutput) -> String {
    let dims = output.table.dimensions();
    format!(
        "{geometry} table {}x{}x{}: {} failed cells, max error {:.3e}",
        dims.x,
        dims.y,
        dims.z,
        output.failures.len(),
        output.max_error
    )
}

fn describe_table(table: &Table) -> String {
    let dims = table.dimensions();
    let mut lo = [f32::INFINITY; 3];
    let mut hi = [f32::NEG_INFINITY; 3];
    let mut non_finite = 0usize;
    for sample in table.samples() {
        if !sample.iter().all(|c| c.is_finite()) {
            non_finite += 1;
            continue;
        }
        for axis in 0..3 {
            lo[axis] = lo[axis].min(sample[axis]);
            hi[axis] = hi[axis].max(sample[axis]);
        }
    }

    let mut lines = vec![format!(
        "dimensions {}x{}x{} ({} samples)",
        dims.x,
        dims.y,
        dims.z,
        table.samples().len()
    )];
    for (axis, name) in ["x", "y", "z"].iter().enumerate() {
        lines.push(format!("{name}: [{:.6}, {:.6}]", lo[axis], hi[axis]));
    }
    if non_finite > 0 {
        lines.push(format!("{non_finite} non-finite samples"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector4;
    use solv_core::{BuildError, LowPoint, TangentPoint};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments should parse")
    }

    #[test]
    fn parses_global_options_after_subcommand() {
        let cli = parse(&[
            "solv-tables",
            "write",
            "out.dat",
            "--geometry",
            "nih",
            "--dim",
            "8",
            "6",
            "5",
            "--workers",
            "2",
            "-vv",
        ]);
        assert_eq!(cli.geometry, Geometry::Nih);
        assert_eq!(cli.dim.as_deref(), Some(&[8, 6, 5][..]));
        assert_eq!(cli.workers, Some(2));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Write { ref path } if path == Path::new("out.dat")));
    }

    #[test]
    fn defaults_to_sol_at_default_size() {
        let cli = parse(&["solv-tables", "build"]);
        assert_eq!(cli.geometry, Geometry::Sol);
        let dims = resolve_dimensions(&cli).expect("default dimensions");
        assert_eq!(dims, Dimensions::new(64, 64, 64));
    }

    #[test]
    fn rejects_unknown_geometry_and_short_dim() {
        assert!(Cli::try_parse_from(["solv-tables", "--geometry", "nil", "build"]).is_err());
        assert!(Cli::try_parse_from(["solv-tables", "--dim", "4", "4", "build"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("build.json");
        std::fs::write(
            &path,
            r#"{ "workers": 3, "sanity_threshold": 0.01, "solver": { "precision": 40 } }"#,
        )
        .expect("write config");

        let config = path.to_str().expect("utf-8 path");
        let cli = parse(&["solv-tables", "build", "--config", config, "--precision", "25"]);
        let settings = resolve_settings(&cli).expect("settings");
        assert_eq!(settings.workers, 3);
        assert_eq!(settings.sanity_threshold, 0.01);
        assert_eq!(settings.solver.precision, 25);
        assert_eq!(settings.solver.max_step, BuildSettings::default().solver.max_step);
    }

    #[test]
    fn malformed_config_is_a_plain_failure() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("build.json");
        std::fs::write(&path, "{ workers: ").expect("write config");

        let cli = parse(&["solv-tables", "build", "--config", path.to_str().expect("utf-8")]);
        let err = resolve_settings(&cli).expect_err("config should not parse");
        assert_eq!(exit_code_for_error(&err), CliExitCode::Failure);
        assert!(format!("{err:#}").contains("invalid config"));
    }

    #[test]
    fn write_then_inspect() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("sol.dat");
        let path_str = path.to_str().expect("utf-8 path");

        let cli = parse(&[
            "solv-tables", "write", path_str, "--dim", "4", "4", "4", "--workers", "2",
        ]);
        run(&cli, &NumericalExp::new(Geometry::Sol)).expect("write should succeed");

        let table = load_table(&path).expect("table should load");
        assert_eq!(table.dimensions(), Dimensions::new(4, 4, 4));
        assert_eq!(table.get(0, 0, 0), LowPoint::zeros());

        let summary = describe_table(&table);
        assert!(summary.starts_with("dimensions 4x4x4 (64 samples)"), "{summary}");
        assert!(!summary.contains("non-finite"));

        let cli = parse(&["solv-tables", "inspect", path_str]);
        run(&cli, &NumericalExp::new(Geometry::Sol)).expect("inspect should succeed");
    }

    #[test]
    fn failed_build_writes_nothing() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.dat");
        let cli = parse(&[
            "solv-tables",
            "write",
            path.to_str().expect("utf-8 path"),
            "--dim",
            "4",
            "4",
            "4",
            "--workers",
            "1",
        ]);
        let broken = |_: &TangentPoint, _: usize| Vector4::new(f64::NAN, 0.0, 0.0, 1.0);

        let err = run(&cli, &broken).expect_err("non-finite map must abort");
        assert!(matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::NonFinite { .. })
        ));
        assert_eq!(exit_code_for_error(&err), CliExitCode::NonFinite);
        assert!(!path.exists());
    }

    #[test]
    fn inspecting_missing_file_fails() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("missing.dat");
        let cli = parse(&["solv-tables", "inspect", path.to_str().expect("utf-8 path")]);
        let err = run(&cli, &NumericalExp::new(Geometry::Sol)).expect_err("missing file");
        assert_eq!(exit_code_for_error(&err), CliExitCode::Failure);
    }
}
