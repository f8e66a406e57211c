//! SparCC CLI
//!
//! Command-line interface for basis correlation estimation and permutation
//! p-values on compositional count tables.

use clap::{Parser, Subcommand};
use sparcc::data::{ComponentMatrix, CountMatrix};
use sparcc::error::Result;
use sparcc::pipeline::{run_iterations, RunConfig, SparccConfig};
use sparcc::test::{
    compute_pvalues, permutation_pvalues, permuted_correlations_from_template, TestType,
};
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Sparse correlations for compositional data
#[derive(Parser)]
#[command(name = "sparcc")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug output (per-iteration and per-round details)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate basis correlations from a count table
    Correlate {
        /// Path to count matrix (components as rows, samples as columns)
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Output path for the correlation TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Output path for the covariance TSV
        #[arg(long)]
        covariance: Option<PathBuf>,

        /// Estimation settings as YAML; flags below override it
        #[arg(long)]
        config: Option<PathBuf>,

        /// Basis method: sparcc or clr
        #[arg(short, long)]
        method: Option<String>,

        /// Fraction estimator: normalize, pseudo or dirichlet
        #[arg(short, long)]
        normalization: Option<String>,

        /// Number of estimation iterations
        #[arg(short = 'i', long)]
        iterations: Option<usize>,

        /// Correlation strength exclusion threshold
        #[arg(short = 't', long)]
        threshold: Option<f64>,

        /// Number of exclusion rounds
        #[arg(short = 'x', long)]
        exclusion_iters: Option<usize>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Keep iteration matrices on disk below this directory
        #[arg(long)]
        spill_dir: Option<PathBuf>,
    },

    /// Compute pseudo p-values from precomputed permuted correlations
    Pvalues {
        /// Correlations of the real data (TSV)
        #[arg(short, long)]
        real: PathBuf,

        /// File name template of permuted correlations, '#' is replaced by the index
        #[arg(short = 'p', long)]
        template: String,

        /// Number of permutations
        #[arg(short, long)]
        n_permutations: usize,

        /// Test type: two_sided or one_sided
        #[arg(short = 't', long, default_value = "two_sided")]
        test_type: String,

        /// Output path for the p-value TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Run correlation and permutation testing from a YAML configuration
    Run {
        /// Path to run configuration YAML
        #[arg(long)]
        config: PathBuf,

        /// Path to count matrix
        #[arg(short = 'c', long)]
        counts: PathBuf,

        /// Directory for correlation, covariance, p-value and summary files
        #[arg(short, long)]
        output_dir: PathBuf,
    },

    /// Write an example run configuration
    Example {
        /// Output path for the YAML file
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Correlate {
            counts,
            output,
            covariance,
            config,
            method,
            normalization,
            iterations,
            threshold,
            exclusion_iters,
            seed,
            spill_dir,
        } => load_correlate_config(config.as_deref()).and_then(|mut sparcc| {
            apply_overrides(
                &mut sparcc,
                method,
                normalization,
                iterations,
                threshold,
                exclusion_iters,
                seed,
                spill_dir,
            )?;
            cmd_correlate(&counts, &output, covariance.as_deref(), &sparcc)
        }),

        Commands::Pvalues {
            real,
            template,
            n_permutations,
            test_type,
            output,
        } => cmd_pvalues(&real, &template, n_permutations, &test_type, &output),

        Commands::Run {
            config,
            counts,
            output_dir,
        } => cmd_run(&config, &counts, &output_dir),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_correlate_config(path: Option<&Path>) -> Result<SparccConfig> {
    match path {
        Some(path) => SparccConfig::from_file(path),
        None => Ok(SparccConfig::default()),
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_overrides(
    config: &mut SparccConfig,
    method: Option<String>,
    normalization: Option<String>,
    iterations: Option<usize>,
    threshold: Option<f64>,
    exclusion_iters: Option<usize>,
    seed: Option<u64>,
    spill_dir: Option<PathBuf>,
) -> Result<()> {
    if let Some(method) = method {
        config.method = method.parse()?;
    }
    if let Some(normalization) = normalization {
        config.normalization = normalization.parse()?;
    }
    if let Some(n_iter) = iterations {
        config.n_iter = n_iter;
    }
    if let Some(threshold) = threshold {
        config.threshold = threshold;
    }
    if let Some(exclusion_iters) = exclusion_iters {
        config.exclusion_iters = exclusion_iters;
    }
    if seed.is_some() {
        config.seed = seed;
    }
    if spill_dir.is_some() {
        config.spill_dir = spill_dir;
    }
    Ok(())
}

/// Estimate correlations and write them out
fn cmd_correlate(
    counts_path: &Path,
    output_path: &Path,
    covariance_path: Option<&Path>,
    config: &SparccConfig,
) -> Result<()> {
    let counts = CountMatrix::from_path(counts_path)?;
    info!(
        components = counts.n_components(),
        samples = counts.n_samples(),
        "loaded count matrix"
    );

    let result = run_iterations(&counts, config)?;

    result.correlation.to_tsv(output_path)?;
    info!(path = %output_path.display(), "wrote correlations");
    if let Some(path) = covariance_path {
        result.covariance.to_tsv(path)?;
        info!(path = %path.display(), "wrote covariances");
    }

    println!("{}", serde_json::to_string_pretty(&result.summary(config))?);
    Ok(())
}

/// Pseudo p-values from permuted correlation files
fn cmd_pvalues(
    real_path: &Path,
    template: &str,
    n_permutations: usize,
    test_type: &str,
    output_path: &Path,
) -> Result<()> {
    let test_type: TestType = test_type.parse()?;
    let real = ComponentMatrix::from_tsv(real_path)?;
    let stream = permuted_correlations_from_template(template, n_permutations)?;

    let p_values = compute_pvalues(real.matrix(), stream, n_permutations, test_type)?;
    ComponentMatrix::new(p_values, real.component_ids.clone())?.to_tsv(output_path)?;
    info!(path = %output_path.display(), %test_type, "wrote p-values");
    Ok(())
}

/// Run a full analysis from configuration
fn cmd_run(config_path: &Path, counts_path: &Path, output_dir: &Path) -> Result<()> {
    info!(path = %config_path.display(), "loading run configuration");
    let config = RunConfig::from_file(config_path)?;
    config.validate()?;

    let counts = CountMatrix::from_path(counts_path)?;
    info!(
        name = %config.name,
        components = counts.n_components(),
        samples = counts.n_samples(),
        "running analysis"
    );

    std::fs::create_dir_all(output_dir)?;
    let result = run_iterations(&counts, &config.sparcc)?;
    result.correlation.to_tsv(output_dir.join("correlation.tsv"))?;
    result.covariance.to_tsv(output_dir.join("covariance.tsv"))?;

    if let Some(permutation) = &config.permutation {
        let p_values =
            permutation_pvalues(&counts, result.correlation.matrix(), &config.sparcc, permutation)?;
        ComponentMatrix::new(p_values, result.correlation.component_ids.clone())?
            .to_tsv(output_dir.join("pvalues.tsv"))?;
    }

    let summary = serde_json::to_string_pretty(&result.summary(&config.sparcc))?;
    std::fs::write(output_dir.join("summary.json"), &summary)?;
    info!(dir = %output_dir.display(), "done");
    println!("{}", summary);
    Ok(())
}

/// Write an example configuration
fn cmd_example(output_path: &Path) -> Result<()> {
    let yaml = RunConfig::example().to_yaml()?;
    std::fs::write(output_path, &yaml)?;
    info!(path = %output_path.display(), "wrote example configuration");
    println!("{}", yaml);
    Ok(())
}
