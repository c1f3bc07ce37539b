//! embedscope command line
//!
//! - `prepare`: raw embedding file -> feature table (`param_0 .. param_{L-1}` + identifier)
//! - `reduce`: feature table -> cached 3-D (or k-D) coordinates
//! - `head`: write the first rows of a table as a sample file
//! - `info`: shape and column names of a table

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::debug;

use embedscope::dimred::{PcaBuilder, Reducer, TruncatedSvdBuilder, TsneBuilder};
use embedscope::logging;
use embedscope::session::dataset_label;
use embedscope::{Algorithm, ExplorerSession, Pipeline, Settings, Step, TabularStore, Table};

#[derive(Parser)]
#[command(name = "embedscope")]
#[command(version)]
#[command(about = "Reshape image embeddings and reduce them to low-dimensional coordinates")]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `cache_dir` from the settings file
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Append log records to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Turn the raw embedding file into a feature table
    Prepare {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Input has one column per image instead of one row per image
        #[arg(long)]
        wide: bool,
        /// Require every embedding to have exactly this many values
        #[arg(long)]
        array_length: Option<usize>,
    },
    /// Reduce a feature table, going through the result cache
    Reduce(ReduceArgs),
    /// Save the first rows of a table
    Head {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 100)]
        rows: usize,
        #[arg(long)]
        output: PathBuf,
    },
    /// Print row count and columns of a table
    Info {
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(Args)]
struct ReduceArgs {
    #[arg(long)]
    input: PathBuf,
    /// pca, t_sne or svd
    #[arg(long, default_value = "pca")]
    algorithm: String,
    #[arg(long, default_value_t = 3)]
    components: usize,
    /// First row of the returned window
    #[arg(long, default_value_t = 0)]
    start: usize,
    /// End of the returned window (exclusive), defaults to the row count
    #[arg(long)]
    end: Option<usize>,
    /// Standardize columns before reducing
    #[arg(long)]
    normalize: bool,
    #[arg(long)]
    perplexity: Option<f64>,
    #[arg(long)]
    learning_rate: Option<f64>,
    /// t-SNE Barnes-Hut opening angle, 0 for exact gradients
    #[arg(long)]
    theta: Option<f64>,
    #[arg(long)]
    iterations: Option<usize>,
    #[arg(long)]
    random_state: Option<u64>,
    #[arg(long)]
    density_threshold: Option<f64>,
    /// Write the window as parquet instead of printing CSV
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("failed to read settings")?;
    if let Some(dir) = cli.cache_dir {
        settings.cache_dir = dir;
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    if let Some(file) = cli.log_file {
        settings.logging.file = Some(file);
    }
    if !logging::init(&settings.logging).context("failed to initialize logging")? {
        debug!("logger was already initialized");
    }

    match cli.command {
        Commands::Prepare {
            input,
            output,
            wide,
            array_length,
        } => prepare(&settings, input, output, wide, array_length),
        Commands::Reduce(args) => reduce(&settings, args),
        Commands::Head {
            input,
            rows,
            output,
        } => {
            let store = TabularStore::default();
            let table = store.read(&input)?;
            let written = store.save_head(&table, rows, &output)?;
            println!("{}", written.display());
            Ok(())
        }
        Commands::Info { input } => {
            let table = TabularStore::default().read(&input)?;
            println!("rows: {}", table.num_rows());
            println!("columns: {}", table.num_columns());
            for name in table.column_names() {
                println!("  {}", name);
            }
            Ok(())
        }
    }
}

fn prepare(
    settings: &Settings,
    input: PathBuf,
    output: PathBuf,
    wide: bool,
    array_length: Option<usize>,
) -> Result<()> {
    let store = TabularStore::default();
    let table = store
        .read(&input)
        .with_context(|| format!("failed to load '{}'", input.display()))?;

    let mut pipeline = Pipeline::new(
        &settings.id_column,
        &settings.array_column,
        embedscope::LogTarget::PIPELINE,
    )
    .column_prefix(&settings.column_prefix);
    if wide {
        pipeline = pipeline.step(Step::TransposeWide);
    }
    if let Some(length) = array_length {
        pipeline = pipeline.step(Step::CastArray { length });
    }
    pipeline = pipeline.step(Step::Explode);

    let features = pipeline.run(table)?;
    store.save(&features, &output)?;
    println!(
        "{}: {} rows x {} columns",
        output.display(),
        features.num_rows(),
        features.num_columns()
    );
    Ok(())
}

impl ReduceArgs {
    fn tuning_flags(&self) -> [(&'static str, bool); 6] {
        [
            ("--perplexity", self.perplexity.is_some()),
            ("--learning-rate", self.learning_rate.is_some()),
            ("--theta", self.theta.is_some()),
            ("--iterations", self.iterations.is_some()),
            ("--random-state", self.random_state.is_some()),
            ("--density-threshold", self.density_threshold.is_some()),
        ]
    }
}

fn supported_flags(algorithm: Algorithm) -> &'static [&'static str] {
    match algorithm {
        Algorithm::Pca => &[],
        Algorithm::Tsne => &[
            "--perplexity",
            "--learning-rate",
            "--theta",
            "--iterations",
            "--random-state",
        ],
        Algorithm::TruncatedSvd => &["--iterations", "--random-state", "--density-threshold"],
    }
}

fn check_flags(algorithm: Algorithm, args: &ReduceArgs) -> Result<()> {
    let supported = supported_flags(algorithm);
    let unused: Vec<&str> = args
        .tuning_flags()
        .into_iter()
        .filter(|(flag, given)| *given && !supported.contains(flag))
        .map(|(flag, _)| flag)
        .collect();
    if !unused.is_empty() {
        bail!("{} not used by {}", unused.join(", "), algorithm);
    }
    Ok(())
}

fn build_reducer(algorithm: Algorithm, args: &ReduceArgs) -> Result<Box<dyn Reducer>> {
    check_flags(algorithm, args)?;
    let reducer: Box<dyn Reducer> = match algorithm {
        Algorithm::Pca => {
            Box::new(
                PcaBuilder::new()
                    .n_components(args.components)
                    .normalize(args.normalize)
                    .build(),
            )
        }
        Algorithm::Tsne => {
            let mut builder = TsneBuilder::new()
                .n_components(args.components)
                .normalize(args.normalize);
            if let Some(perplexity) = args.perplexity {
                builder = builder.perplexity(perplexity);
            }
            if let Some(rate) = args.learning_rate {
                builder = builder.learning_rate(rate);
            }
            if let Some(theta) = args.theta {
                builder = builder.theta(theta);
            }
            if let Some(iterations) = args.iterations {
                builder = builder.n_iter(iterations);
            }
            if let Some(seed) = args.random_state {
                builder = builder.random_state(seed);
            }
            Box::new(builder.build())
        }
        Algorithm::TruncatedSvd => {
            let mut builder = TruncatedSvdBuilder::new()
                .n_components(args.components)
                .normalize(args.normalize);
            if let Some(threshold) = args.density_threshold {
                builder = builder.density_threshold(threshold);
            }
            if let Some(iterations) = args.iterations {
                builder = builder.n_iter(iterations);
            }
            if let Some(seed) = args.random_state {
                builder = builder.random_state(seed);
            }
            Box::new(builder.build())
        }
    };
    Ok(reducer)
}

fn reduce(settings: &Settings, args: ReduceArgs) -> Result<()> {
    let algorithm: Algorithm = args.algorithm.parse()?;
    let reducer = build_reducer(algorithm, &args)?;

    let session = ExplorerSession::open(settings, &args.input)
        .with_context(|| format!("failed to open '{}'", args.input.display()))?;
    let rows = args.start..args.end.unwrap_or_else(|| session.row_count());
    let reduced = session.reduce_with(reducer, rows.clone())?;

    match &args.output {
        Some(path) => {
            TabularStore::default().save(&reduced, path)?;
            println!("{} -> {}", dataset_label(algorithm, &rows), path.display());
        }
        None => {
            eprintln!("{}", dataset_label(algorithm, &rows));
            write_csv(&reduced)?;
        }
    }
    Ok(())
}

fn write_csv(table: &Table) -> Result<()> {
    let mut writer = arrow::csv::Writer::new(io::stdout().lock());
    writer.write(table.batch())?;
    Ok(())
}
