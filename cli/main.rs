#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use fssgam::config::SelectionConfig;
use fssgam::data::load_survey_data;
use fssgam::pipeline::{TaxonOutcome, execute_plan, plan_selection, write_outputs};

#[derive(Args)]
pub struct RunArgs {
    /// Delimited survey table, one row per observation
    #[arg(value_name = "DATA")]
    pub data: PathBuf,

    /// Selection configuration (TOML)
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Directory for ranking, importance and prediction tables
    #[arg(long, value_name = "DIR", default_value = "fssgam_out")]
    pub out_dir: PathBuf,

    /// Maximum number of parallel fitting workers
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Fit candidate models one at a time
    #[arg(long)]
    pub sequential: bool,

    /// Fixed Tweedie power in (1, 2); estimated per model when absent
    #[arg(long, value_name = "P")]
    pub tweedie_power: Option<f64>,

    /// Hide the per-taxon progress bar
    #[arg(long)]
    pub no_progress: bool,
}

#[derive(Args)]
pub struct EnumerateArgs {
    /// Delimited survey table, one row per observation
    #[arg(value_name = "DATA")]
    pub data: PathBuf,

    /// Selection configuration (TOML)
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,
}

#[derive(Parser)]
#[command(
    name = "fssgam",
    about = "Full-subsets GAM selection for ecological survey data",
    long_about = "Fits every admissible combination of predictors as a Tweedie GAM for each \
                 taxon, ranks the fits by AICc and summarizes predictor importance."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit, rank and summarize all candidate models for every taxon
    #[command(about = "Run full-subsets selection (outputs: CSV tables)")]
    Run(RunArgs),

    /// List the candidate models for every taxon without fitting
    #[command(about = "Enumerate candidate models only")]
    Enumerate(EnumerateArgs),
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Run(args)) => run(args),
        Some(Commands::Enumerate(args)) => enumerate(args),
        None => {
            if let Err(e) = Cli::command().print_help() {
                eprintln!("Error: {e}");
            }
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();
    let mut config = SelectionConfig::load(&args.config)?;
    if let Some(workers) = args.workers {
        config.workers = Some(workers);
    }
    if args.sequential {
        config.parallel = false;
    }
    if args.tweedie_power.is_some() {
        config.tweedie_power = args.tweedie_power;
    }
    if args.no_progress {
        config.show_progress = false;
    }
    config.validate()?;

    let data = load_survey_data(&args.data, &config)?;
    let plan = plan_selection(&data, &config)?;
    let total: usize = plan.taxa.values().map(|p| p.candidates.len()).sum();
    println!(
        "Planned {} candidate fits across {} taxa ({} skipped).",
        total,
        plan.taxa.len(),
        plan.skipped.len()
    );

    let report = execute_plan(plan, &config)?;
    write_outputs(&report, &args.out_dir)?;

    for (taxon, outcome) in &report.taxa {
        match outcome {
            TaxonOutcome::Completed(selection) => match selection.ranking.best() {
                Some(best) => println!(
                    "{taxon}: best model '{}' (AICc {:.2}, wi {:.3}); {} of {} models failed",
                    best.modname,
                    best.aicc,
                    best.wi_aicc,
                    selection.failures.len(),
                    selection.candidates.len()
                ),
                None => println!("{taxon}: every candidate model failed"),
            },
            TaxonOutcome::Skipped { reason } => println!("{taxon}: skipped ({reason})"),
        }
    }
    println!(
        "Finished in {:.1}s. Outputs written to {}",
        start.elapsed().as_secs_f64(),
        args.out_dir.display()
    );
    Ok(())
}

fn enumerate(args: EnumerateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = SelectionConfig::load(&args.config)?;
    let data = load_survey_data(&args.data, &config)?;
    let plan = plan_selection(&data, &config)?;

    for (taxon, taxon_plan) in &plan.taxa {
        println!(
            "{taxon} ({} observations, {} candidates):",
            taxon_plan.data.num_rows(),
            taxon_plan.candidates.len()
        );
        for candidate in &taxon_plan.candidates {
            println!(
                "  {:>4}  {}",
                candidate.index,
                candidate.formula(&config.response)
            );
        }
    }
    for (taxon, reason) in &plan.skipped {
        println!("{taxon}: skipped ({reason})");
    }
    Ok(())
}
