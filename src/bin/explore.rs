//! Adaptation Graph Explorer
//!
//! Explores the adaptation procedure of a misinformation game loaded from a
//! JSON file or drawn at random, and prints the stable misinformed equilibria.

use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use adaptation_graph::adapt::{AdaptConfig, AdaptationProcedure, ExplorationMode};
use adaptation_graph::games::{MisinformationGame, MisinformedEquilibria, PureNash, TruthRevelation};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Parser)]
#[command(name = "explore")]
#[command(about = "Explore the adaptation graph of a misinformation game")]
struct Cli {
    /// JSON game file (real table followed by one perceived table per party)
    #[arg(short, long, conflicts_with = "random")]
    file: Option<PathBuf>,
    /// Draw a random game instead of loading one
    #[arg(long)]
    random: bool,
    /// Strategies per party of a random game
    #[arg(long, value_delimiter = ',', default_value = "2,2")]
    strategies: Vec<usize>,
    /// Largest utility of a random game
    #[arg(long, default_value_t = 9, value_parser = clap::value_parser!(i64).range(0..))]
    max_utility: i64,
    /// Seed of a random game
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Worker threads (defaults to the available parallelism)
    #[arg(short, long)]
    threads: Option<usize>,
    /// Expand every path instead of each variant once
    #[arg(long)]
    exhaustive: bool,
    /// Skip preprocessing of the root game
    #[arg(long)]
    no_preprocess: bool,
    /// Treat every solver anomaly as malformed output and stop on the first one
    #[arg(long)]
    strict: bool,
    /// Write a JSON report to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print the adaptation tree
    #[arg(long)]
    tree: bool,
    /// Write every variant to this directory
    #[arg(long)]
    export_variants: Option<PathBuf>,
    /// Write every stable variant to this directory
    #[arg(long)]
    export_stable: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    println!("=== Adaptation Graph Explorer ===\n");

    let game = match &cli.file {
        Some(path) => {
            info!("loading game from {}", path.display());
            MisinformationGame::from_json_file(path)?
        }
        None => {
            if !cli.random {
                warn!("no game file given, drawing a random game");
            }
            let mut rng = StdRng::seed_from_u64(cli.seed);
            MisinformationGame::random(&cli.strategies, cli.max_utility, &mut rng)?
        }
    };

    let mode = if cli.exhaustive {
        ExplorationMode::Exhaustive
    } else {
        ExplorationMode::Reduced
    };
    let mut config = AdaptConfig::default()
        .with_mode(mode)
        .with_preprocess_root(!cli.no_preprocess)
        .with_strict(cli.strict);
    if let Some(threads) = cli.threads {
        config = config.with_threads(threads);
    }

    println!(
        "Strategies: {:?} | Mode: {} | Threads: {}",
        game.real().strategies(),
        config.mode,
        config.resolved_threads()
    );
    println!();

    let start = Instant::now();
    let mut procedure = AdaptationProcedure::new(MisinformedEquilibria::new(PureNash), TruthRevelation, config);
    procedure.initialize_root(game)?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let result = procedure.run_with_callback(|progress| {
        let bound = progress
            .upper_bound
            .map(|b| b.to_string())
            .unwrap_or_else(|| "?".to_string());
        pb.set_message(format!(
            "variants {}/{} | nodes {} | pending {}",
            progress.discovered, bound, progress.nodes, progress.pending
        ));
        pb.tick();
    });
    pb.finish_and_clear();

    let stats = result?.clone();
    println!("{}", stats);
    println!("Total time: {:.2}s\n", start.elapsed().as_secs_f64());

    if let Some((id, knowledge)) = procedure.max_knowledge() {
        println!("Maximum knowledge: {:.2}% (MG_{})", knowledge, id);
    }

    let smes = procedure.smes();
    println!("\nStable misinformed equilibria ({}):", smes.len());
    for sme in &smes {
        println!("  {}", sme);
    }

    let diagnostics = procedure.diagnostics();
    if !diagnostics.is_clean() {
        println!("\nDiagnostics:");
        if diagnostics.too_many_threads {
            println!("  more threads than hardware threads requested");
        }
        println!("  solver failures:       {}", diagnostics.solver_failures);
        println!("  malformed outputs:     {}", diagnostics.malformed_outputs);
        println!("  aborted expansions:    {}", diagnostics.aborted_expansions);
        println!("  without equilibria:    {}", diagnostics.no_equilibria);
        println!("  all-zero strategies:   {}", diagnostics.zeros_mixed_strategy);
        println!("  strategies below one:  {}", diagnostics.mixed_strategy_below_one);
    }

    if cli.tree {
        println!("\n{}", procedure.render_tree());
    }

    if let Some(path) = &cli.output {
        match procedure.report().save_json(path) {
            Ok(_) => println!("Saved report: {}", path.display()),
            Err(e) => eprintln!("Error saving report: {}", e),
        }
    }

    if let Some(dir) = &cli.export_variants {
        let written = procedure.export_variants(dir)?;
        println!("Exported {} variants to {}", written, dir.display());
    }

    if let Some(dir) = &cli.export_stable {
        let written = procedure.export_terminal_set(dir)?;
        println!("Exported {} stable variants to {}", written, dir.display());
    }

    Ok(())
}
