//! freqfit CLI - Run a calibration search from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use freqfit::{
    compute::{
        CommandComparator, CommandRuleGenerator, CommandSimulator, ParallelEvaluator, TrialRunner,
        evolution::{EvolutionEngine, RunLogger},
    },
    schema::SearchConfig,
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json>", args[0]);
        eprintln!();
        eprintln!("Calibrate rule-model parameters against a reference frequency table.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to search configuration file");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);

    let mut config = SearchConfig::load(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        process::exit(1);
    });
    match std::env::current_dir() {
        Ok(cwd) => config.resolve_paths(&cwd),
        Err(e) => {
            eprintln!("Error reading working directory: {e}");
            process::exit(1);
        }
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {e}");
        process::exit(1);
    }

    let reference = config.load_reference().unwrap_or_else(|e| {
        eprintln!("Error loading reference data: {e}");
        process::exit(1);
    });

    let logger = RunLogger::create(&config.output.dir).unwrap_or_else(|e| {
        eprintln!("Error preparing output directory: {e}");
        process::exit(1);
    });

    println!("freqfit search");
    println!("==============");
    println!(
        "Reference: {} ({} keys, arity {})",
        config.problem.reference.display(),
        reference.table().len(),
        reference.arity()
    );
    println!("Symbols: {}", config.problem.symbols.join(", "));
    println!(
        "Population: {} x up to {} generations",
        config.population.size, config.population.max_generations
    );
    println!(
        "Trials: {} per evaluation, {} concurrent",
        config.evaluation.trials, config.evaluation.concurrency
    );
    println!("Output: {}", config.output.dir.display());
    println!();

    let collaborators = &config.collaborators;
    let mut runner = TrialRunner::new(
        Arc::new(reference),
        Arc::new(CommandRuleGenerator::new(collaborators.generator.clone())),
        Arc::new(CommandSimulator::new(collaborators.simulator.clone())),
        Arc::new(CommandComparator::new(collaborators.comparator.clone())),
    );
    if let Some(dir) = &config.evaluation.scratch_dir {
        runner = runner.with_scratch_dir(dir);
    }

    let evaluator = ParallelEvaluator::new(Arc::new(runner), config.problem.symbols.clone());
    let mut engine = EvolutionEngine::new(config, evaluator).with_logger(logger);
    println!("Genome length: {}", engine.genome_len());
    println!();

    let result = engine.run_with_callback(|progress| {
        let latest = progress.latest.as_ref();
        let cell = |value: Option<f64>| value.map_or_else(|| "-".to_string(), |v| format!("{v:.6}"));
        println!(
            "  Generation {}/{}: min={} max={} best={} ({} evaluations)",
            progress.generation,
            progress.max_generations,
            cell(latest.and_then(|r| r.min_fitness)),
            cell(latest.and_then(|r| r.max_fitness)),
            cell(progress.best_fitness),
            progress.evaluations
        );
    });

    let stats = &result.stats;
    println!();
    println!("Stopped: {:?}", stats.stop_reason);
    println!("Generations: {}", stats.generations);
    println!(
        "Evaluations: {} ({} trials, {} failed)",
        stats.evaluations, stats.trials_launched, stats.trials_failed
    );
    match stats.best_fitness {
        Some(best) => println!("Best fitness: {best:.6}"),
        None => println!("Best fitness: none (no trial succeeded)"),
    }
    if let Some(best) = &result.best {
        let genome: Vec<String> = best.genome.iter().map(|g| format!("{g:.4}")).collect();
        println!("Best genome: [{}]", genome.join(", "));
    }
    println!("Time: {:.2}s", stats.elapsed_seconds);
}

fn print_example_config() {
    match serde_json::to_string_pretty(&SearchConfig::default()) {
        Ok(json) => {
            println!("Example configuration (config.json):");
            println!("{json}");
        }
        Err(e) => {
            eprintln!("Error serializing example config: {e}");
            process::exit(1);
        }
    }
}
