//! HTSOHM CLI - Run a quality-diversity search from JSON configuration.

use std::path::PathBuf;
use std::time::Instant;

use htsohm::{
    compute::{DescriptorSimulator, InMemoryStore, MaterialStore, RunOptions, SearchEngine},
    schema::SearchConfig,
};

fn print_usage(program: &str) {
    eprintln!("Usage: {} <config.json> [options]", program);
    eprintln!();
    eprintln!("Run a quality-diversity search over pseudomaterials.");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  config.json              Path to search configuration file");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <path>              Material snapshot file (default: <config>.materials.json)");
    eprintln!("  --restart <generation>   Resume at a generation from the snapshot");
    eprintln!("  --override               Delete excess materials when restarting");
    eprintln!("  --max-generations <n>    Stop after generation n");
    eprintln!();
    eprintln!("Example configuration is generated with --example flag.");
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: Option<&String>) -> T {
    value.and_then(|s| s.parse().ok()).unwrap_or_else(|| {
        eprintln!("{} needs a non-negative integer argument", flag);
        std::process::exit(1);
    })
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage(&args[0]);
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let mut db_path = config_path.with_extension("materials.json");
    let mut options = RunOptions::default();

    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--db" => match rest.next() {
                Some(path) => db_path = PathBuf::from(path),
                None => {
                    eprintln!("--db needs a path argument");
                    std::process::exit(1);
                }
            },
            "--restart" => options.restart_generation = Some(parse_number(arg, rest.next())),
            "--override" => options.override_restart_errors = true,
            "--max-generations" => options.max_generations = Some(parse_number(arg, rest.next())),
            other => {
                eprintln!("Unknown argument: {}", other);
                print_usage(&args[0]);
                std::process::exit(1);
            }
        }
    }

    // Load configuration
    let config = SearchConfig::from_path(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {}", e);
        std::process::exit(1);
    }

    // A fresh run starts from an empty store; a restart loads the snapshot
    let store = if options.restart_generation.is_some() {
        InMemoryStore::load(&db_path)
    } else {
        InMemoryStore::open(&db_path)
    }
    .unwrap_or_else(|e| {
        eprintln!("Error opening material store {}: {}", db_path.display(), e);
        std::process::exit(1);
    });

    let simulator = DescriptorSimulator::new(&config.simulation).unwrap_or_else(|e| {
        eprintln!("Error creating simulator: {}", e);
        std::process::exit(1);
    });

    println!("HTSOHM Search");
    println!("=============");
    println!(
        "Bins: {} per dimension over {}",
        config.num_bins,
        config
            .bin_properties
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("Generator: {:?}", config.generator);
    println!("Selector: {:?}", config.selector);
    println!("Children per generation: {}", config.children_per_generation);
    println!(
        "Generations: {}",
        options.max_generations.unwrap_or(config.max_generations)
    );
    println!("Workers: {}", config.num_processes);
    println!("Store: {}", db_path.display());
    println!();

    let snapshot = store.clone();
    let engine = SearchEngine::new(config, store, simulator);
    let start = Instant::now();

    let result = engine.run_with_callback(&options, |progress| {
        if let Err(e) = snapshot.save(&db_path) {
            log::error!("Failed to save material snapshot: {}", e);
        }
        println!(
            "  Generation {}/{}: coverage={:.4} ({}/{} bins), materials={}, {:.1}s",
            progress.generation,
            progress.max_generations,
            progress.coverage,
            progress.occupied_bins,
            progress.total_bins,
            progress.population,
            start.elapsed().as_secs_f32()
        );
    });

    let state = result.unwrap_or_else(|e| {
        eprintln!("Search failed: {}", e);
        std::process::exit(1);
    });

    let stored = engine.store().count().unwrap_or_default();
    println!();
    println!("Final state:");
    println!("  Materials evaluated: {}", state.len());
    println!("  Materials stored: {}", stored);
    println!(
        "  Coverage: {:.4} ({} of {} bins)",
        state.coverage(),
        state.archive.occupied_count(),
        state.archive.len()
    );
    println!("Time: {:.2}s", start.elapsed().as_secs_f32());
}

fn print_example_config() {
    let config = SearchConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing example config: {}", e),
    }
}
