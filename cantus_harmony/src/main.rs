// Cantus Harmony: CLI entry point.
//
// Reads a melody from a MIDI file, harmonizes it, prints an evaluation,
// and writes the harmonization back out as a multi-track MIDI file.
//
// Usage:
//   cargo run -p cantus_harmony --bin harmonize -- <input.mid> [output.mid]
//     [--voices N] [--style NAME] [--temperature T] [--iterations N]
//     [--policy triad|contrary|greedy|random|model] [--infill]
//     [--model prior.json] [--config config.json] [--seed N] [--steps N]
//
// By default one episode is played with the chosen policy (triad unless
// given). `--infill` instead fills the whole grid at once with the
// infilling model. Command-line flags override values from `--config`.
//
// Logging goes to stderr through tracing; set RUST_LOG to change the level.

use cantus_harmony::config::HarmonizerConfig;
use cantus_harmony::env::HarmonizationEnv;
use cantus_harmony::episode::run_episode;
use cantus_harmony::error::{HarmonyError, Result};
use cantus_harmony::evaluate::evaluate;
use cantus_harmony::grid::HarmonyGrid;
use cantus_harmony::infill::InfillController;
use cantus_harmony::midi::{MelodyFile, read_melody, write_harmonization};
use cantus_harmony::model::ModelSession;
use cantus_harmony::policy::PolicyKind;
use cantus_harmony::prior::IntervalPriorModel;
use cantus_prng::CantusRng;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if let Err(e) = run(&args) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let positional = positional_args(args);
    let Some(input_path) = positional.first() else {
        return Err(HarmonyError::InvalidConfig(
            "usage: harmonize <input.mid> [output.mid] [--voices N] [--style NAME] ...".into(),
        ));
    };
    let output_path = positional
        .get(1)
        .copied()
        .unwrap_or("harmonized.mid");

    let mut config = match flag_value(args, "--config") {
        Some(path) => HarmonizerConfig::load(Path::new(path))?,
        None => HarmonizerConfig::default(),
    };
    if let Some(v) = parse_flag(args, "--voices")? {
        config.harmony_voices = v;
    }
    if let Some(style) = flag_value(args, "--style") {
        config.style = style.to_string();
    }
    if let Some(t) = parse_flag(args, "--temperature")? {
        config.temperature = t;
    }
    if let Some(n) = parse_flag(args, "--iterations")? {
        config.infill.iterations = n;
    }
    if let Some(seed) = parse_flag(args, "--seed")? {
        config.seed = seed;
    }
    if let Some(steps) = parse_flag(args, "--steps")? {
        config.max_steps = Some(steps);
    }
    config.validate()?;

    let policy: PolicyKind = parse_flag(args, "--policy")?.unwrap_or(PolicyKind::Triad);
    let use_infill = args.iter().any(|a| a == "--infill");

    let MelodyFile { melody, tempo_bpm } = read_melody(Path::new(input_path))?;
    let tpq = melody.ticks_per_quarter();

    println!("=== Cantus Harmony ===");
    println!("Input: {} ({} notes, {} BPM)", input_path, melody.len(), tempo_bpm);
    println!("Output: {}", output_path);
    println!("Style: {}", config.style);
    println!("Harmony voices: {}", config.harmony_voices);
    println!("Seed: {}", config.seed);
    println!();

    // The model is loaded for infilling, for the model policy, or whenever
    // a table file is given; otherwise model steps fall back to rules.
    let wants_model = use_infill || policy == PolicyKind::Model;
    let session = match flag_value(args, "--model") {
        Some(path) => ModelSession::acquire(Box::new(IntervalPriorModel::load(Path::new(path))?)),
        None if wants_model => ModelSession::acquire(Box::new(IntervalPriorModel::default_model())),
        None => ModelSession::unavailable(),
    };

    let style = config.style_preset()?;
    let grid: HarmonyGrid = if use_infill {
        println!("Mode: infill ({} iterations, temperature {})", config.infill.iterations, config.temperature);
        let mut session = session;
        let mut rng = CantusRng::new(config.seed);
        let mut controller =
            InfillController::new(&mut session, config.temperature, config.infill.iterations)?;
        let infilled =
            controller.harmonize(&melody, config.harmony_voices, &config.voice_ranges, &mut rng)?;
        let stats = infilled.stats();
        println!(
            "Rounds: {}, cells resolved: {}, melody re-locks: {}, uniform fallbacks: {}",
            stats.rounds, stats.resolved_cells, stats.relocked_cells, stats.uniform_fallbacks
        );
        infilled.into_grid()
    } else {
        println!("Mode: episode (policy {})", policy);
        let mut env = HarmonizationEnv::new(melody.clone(), config.clone(), session)?;
        let mut agent = policy.build(config.seed);
        let summary = run_episode(&mut env, agent.as_mut())?;
        println!(
            "Steps: {}, mean reward: {:.3}, fallbacks: {}, clamped: {}",
            summary.steps, summary.mean_reward, summary.fallbacks, summary.clamped
        );
        env.grid().clone()
    };
    println!();
    println!("{}", grid.summary());

    let ranges = config.voice_ranges.for_voices(grid.voices());
    let evaluation = evaluate(&melody, &grid, &ranges, &style)?;
    println!("{evaluation}");
    println!();

    write_harmonization(
        &grid.to_notes()?,
        grid.voices(),
        tpq,
        tempo_bpm,
        Path::new(output_path),
    )?;
    println!("Wrote {}", output_path);
    Ok(())
}

/// Arguments that are neither flags nor flag values.
fn positional_args(args: &[String]) -> Vec<&str> {
    const VALUELESS: &[&str] = &["--infill"];
    let mut out = Vec::new();
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
        } else if arg.starts_with("--") {
            skip_next = !VALUELESS.contains(&arg.as_str());
        } else {
            out.push(arg.as_str());
        }
    }
    out
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str) -> Result<Option<T>> {
    match flag_value(args, flag) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| HarmonyError::InvalidConfig(format!("bad value '{v}' for {flag}"))),
    }
}
