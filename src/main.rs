use anyhow::{Context, Result};
use citecheck::config::{Config, API_KEY_ENV};
use citecheck::{
    FetchOptions, HttpBackend, LoopOptions, OpenRouterOracle, PageFetcher, VerificationLoop,
};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "citecheck",
    about = "Verify quoted citations in a report against their source pages",
    version
)]
struct Args {
    /// Path to the report file (markdown or plain text)
    report: PathBuf,

    /// Budget of extract→verify→correct rounds
    #[arg(short = 'i', long)]
    max_iterations: Option<u32>,

    /// Oracle model id (overrides the config file)
    #[arg(long)]
    model: Option<String>,

    /// Print the full result as JSON instead of the corrected report
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load();

    let api_key = config.api_key().with_context(|| {
        format!(
            "No API key configured. Set {} or add openrouter_api_key to the config file.",
            API_KEY_ENV
        )
    })?;

    let content = fs::read_to_string(&args.report)
        .with_context(|| format!("Failed to read report {}", args.report.display()))?;

    let oracle = OpenRouterOracle::new(api_key, args.model.or_else(|| config.model.clone()));
    let fetcher = PageFetcher::with_options(HttpBackend::new()?, FetchOptions::default());
    let options = LoopOptions {
        max_iterations: args.max_iterations.unwrap_or(config.max_iterations),
        ..LoopOptions::default()
    };
    let pipeline = VerificationLoop::with_options(oracle, fetcher, options);

    eprintln!("Verifying citations in {}...", args.report.display());
    let result = pipeline.run(&content).await;

    let checked = result.verification_results.len();
    let unverified = result
        .verification_results
        .iter()
        .filter(|r| !r.verified)
        .count();
    eprintln!(
        "Done: {} citation check(s) across {} iteration(s), {} unverified, {} oracle tokens (verification + correction).",
        checked, result.iterations_performed, unverified, result.tokens_used
    );
    if !result.fully_verified {
        eprintln!("Some citations were left unverified; see the JSON output for detail.");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", result.final_content);
    }

    Ok(())
}
