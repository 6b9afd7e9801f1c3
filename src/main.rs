use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lead_scoring_engine::clock::system_clock;
use lead_scoring_engine::config::Config;
use lead_scoring_engine::export;
use lead_scoring_engine::models::RunParams;
use lead_scoring_engine::pipeline::Pipeline;
use lead_scoring_engine::scoring::DEFAULT_HIGH_DEBT_THRESHOLD;

/// Enrich uploaded lead files against public registries and score them.
#[derive(Parser)]
#[command(name = "lead-scoring")]
#[command(version)]
#[command(after_help = "\
Examples:
  lead-scoring leads.csv --output scored.csv
  lead-scoring fns.csv gosuslugi.csv -o scored.csv --errors errors.csv --region Москва --exclude-bankrupt")]
struct Cli {
    /// Delimited lead files (CSV, semicolon or tab separated)
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Where to write scored leads
    #[arg(long, short = 'o')]
    output: PathBuf,

    /// Where to write the enrichment error report
    #[arg(long)]
    errors: Option<PathBuf>,

    /// Keep only leads from this region (repeatable)
    #[arg(long = "region")]
    regions: Vec<String>,

    /// Total debt above which a lead earns the high-debt bonus
    #[arg(long, default_value_t = DEFAULT_HIGH_DEBT_THRESHOLD)]
    min_debt: f64,

    #[arg(long)]
    exclude_bankrupt: bool,

    #[arg(long)]
    exclude_no_debt: bool,

    #[arg(long)]
    only_with_property: bool,

    #[arg(long)]
    only_bank_mfo_debt: bool,

    #[arg(long)]
    only_recent_court_order: bool,

    #[arg(long)]
    only_active_inn: bool,

    /// Blend the configured probability model into the score
    #[arg(long)]
    use_ml_model: bool,
}

impl Cli {
    fn run_params(&self) -> RunParams {
        RunParams {
            regions: self.regions.clone(),
            min_debt_amount: self.min_debt,
            exclude_bankrupt: self.exclude_bankrupt,
            exclude_no_debt: self.exclude_no_debt,
            only_with_property: self.only_with_property,
            only_bank_mfo_debt: self.only_bank_mfo_debt,
            only_recent_court_order: self.only_recent_court_order,
            only_active_inn: self.only_active_inn,
            use_ml_model: self.use_ml_model,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_scoring_engine=info,lead_scoring=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let pipeline = Pipeline::from_config(&config, system_clock());
    if let Some(url) = &config.proxy_check_url {
        if pipeline.engine().check_proxies(url, config.request_timeout()).await == Some(0) {
            tracing::warn!("⚠ No working proxies, requests will rotate through the full list");
        }
    }
    let report = pipeline.run_files(&cli.files, &cli.run_params()).await?;

    export::export_scored(&cli.output, &report.leads)?;
    if let Some(path) = &cli.errors {
        export::export_errors(path, &report.errors)?;
    }

    println!("Run {}", report.run_id);
    println!(
        "  records read:       {}",
        report.normalization.records_in
    );
    println!("  unique leads:       {}", report.normalization.records_out);
    println!("  enriched:           {}", report.enriched);
    println!("  scored (filtered):  {}", report.leads.len());
    println!(
        "  targets:            {} ({:.1}%)",
        report.scoring.target_leads, report.scoring.target_percentage
    );
    println!("  average score:      {:.1}", report.scoring.avg_score);
    println!("  enrichment errors:  {}", report.errors.len());
    for (group, count) in &report.scoring.groups_distribution {
        println!("    {:<24}{}", group, count);
    }
    if let Some(proxies) = report.enrichment.proxies {
        println!(
            "  proxies:            {} healthy / {} total",
            proxies.healthy, proxies.total
        );
    }

    Ok(())
}
