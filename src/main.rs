use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

use fieldquote::config::FieldQuoteConfig;
use fieldquote::lifecycle::StatusStateMachine;
use fieldquote::model::{LineItem, Money, Queue, RecordKind, Status, TaxRate, Totals};
use fieldquote::pricing::{
    reconcile, Catalog, CatalogEntry, CatalogPriceResolver, RawProposal, ReconcilePolicy,
    RemovalPolicy,
};
use fieldquote::telemetry::init_telemetry;

#[derive(Parser)]
#[command(name = "fieldquote")]
#[command(about = "Work-item lifecycle and quote reconciliation for field-service businesses")]
#[command(long_about = "fieldquote merges AI-proposed line items into saved quotes, validates prices \
                       against a tenant catalog and explains the work-item lifecycle. Start with \
                       'fieldquote reconcile --proposal reply.txt'.")]
struct Cli {
    /// Configuration file (defaults to ./fieldquote.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Lead,
    Quote,
}

impl From<KindArg> for RecordKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Lead => RecordKind::Lead,
            KindArg::Quote => RecordKind::Quote,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a proposal into a saved item set and print the result as JSON
    Reconcile {
        /// Model reply or JSON object with a `line_items` array
        #[arg(long)]
        proposal: PathBuf,
        /// JSON array of saved line items
        #[arg(long)]
        existing: Option<PathBuf>,
        /// JSON array of catalog entries
        #[arg(long)]
        catalog: Option<PathBuf>,
        /// Drop saved items the proposal does not mention
        #[arg(long)]
        replace: bool,
        /// Accept items that are not in the catalog
        #[arg(long)]
        allow_uncataloged: bool,
        /// Quote-level discount in cents
        #[arg(long, default_value_t = 0)]
        discount_cents: i64,
    },
    /// Print every status with its queue and allowed next states
    Lifecycle {
        #[arg(long, value_enum, default_value = "quote")]
        kind: KindArg,
    },
    /// Print the effective configuration as TOML
    Config {
        /// Also write it to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = FieldQuoteConfig::load_env_file();
    let config = FieldQuoteConfig::load_from(cli.config.as_deref())?;
    init_telemetry(&config.observability)?;

    match cli.command {
        Commands::Reconcile {
            proposal,
            existing,
            catalog,
            replace,
            allow_uncataloged,
            discount_cents,
        } => reconcile_command(
            &config,
            &proposal,
            existing.as_deref(),
            catalog.as_deref(),
            replace,
            allow_uncataloged,
            Money::from_cents(discount_cents),
        ),
        Commands::Lifecycle { kind } => lifecycle_command(kind.into()),
        Commands::Config { output } => config_command(&config, output.as_deref()),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn reconcile_command(
    config: &FieldQuoteConfig,
    proposal_path: &Path,
    existing_path: Option<&Path>,
    catalog_path: Option<&Path>,
    replace: bool,
    allow_uncataloged: bool,
    discount: Money,
) -> Result<()> {
    let text = fs::read_to_string(proposal_path)
        .with_context(|| format!("reading {}", proposal_path.display()))?;
    let proposal = RawProposal::from_model_text(&text)?.validate()?;

    let existing: Vec<LineItem> = match existing_path {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let catalog = match catalog_path {
        Some(path) => Catalog::with_entries(read_json::<Vec<CatalogEntry>>(path)?),
        None => Catalog::new(),
    };

    let policy = ReconcilePolicy {
        removal: if replace {
            RemovalPolicy::Replace
        } else {
            config.pricing.removal_policy
        },
        resolver: CatalogPriceResolver::new(
            config.pricing.price_tolerance_bps,
            allow_uncataloged || config.pricing.allow_uncataloged,
        ),
    };

    let result = reconcile(&existing, &proposal, &catalog, &policy)?;
    let tax_rate = proposal
        .tax_rate()
        .unwrap_or(TaxRate::from_bps(config.pricing.default_tax_rate_bps));
    let totals = Totals::compute(result.subtotal, discount, tax_rate)?;
    if totals.pre_tax().is_negative() {
        anyhow::bail!("discount {} exceeds subtotal {}", discount, totals.subtotal);
    }

    let output = json!({
        "items": result.items,
        "diff": result.diff,
        "totals": totals,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn lifecycle_command(kind: RecordKind) -> Result<()> {
    println!("{:<12} {:<17} next", "status", "queue");
    for status in Status::ALL {
        if kind == RecordKind::Lead && !matches!(status, Status::Lead | Status::Draft | Status::Archived) {
            continue;
        }
        let targets: Vec<&str> = StatusStateMachine::allowed_targets(kind, status)
            .into_iter()
            .map(Status::as_str)
            .collect();
        let next = if targets.is_empty() {
            "(terminal)".to_string()
        } else {
            targets.join(", ")
        };
        println!("{:<12} {:<17} {}", status.as_str(), queue_name(Queue::of(status)), next);
    }
    Ok(())
}

fn queue_name(queue: Queue) -> &'static str {
    match queue {
        Queue::Leads => "leads",
        Queue::Quotes => "quotes",
        Queue::ToSchedule => "to_schedule",
        Queue::Jobs => "jobs",
        Queue::AwaitingPayment => "awaiting_payment",
        Queue::Closed => "closed",
    }
}

fn config_command(config: &FieldQuoteConfig, output: Option<&Path>) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    if let Some(path) = output {
        config.save_to_file(path)?;
        eprintln!("Configuration written to {}", path.display());
    }
    Ok(())
}
