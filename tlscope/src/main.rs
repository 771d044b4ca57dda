//! tlscope: observe and grade TLS certificate chains.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tlscope_lib::{
    evaluate_all, load_run_config, parse_pem_bundle, parse_stored, validate_chain, Chain,
    CertificateStore, MemoryStore, ObservationBuilder, TrustStoreSet, NO_PARENT,
};

#[derive(Parser)]
#[command(name = "tlscope", about = "Observe and grade TLS certificate chains")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize a single certificate (PEM or DER) to its stored JSON form
    Show {
        /// Certificate file
        file: PathBuf,
    },
    /// Validate an observed chain against the five root stores and emit the
    /// observation record
    Observe {
        /// PEM file with the observed chain, leaf first
        chain: PathBuf,
        /// Scan target hostname
        #[arg(long)]
        target: String,
        /// Observed IP
        #[arg(long, default_value = "")]
        ip: String,
        /// Directory holding ubuntu.pem, mozilla.pem, microsoft.pem,
        /// apple.pem, and android.pem root bundles
        #[arg(long, value_name = "DIR")]
        ca_dir: PathBuf,
    },
    /// Evaluate the assertions of a run file against an observed chain
    /// (exit code 0 = all pass, 1 = failure)
    Check {
        /// YAML run file
        #[arg(long)]
        config: PathBuf,
        /// PEM file with the observed chain, leaf first
        chain: PathBuf,
        /// Scan target hostname
        #[arg(long)]
        target: String,
        /// Observed IP
        #[arg(long, default_value = "")]
        ip: String,
        /// Root bundle directory (see `observe`)
        #[arg(long, value_name = "DIR")]
        ca_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Show { file } => show(&file),
        Commands::Observe {
            chain,
            target,
            ip,
            ca_dir,
        } => observe(&chain, &target, &ip, &ca_dir),
        Commands::Check {
            config,
            chain,
            target,
            ip,
            ca_dir,
        } => check(&config, &chain, &target, &ip, &ca_dir),
    }
}

/// Read a certificate file as PEM when it looks like PEM, raw DER otherwise.
fn read_single_cert(path: &PathBuf) -> Result<Vec<u8>> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let looks_pem = data
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take(10)
        .eq(b"-----BEGIN".iter());
    if looks_pem {
        let mut certs = parse_pem_bundle(&data)?;
        Ok(certs.remove(0))
    } else {
        Ok(data)
    }
}

fn show(file: &PathBuf) -> Result<()> {
    let der = read_single_cert(file)?;
    let stored = parse_stored(&der, NO_PARENT, "", "", Utc::now())?;
    println!("{}", serde_json::to_string_pretty(&stored)?);
    Ok(())
}

fn observe(chain_path: &PathBuf, target: &str, ip: &str, ca_dir: &PathBuf) -> Result<()> {
    let stores = TrustStoreSet::load(ca_dir)?;

    let pem = std::fs::read(chain_path)
        .with_context(|| format!("reading {}", chain_path.display()))?;
    let chain = Chain {
        domain: target.to_string(),
        ip: ip.to_string(),
        certs: parse_pem_bundle(&pem)?,
    };

    let validated = validate_chain(&chain, &stores, Utc::now())?;
    let store = MemoryStore::new();
    let observation = ObservationBuilder::new(&store).record(&chain, &validated)?;

    let certificates: Vec<_> = observation
        .chain_sha256s
        .iter()
        .filter_map(|sha| store.get(sha).ok().flatten())
        .collect();
    let output = serde_json::json!({
        "observation": observation,
        "certificates": certificates,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn check(
    config_path: &PathBuf,
    chain_path: &PathBuf,
    target: &str,
    ip: &str,
    ca_dir: &PathBuf,
) -> Result<()> {
    let config = load_run_config(config_path)?;
    for skipped in &config.skipped {
        eprintln!("warning: {}", skipped);
    }
    if config.runs.is_empty() {
        bail!("no usable runs in {}", config_path.display());
    }

    let stores = TrustStoreSet::load(ca_dir)?;
    let pem = std::fs::read(chain_path)
        .with_context(|| format!("reading {}", chain_path.display()))?;
    let chain = Chain {
        domain: target.to_string(),
        ip: ip.to_string(),
        certs: parse_pem_bundle(&pem)?,
    };

    let now = Utc::now();
    let validated = validate_chain(&chain, &stores, now)?;
    let store = MemoryStore::new();
    let observation = ObservationBuilder::new(&store).record(&chain, &validated)?;
    let leaf = store.get(&observation.leaf_sha256)?;

    let mut all_pass = true;
    let mut results = Vec::new();
    for run in &config.runs {
        if !run.targets.iter().any(|t| t == target) {
            continue;
        }
        let (pass, verdicts) = evaluate_all(&run.assertions, leaf.as_ref(), &observation, now);
        all_pass &= pass;
        results.push(serde_json::json!({
            "cron": run.cron.as_str(),
            "pass": pass,
            "verdicts": verdicts,
        }));
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    if !all_pass {
        std::process::exit(1);
    }
    Ok(())
}
