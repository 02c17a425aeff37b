//! PDF Sealer command line
//!
//! Usage:
//!   pdf_sealer sign --input in.pdf --output out.pdf --signer "Alice" [--config sealer.json]
//!   pdf_sealer issue --subject "Alice" --out-dir keys/
//!   pdf_sealer verify --input signed.pdf [--trust cert.pem]
//!   pdf_sealer serve [--config sealer.json] --enqueue doc-123:alice [--enqueue ...]
//!
//! Logging is controlled by `RUST_LOG`.

use chrono::Utc;
use pdf_sealer::config::SealerConfig;
use pdf_sealer::pipeline::{FsStore, LogSink, MemoryQueue, SigningJob, SigningOrchestrator};
use pdf_sealer::signatures::{IdentityIssuer, SignatureEmbedder, SignatureVerifier};
use pdf_sealer::stamp::VisualStamper;
use pdf_sealer::{Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "usage: pdf_sealer <sign|issue|verify|serve> [options]

  sign    --input <pdf> --output <pdf> --signer <name> [--config <json>]
  issue   --subject <name> --out-dir <dir> [--organization <org>]
  verify  --input <pdf> [--trust <pem>]...
  serve   [--config <json>] [--enqueue <documentKey>:<requestedBy>]...";

/// Parsed `--flag value` pairs; repeated flags keep every value.
struct Args {
    command: String,
    options: HashMap<String, Vec<String>>,
}

impl Args {
    fn from_env() -> Result<Self> {
        let args: Vec<String> = std::env::args().skip(1).collect();
        let command = args
            .first()
            .cloned()
            .ok_or_else(|| Error::Config("missing command".to_string()))?;

        let mut options: HashMap<String, Vec<String>> = HashMap::new();
        let mut i = 1;
        while i < args.len() {
            let flag = args[i]
                .strip_prefix("--")
                .ok_or_else(|| Error::Config(format!("unexpected argument '{}'", args[i])))?;
            i += 1;
            let value = args
                .get(i)
                .cloned()
                .ok_or_else(|| Error::Config(format!("--{} needs a value", flag)))?;
            options.entry(flag.to_string()).or_default().push(value);
            i += 1;
        }
        Ok(Self { command, options })
    }

    fn get(&self, flag: &str) -> Option<&str> {
        self.options.get(flag).and_then(|v| v.last()).map(String::as_str)
    }

    fn require(&self, flag: &str) -> Result<&str> {
        self.get(flag)
            .ok_or_else(|| Error::Config(format!("--{} is required", flag)))
    }

    fn all(&self, flag: &str) -> &[String] {
        self.options.get(flag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Config file if given, then `SEALER_*` overrides.
    fn config(&self) -> Result<SealerConfig> {
        let config = match self.get("config") {
            Some(path) => SealerConfig::from_file(path)?,
            None => SealerConfig::new(),
        };
        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}

fn sign(args: &Args) -> Result<()> {
    let input = PathBuf::from(args.require("input")?);
    let output = PathBuf::from(args.require("output")?);
    let signer = args.require("signer")?;
    let config = args.config()?;

    let original = std::fs::read(&input)?;
    let now = Utc::now();
    let stamped = VisualStamper::new(config.stamp.clone()).stamp(&original, signer, &now)?;
    let identity = config.identity_source()?.identity_for(signer)?;
    let embedded = SignatureEmbedder::new(config.signing.clone()).embed(
        &stamped,
        &identity,
        signer,
        &config.signing.reason,
    )?;
    std::fs::write(&output, &embedded.bytes)?;

    println!(
        "Signed {} -> {} ({} bytes, ByteRange {:?})",
        input.display(),
        output.display(),
        embedded.bytes.len(),
        embedded.byte_range
    );
    Ok(())
}

fn issue(args: &Args) -> Result<()> {
    let subject = args.require("subject")?;
    let out_dir = PathBuf::from(args.require("out-dir")?);
    let issuer = IdentityIssuer::new().with_organization(args.get("organization").map(str::to_string));

    let identity = issuer.issue(subject)?;
    let (key_pem, cert_pem) = identity.to_pem()?;
    std::fs::create_dir_all(&out_dir)?;
    std::fs::write(out_dir.join("key.pem"), key_pem)?;
    std::fs::write(out_dir.join("cert.pem"), cert_pem)?;

    println!(
        "Issued '{}' valid until {} in {}",
        identity.subject().unwrap_or_default(),
        identity.not_after().map(|t| t.to_rfc3339()).unwrap_or_default(),
        out_dir.display()
    );
    Ok(())
}

fn verify(args: &Args) -> Result<bool> {
    let input = PathBuf::from(args.require("input")?);
    let mut verifier = SignatureVerifier::new();
    for trust in args.all("trust") {
        verifier.add_trusted_pem(&std::fs::read_to_string(trust)?)?;
    }

    let pdf = std::fs::read(&input)?;
    let results = verifier.verify_document(&pdf)?;
    if results.is_empty() {
        println!("{}: no signatures", input.display());
        return Ok(false);
    }

    let mut all_ok = true;
    for (i, result) in results.iter().enumerate() {
        let info = &result.signature_info;
        println!("Signature {}: {:?}", i + 1, result.status);
        println!("  Signer:   {}", info.signer_name.as_deref().unwrap_or("-"));
        println!("  Subject:  {}", info.certificate_cn.as_deref().unwrap_or("-"));
        println!("  Issuer:   {}", info.certificate_issuer.as_deref().unwrap_or("-"));
        println!("  Signed:   {}", info.signing_time.as_deref().unwrap_or("-"));
        println!("  Coverage: {}", if info.covers_whole_document { "whole document" } else { "partial" });
        for message in &result.messages {
            println!("  - {}", message);
        }
        all_ok &= result.status.is_ok();
    }
    Ok(all_ok)
}

async fn serve(args: &Args) -> Result<()> {
    let config = args.config()?;
    let store = Arc::new(FsStore::new(&config.store_dir));
    let queue = Arc::new(MemoryQueue::new(config.max_deliveries));

    for spec in args.all("enqueue") {
        let (key, user) = spec
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("--enqueue expects key:user, got '{}'", spec)))?;
        queue.publish(&SigningJob::new(key, user))?;
    }

    let orchestrator = Arc::new(SigningOrchestrator::from_config(config, store, Arc::new(LogSink))?);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let watched = Arc::clone(&queue);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(200));
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Interrupted, finishing jobs in progress");
                    break;
                },
                _ = tick.tick() => {
                    if watched.is_drained() {
                        break;
                    }
                },
            }
        }
        let _ = shutdown_tx.send(true);
    });

    let summary = orchestrator.run(queue.clone(), shutdown_rx).await?;
    println!(
        "{} signed, {} failed, {} dead-lettered",
        summary.done,
        summary.failed,
        queue.dead_letters().len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::from_env() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        },
    };

    let result = match args.command.as_str() {
        "sign" => sign(&args).map(|_| true),
        "issue" => issue(&args).map(|_| true),
        "verify" => verify(&args),
        "serve" => serve(&args).await.map(|_| true),
        other => {
            eprintln!("unknown command '{}'\n\n{}", other, USAGE);
            return ExitCode::from(2);
        },
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        },
    }
}
