// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// CertVault: encrypted evidence storage and signed CERT escalation.
//
// Entry point. Initialises logging, reads configuration from the process
// environment, and runs one subcommand.

mod services;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use certvault_core::error::Result;
use certvault_core::types::{EvidenceType, RiskLabel};
use certvault_core::CertVaultConfig;
use certvault_security::FileNaming;

use services::AppServices;

/// CertVault: encrypted evidence storage and signed CERT escalation
#[derive(Parser, Debug)]
#[command(name = "certvault")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the SHA-256 fingerprint of a file
    Fingerprint {
        file: PathBuf,
    },

    /// Encrypt a file into the evidence store
    Store {
        file: PathBuf,

        /// Naming hint for the stored file (defaults to the input file name)
        #[arg(long)]
        hint: Option<String>,

        /// Use `<hint>_<fingerprint prefix>.enc` exactly, replacing any
        /// earlier upload with the same name and content prefix
        #[arg(long)]
        compatible_names: bool,
    },

    /// Decrypt a stored evidence file
    Decrypt {
        path: PathBuf,

        /// Write plaintext here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,

        /// Expected SHA-256 of the plaintext
        #[arg(long)]
        fingerprint: Option<String>,
    },

    /// Produce an X-CERT-Signature header for a file's bytes
    Sign {
        file: PathBuf,

        /// Unix timestamp to sign with (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },

    /// Check a file's bytes against an X-CERT-Signature header
    Verify {
        file: PathBuf,
        header: String,
    },

    /// Report a risk change and push to the CERT if it enters Critical
    Escalate {
        incident_id: i64,
        reporter: String,
        evidence_type: EvidenceType,

        /// Risk label before the change
        #[arg(long, default_value = "Safe")]
        from: RiskLabel,

        /// Risk label after the change
        #[arg(long, default_value = "Critical")]
        to: RiskLabel,

        /// Attach this file as the latest evidence (stored first)
        #[arg(long)]
        evidence: Option<PathBuf>,

        /// Extra delivery attempts on transient failure
        #[arg(long, default_value = "0")]
        retries: u32,
    },

    /// Run the CERT ingest endpoint until interrupted
    ServeIngest {
        #[arg(long, default_value = "127.0.0.1:8088")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match CertVaultConfig::from_lookup(|key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, AppServices::new(config)).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, services: AppServices) -> Result<ExitCode> {
    match command {
        Commands::Fingerprint { file } => {
            println!("{}", services.fingerprint_file(&file)?);
        }
        Commands::Store {
            file,
            hint,
            compatible_names,
        } => {
            let naming = if compatible_names {
                FileNaming::Compatible
            } else {
                FileNaming::Unique
            };
            let record = services.store_file(&file, hint.as_deref(), naming)?;
            println!("{}\t{}", record.storage_path.display(), record.fingerprint);
        }
        Commands::Decrypt {
            path,
            out,
            fingerprint,
        } => {
            services.decrypt_file(&path, out.as_deref(), fingerprint)?;
        }
        Commands::Sign { file, timestamp } => {
            println!("{}", services.sign_file(&file, timestamp)?);
        }
        Commands::Verify { file, header } => {
            if services.verify_file(&file, &header)? {
                println!("valid");
            } else {
                println!("invalid");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Escalate {
            incident_id,
            reporter,
            evidence_type,
            from,
            to,
            evidence,
            retries,
        } => {
            let request = services::EscalationRequest {
                incident_id,
                reporter_id: reporter,
                evidence_type,
                previous: from,
                current: to,
                evidence,
                retries,
            };
            match services.escalate(request).await? {
                Some(report) => {
                    println!("{}", serde_json::to_string(&report)?);
                    if !report.delivered {
                        return Ok(ExitCode::FAILURE);
                    }
                }
                None => println!("no escalation required"),
            }
        }
        Commands::ServeIngest { bind } => {
            services.serve_ingest(bind).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}
