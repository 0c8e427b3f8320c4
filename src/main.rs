use std::path::PathBuf;
use std::process::ExitCode;

use babelstorage::{
    download, generate_keypair, info as record_info, load, save, signature, upload,
    verify_metadata, BabelError, CancellationToken, HttpOracleClient, OracleConfig,
};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "babel", version = "0.5.0", about = "Babel Storage Protocol CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the Library of Babel oracle.
    #[arg(long, global = true, default_value = "https://libraryofbabel.info")]
    oracle_base_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress, chunk, and store a file as oracle coordinates
    Upload {
        input: PathBuf,
        #[arg(long)]
        metadata: PathBuf,
        /// Enable signing
        #[arg(long)]
        privkey: Option<PathBuf>,
        #[arg(long)]
        quiet: bool,
    },
    /// Reconstruct a file from its metadata
    Download {
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Enable signature verification
        #[arg(long)]
        pubkey: Option<PathBuf>,
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        quiet: bool,
    },
    /// Offline integrity and signature checks, no network
    #[command(name = "verify-metadata")]
    VerifyMetadata {
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long)]
        pubkey: Option<PathBuf>,
        #[arg(long)]
        strict: bool,
    },
    /// Print a human-readable summary of a metadata file
    Info {
        #[arg(long)]
        metadata: PathBuf,
    },
    /// Generate an RSA-PSS keypair for signing/verification
    Keygen {
        #[arg(long)]
        privkey: PathBuf,
        #[arg(long)]
        pubkey: PathBuf,
        #[arg(long, default_value = "4096")]
        bits: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("error: {err}");
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &CliError) -> ExitCode {
    match err {
        CliError::Usage(_) => ExitCode::from(2),
        CliError::Babel(e) => match e {
            BabelError::ChunkHashMismatch { .. }
            | BabelError::FileHashMismatch { .. }
            | BabelError::ChunkLengthMismatch { .. }
            | BabelError::BadSignature
            | BabelError::MissingSignature => ExitCode::from(3),
            BabelError::OracleUnavailable { .. } | BabelError::OracleProtocolError { .. } => {
                ExitCode::from(4)
            }
            _ => ExitCode::from(1),
        },
        CliError::Other(_) => ExitCode::from(1),
    }
}

enum CliError {
    Usage(String),
    Babel(BabelError),
    Other(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Usage(m) => write!(f, "{m}"),
            CliError::Babel(e) => write!(f, "{e}"),
            CliError::Other(m) => write!(f, "{m}"),
        }
    }
}

impl From<BabelError> for CliError {
    fn from(e: BabelError) -> Self {
        CliError::Babel(e)
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Other(e.to_string())
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let oracle = HttpOracleClient::new(OracleConfig {
        base_url: cli.oracle_base_url,
        ..OracleConfig::default()
    })?;
    let cancel = CancellationToken::new();

    match cli.command {
        Commands::Upload { input, metadata, privkey, quiet } => {
            let data = std::fs::read(&input)?;
            let private_pem = privkey.map(std::fs::read_to_string).transpose()?;
            let original_name = input
                .file_name()
                .ok_or_else(|| CliError::Usage("input path has no file name".to_string()))?
                .to_string_lossy()
                .to_string();

            let (record, _progress) =
                upload(&data, &original_name, private_pem.as_deref(), &oracle, &cancel).await?;
            std::fs::write(&metadata, save(&record)?)?;

            if !quiet {
                println!("uploaded {} → {}", input.display(), metadata.display());
                println!("  {}", record_info(&record));
            }
        }

        Commands::Download { metadata, output, pubkey, strict, quiet } => {
            let bytes = std::fs::read(&metadata)?;
            let record = load(&bytes, strict)?;
            let public_pem = pubkey.map(std::fs::read_to_string).transpose()?;

            let (outcome, _progress) =
                download(&record, public_pem.as_deref(), strict, &oracle, &cancel).await?;
            std::fs::write(&output, &outcome.bytes)?;

            if !quiet {
                println!("downloaded {} → {}", metadata.display(), output.display());
                if !outcome.verified {
                    println!("  WARNING: reconstruction unverified ({} warning(s)):", outcome.warnings.len());
                    for w in &outcome.warnings {
                        println!("    - {w}");
                    }
                }
            }
        }

        Commands::VerifyMetadata { metadata, pubkey, strict } => {
            let bytes = std::fs::read(&metadata)?;
            let record = load(&bytes, strict)?;
            let public_pem = pubkey.map(std::fs::read_to_string).transpose()?;

            let report = verify_metadata(&record, public_pem.as_deref(), strict);
            println!("{}", report.summary());
            for check in &report.checks {
                let status = if check.passed { "ok" } else { "FAIL" };
                match &check.detail {
                    Some(detail) => println!("  [{status}] {}: {detail}", check.name),
                    None => println!("  [{status}] {}", check.name),
                }
            }
            if strict && !report.is_healthy() {
                // Re-derive the most specific error kind for whichever
                // check failed first, so the exit code reflects §6.3
                // instead of collapsing every anomaly into SchemaError.
                for check in &report.checks {
                    if check.passed {
                        continue;
                    }
                    let err = match check.name {
                        "signature" => match public_pem.as_deref() {
                            Some(key) => signature::verify(&record, key).unwrap_err(),
                            None => BabelError::MissingSignature,
                        },
                        _ => match record.check_structure() {
                            Err(e) => e,
                            Ok(()) => BabelError::SchemaError(format!(
                                "{} check failed under --strict",
                                check.name
                            )),
                        },
                    };
                    return Err(CliError::Babel(err));
                }
            }
        }

        Commands::Info { metadata } => {
            let bytes = std::fs::read(&metadata)?;
            let record = load(&bytes, false)?;
            println!("{}", record_info(&record));
        }

        Commands::Keygen { privkey, pubkey, bits } => {
            let (private_pem, public_pem) = generate_keypair(bits)?;
            std::fs::write(&privkey, private_pem)?;
            std::fs::write(&pubkey, public_pem)?;
            println!("wrote {} and {}", privkey.display(), pubkey.display());
        }
    }

    Ok(())
}
