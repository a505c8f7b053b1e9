//! evidence_decrypt - operator tool for encrypted evidence containers
//!
//! Decrypts an `.enc` file, verifies both integrity layers, and either
//! prints the segment summary (`--verify-only`) or extracts the frames as
//! JPEG files plus a metadata JSON into an output directory.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use edge_vision::{decode_package, Vault};

#[derive(Parser, Debug)]
#[command(name = "evidence_decrypt", about = "Decrypt and verify evidence containers")]
struct Args {
    /// Evidence container (.enc) to decrypt.
    file: PathBuf,

    /// Path to the symmetric key file.
    #[arg(long, default_value = "keys/master.key")]
    key: PathBuf,

    /// Verify integrity and print the summary without writing frames.
    #[arg(long)]
    verify_only: bool,

    /// Directory to extract frames into (default: alongside the input).
    #[arg(long)]
    out: Option<PathBuf>,

    /// RSA private key (PEM) for hybrid containers.
    #[cfg(feature = "hybrid-vault")]
    #[arg(long)]
    rsa_key: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run(Args::parse()) {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let unsealed = open_container(&args)?;

    let (records, meta) = decode_package(&unsealed.payload)
        .context("container decrypted but payload does not parse")?;

    println!("camera:            {}", meta.camera_id);
    println!("frames:            {}", meta.frame_count);
    println!("detections:        {}", meta.total_detections);
    println!("window:            {:.3} .. {:.3}", meta.start_ts, meta.end_ts);
    println!("payload sha256:    {}", unsealed.hash_hex);
    println!("integrity:         verified");

    if args.verify_only {
        return Ok(());
    }

    let out_dir = match args.out {
        Some(dir) => dir,
        None => {
            let stem = args
                .file
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| anyhow!("input file has no name"))?;
            args.file
                .parent()
                .unwrap_or_else(|| std::path::Path::new("."))
                .join(format!("{}_decrypted", stem))
        }
    };
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("create {}", out_dir.display()))?;

    for (i, record) in records.iter().enumerate() {
        let frame_path = out_dir.join(format!("frame_{:05}.jpg", i));
        std::fs::write(&frame_path, &record.jpeg)
            .with_context(|| format!("write {}", frame_path.display()))?;
    }

    let meta_path = out_dir.join("metadata.json");
    std::fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?)?;

    println!("extracted {} frames to {}", records.len(), out_dir.display());
    Ok(())
}

#[cfg(feature = "hybrid-vault")]
fn open_container(args: &Args) -> Result<edge_vision::Unsealed> {
    use edge_vision::HybridVault;

    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("read {}", args.file.display()))?;
    if HybridVault::is_hybrid(&bytes) {
        let rsa_key = args
            .rsa_key
            .as_ref()
            .ok_or_else(|| anyhow!("hybrid container requires --rsa-key"))?;
        let vault = HybridVault::for_decryption(rsa_key)?;
        return vault.decrypt(&bytes);
    }
    let vault = Vault::open(&args.key)?;
    vault.decrypt(&bytes)
}

#[cfg(not(feature = "hybrid-vault"))]
fn open_container(args: &Args) -> Result<edge_vision::Unsealed> {
    let vault = Vault::open(&args.key)?;
    vault.open_file(&args.file)
}
