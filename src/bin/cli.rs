// LCP Core - Readium LCP removal for EPUB books
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use lcp_core::{inspect, EntryAction, EpubDecrypter, LcpError, License};

#[derive(Parser)]
#[command(name = "lcp-decrypt")]
#[command(about = "Remove Readium LCP protection from EPUB books", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt a protected EPUB into a new file
    Decrypt {
        /// User key (hashed passphrase), 64 hex characters
        #[arg(short = 'k', long, env = "LCP_USER_KEY", hide_env_values = true)]
        user_key: String,
        /// License file to use instead of the embedded META-INF/license.lcpl
        #[arg(short, long)]
        license: Option<PathBuf>,
        /// Protected EPUB
        input: PathBuf,
        /// Destination for the decrypted EPUB
        output: PathBuf,
    },
    /// Show the license and protected resources of an EPUB
    Inspect {
        /// License file to use instead of the embedded META-INF/license.lcpl
        #[arg(short, long)]
        license: Option<PathBuf>,
        /// Protected EPUB
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Decrypt {
            user_key,
            license,
            input,
            output,
        } => run_decrypt(&user_key, license.as_deref(), &input, &output),
        Commands::Inspect { license, input } => run_inspect(license.as_deref(), &input),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<LcpError>() {
                Some(lcp) => eprintln!("Error: {}", lcp.user_message()),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_license(path: Option<&Path>) -> Result<Option<License>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let file = File::open(path).with_context(|| format!("opening license {}", path.display()))?;
    let license = License::from_reader(BufReader::new(file))
        .with_context(|| format!("reading license {}", path.display()))?;
    Ok(Some(license))
}

fn run_decrypt(user_key: &str, license: Option<&Path>, input: &Path, output: &Path) -> Result<()> {
    let mut decrypter = EpubDecrypter::from_hex(user_key)?;
    if let Some(license) = load_license(license)? {
        decrypter = decrypter.with_license(license);
    }

    let source = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let destination =
        File::create(output).with_context(|| format!("creating {}", output.display()))?;

    let result = write_output(&decrypter, source, destination);
    if result.is_err() {
        if let Err(e) = fs::remove_file(output) {
            warn!(path = %output.display(), error = %e, "failed to remove partial output");
        }
    }
    result?;

    println!("Decrypted {} -> {}", input.display(), output.display());
    Ok(())
}

fn write_output(decrypter: &EpubDecrypter, source: File, destination: File) -> Result<()> {
    let writer = decrypter.decrypt_with_progress(
        BufReader::new(source),
        BufWriter::new(destination),
        |event| {
            let action = match event.action {
                EntryAction::Decrypted => "decrypted",
                EntryAction::Copied => "copied",
                EntryAction::Directory => "directory",
            };
            debug!(
                "[{}/{}] {} {}",
                event.index + 1,
                event.total,
                action,
                event.name
            );
        },
    )?;

    let file = writer
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flushing output")?;
    file.sync_all().context("syncing output")?;
    Ok(())
}

fn run_inspect(license: Option<&Path>, input: &Path) -> Result<()> {
    let license = load_license(license)?;
    let source = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let info = inspect(BufReader::new(source), license)?;

    println!("License:    {}", info.license.id);
    if let Some(provider) = &info.license.provider {
        println!("Provider:   {}", provider);
    }
    if let Some(issued) = &info.license.issued {
        println!("Issued:     {}", issued);
    }
    if let Some(updated) = &info.license.updated {
        println!("Updated:    {}", updated);
    }
    if let Some(profile) = &info.license.encryption.profile {
        println!("Profile:    {}", profile);
    }

    println!("Protected resources: {}", info.entries.len());
    for entry in &info.entries {
        let compressed = if entry.is_compressed { ", deflated" } else { "" };
        println!("  {} ({}{})", entry.path, entry.algorithm, compressed);
    }
    Ok(())
}
