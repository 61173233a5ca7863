//! Interactive structured-light scanning console.
//!
//! Reads the XML configuration, opens the configured acquisition backend and
//! runs the key-driven menu loop. Recoverable errors are reported and return
//! to the menu; fatal startup errors exit non-zero. The configuration is
//! written back on clean exit.

use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, warn};
use serde::{Deserialize, Serialize};

use procam_core::ScanParams;
use procam_pipeline::{open_source, Backend, Command, NullDisplay, ScanSession, SessionConfig};

/// Structured-light 3D scanner console.
#[derive(Debug, Parser)]
#[command(author, version, about = "Projector-camera structured-light 3D scanner")]
struct Args {
    /// Path to the XML configuration file.
    #[arg(long, default_value = "./config.xml")]
    config: PathBuf,
}

/// On-disk configuration: output locations, backend selection and the scan
/// parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "config")]
struct ScanConfig {
    /// Root output directory for calibration files and scans.
    outdir: PathBuf,
    /// Object name; scans land in `<outdir>/<object>/v<N>/`.
    object: String,
    /// Acquisition backend.
    #[serde(default)]
    backend: Backend,
    /// Frame directory for the directory-replay backend.
    #[serde(default)]
    replay_dir: Option<PathBuf>,
    /// Dump raw captured frames next to each point cloud.
    #[serde(default)]
    save_frames: bool,
    params: ScanParams,
}

fn load_config(path: &Path) -> Result<ScanConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("missing configuration file {}", path.display()))?;
    quick_xml::de::from_str(&text)
        .with_context(|| format!("malformed configuration file {}", path.display()))
}

fn store_config(path: &Path, config: &ScanConfig) -> Result<()> {
    let body = quick_xml::se::to_string(config).context("encoding configuration")?;
    fs::write(path, body)
        .with_context(|| format!("writing configuration file {}", path.display()))
}

fn main() {
    env_logger::init();
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    let source = open_source(config.backend, config.replay_dir.as_deref())
        .context("opening the acquisition backend")?;
    let mut session = ScanSession::new(
        config.params.clone(),
        source,
        Box::new(NullDisplay),
        SessionConfig {
            outdir: config.outdir.clone(),
            object: config.object.clone(),
            save_frames: config.save_frames,
        },
    );
    session.start().context("starting the capture session")?;

    println!("[Structured Lighting for 3D Scanning]");
    println!("{}", Command::menu());
    for line in io::stdin().lock().lines() {
        let line = line.context("reading keyboard input")?;
        let Some(command) = line.trim().chars().next().and_then(Command::from_key) else {
            println!("{}", Command::menu());
            continue;
        };
        if command == Command::Exit {
            break;
        }

        match session.dispatch(command) {
            Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
            Err(err) => error!("{err}"),
        }
        println!("{}", Command::menu());
    }

    session.shutdown();
    if let Err(err) = store_config(&args.config, &config) {
        warn!("{err:#}");
    }
    Ok(())
}
