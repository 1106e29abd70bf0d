//! Command-line front end for layerfind.
//!
//! `layerfind` resolves a local Docker image to its layers and lists the
//! entries of each layer's extracted content, optionally restricted to a
//! directory, a set of file types and name or path patterns.

use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fn_error_context::context;
use log::debug;
use serde::Serialize;

use layerfind::digest::strip_algorithm;
use layerfind::{chain_id, EngineSection, FileType, FinderConfig, OnError, ScopeFilter};

/// layerfind
#[derive(Debug, Parser)]
#[clap(name = "layerfind", version)]
pub struct App {
    /// Read settings from this TOML file
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Docker data root (default /var/lib/docker)
    #[clap(long, global = true)]
    docker_root: Option<PathBuf>,

    /// Ask the Docker daemon at this address (tcp://, http:// or https://)
    /// for image metadata instead of reading it from the data root
    #[clap(long, global = true)]
    host: Option<String>,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Parser)]
struct FindOptions {
    /// Image id, unique id prefix, or repository reference
    image: String,

    /// Only look inside this directory of the image
    #[clap(long)]
    start_dir: Option<PathBuf>,

    /// Report only this kind of entry: file, dir or symlink (repeatable)
    #[clap(long = "type", value_name = "TYPE")]
    types: Vec<FileType>,

    /// Regular expression the entry's base name must match entirely
    #[clap(long)]
    name: Option<String>,

    /// Regular expression the entry's image path must match entirely
    #[clap(long)]
    path: Option<String>,

    /// Do not descend more than this many levels into a layer
    #[clap(long)]
    max_depth: Option<usize>,

    /// Skip unreadable directories instead of failing
    #[clap(long)]
    skip_errors: bool,

    /// Walk layers concurrently
    #[clap(long)]
    parallel: bool,

    /// Print one JSON object per line
    #[clap(long)]
    json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the entries of an image's layers
    Find(FindOptions),
    /// Show an image's layers and where their content is stored
    Layers {
        /// Image id, unique id prefix, or repository reference
        image: String,
        /// Print one JSON object per line
        #[clap(long)]
        json: bool,
    },
    /// Compute a chain id from the parent's chain id and a diff id
    ChainId {
        /// Chain id of the parent layer (sha256:...)
        parent: String,
        /// Diff id of the layer (sha256:...)
        diff: String,
    },
}

/// One line of `find` output.
#[derive(Debug, Serialize)]
struct Row<'a> {
    layer: usize,
    chain_id: &'a str,
    #[serde(rename = "type")]
    file_type: FileType,
    image_path: Cow<'a, str>,
    host_path: Cow<'a, str>,
}

#[context("Reading configuration file {}", path.display())]
fn read_config(path: &Path) -> Result<FinderConfig> {
    Ok(FinderConfig::load(path)?)
}

/// Combines the configuration file (if any) with the global flags.
fn load_config(args: &App) -> Result<FinderConfig> {
    let mut config = match &args.config {
        Some(path) => read_config(path)?,
        None => FinderConfig::default(),
    };

    if let Some(root) = &args.docker_root {
        config.docker_root = root.clone();
    }
    if let Some(host) = &args.host {
        match &mut config.engine {
            Some(engine) => engine.host = host.clone(),
            None => config.engine = Some(EngineSection::new(host.clone())),
        }
    }
    debug!("{config:?}");
    Ok(config)
}

fn scope_filter(opts: &FindOptions) -> Result<ScopeFilter> {
    let mut filter = ScopeFilter::new();
    if let Some(dir) = &opts.start_dir {
        filter = filter.with_start_dir(dir);
    }
    if !opts.types.is_empty() {
        filter = filter.with_types(opts.types.iter().copied());
    }
    if let Some(pattern) = &opts.name {
        filter = filter.with_name_regex(pattern)?;
    }
    if let Some(pattern) = &opts.path {
        filter = filter.with_full_path_regex(pattern)?;
    }
    Ok(filter)
}

fn find(mut config: FinderConfig, opts: &FindOptions, out: &mut impl Write) -> Result<()> {
    if let Some(depth) = opts.max_depth {
        config.max_depth = depth;
    }
    if opts.skip_errors {
        config.on_error = OnError::Skip;
    }
    if opts.parallel {
        config.parallel = true;
    }

    let filter = scope_filter(opts)?;
    let scan = config
        .build_locator()?
        .locate(&opts.image, &filter)
        .with_context(|| format!("Searching image {}", opts.image))?;

    for record in scan.records() {
        let row = Row {
            layer: record.layer().order(),
            chain_id: record.layer().chain_id(),
            file_type: record.file_type(),
            image_path: record.image_path().to_string_lossy(),
            host_path: record.host_path().to_string_lossy(),
        };
        if opts.json {
            serde_json::to_writer(&mut *out, &row)?;
            writeln!(out)?;
        } else {
            writeln!(
                out,
                "{:>3}  {:<7}  {}  {}",
                row.layer,
                row.file_type.as_str(),
                row.image_path,
                row.host_path
            )?;
        }
    }

    for skipped in scan.skipped() {
        eprintln!(
            "layerfind: layer {}: skipped {}: {}",
            skipped.layer,
            skipped.path.display(),
            skipped.reason
        );
    }
    Ok(())
}

fn layers(config: FinderConfig, image: &str, json: bool, out: &mut impl Write) -> Result<()> {
    let layers = config
        .build_locator()?
        .layers(image)
        .with_context(|| format!("Resolving layers of {image}"))?;

    for layer in &layers {
        if json {
            serde_json::to_writer(&mut *out, layer)?;
            writeln!(out)?;
        } else {
            writeln!(
                out,
                "{:>3}  {}  {}  {}",
                layer.order(),
                layer.diff_id(),
                layer.chain_id(),
                layer.cache_id()
            )?;
        }
    }
    Ok(())
}

fn run(args: App, out: &mut impl Write) -> Result<()> {
    match &args.cmd {
        Command::Find(opts) => find(load_config(&args)?, opts, out),
        Command::Layers { image, json } => layers(load_config(&args)?, image, *json, out),
        Command::ChainId { parent, diff } => {
            strip_algorithm(parent).context("Parsing parent chain id")?;
            strip_algorithm(diff).context("Parsing diff id")?;
            writeln!(out, "{}", chain_id(parent, diff))?;
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let args = App::parse();
    run(args, &mut std::io::stdout().lock())
}
