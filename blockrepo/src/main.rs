mod output;

use anyhow::{Context, Result};
use blockrepo_core::{
    Algorithm, Blockstore, CancelToken, Cid, Codec, DagReachability, FsBlockstore,
    GarbageCollector, GcConfig, GcEvent, GcReport, IntegrityVerifier, REPO_VERSION, RepoLock,
    StreamStatus, VerifyEvent, dag, repo_stat,
};
use clap::{Parser, Subcommand};
use output::{
    GcOutput, InitOutput, OutputWriter, PinAddOutput, PinInfo, PinListOutput, PinRmOutput,
    PutOutput, StatOutput, StoredBlock, VerifyOutput, VersionOutput, repo_size_line,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Blockrepo - maintenance for a content-addressed block store
#[derive(Parser)]
#[command(name = "blockrepo")]
#[command(about = "Content-addressed block store with garbage collection and verification", long_about = None)]
#[command(version)]
struct Cli {
    /// Repo root directory (defaults to BLOCKREPO_ROOT env var or ./blockrepo)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Write machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new repo
    Init {
        /// Hash algorithm to use
        #[arg(long, default_value = "blake3-256")]
        algo: String,
    },

    /// Store files as raw blocks
    Put {
        /// Files to store
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Pin the last stored block under this name
        #[arg(long)]
        pin: Option<String>,
    },

    /// Store a link node naming existing blocks
    Link {
        /// Links as name=cid
        #[arg(required = true)]
        links: Vec<String>,

        /// Pin the link node under this name
        #[arg(long)]
        pin: Option<String>,
    },

    /// Manage pins (gc roots)
    #[command(subcommand)]
    Pin(PinCommands),

    /// Remove every block not reachable from a pin
    Gc {
        /// Report failed deletions as they happen instead of failing at the first one
        #[arg(long)]
        stream_errors: bool,

        /// Write minimal output
        #[arg(short, long)]
        quiet: bool,

        /// Show what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Re-hash every block and report corruption
    Verify,

    /// Show block count and repo size
    Stat {
        /// Show the repo size in MiB
        #[arg(long)]
        human: bool,
    },

    /// Show the tool and repo format versions
    Version {
        /// Print only the repo format version
        #[arg(short, long)]
        quiet: bool,
    },
}

#[derive(Subcommand)]
enum PinCommands {
    /// Pin a block under a name
    Add {
        /// Pin name
        name: String,

        /// Cid to pin
        cid: String,
    },

    /// List all pins
    Ls,

    /// Remove a pin
    Rm {
        /// Pin name
        name: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let Cli {
        root,
        json,
        command,
    } = Cli::parse();
    let output = OutputWriter::new(json);

    // Determine repo root: CLI arg > BLOCKREPO_ROOT env var > ./blockrepo default
    let root = root
        .or_else(|| std::env::var("BLOCKREPO_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./blockrepo"));

    let result = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
        .and_then(|runtime| runtime.block_on(run(command, &root, &output)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output.write_error(&e, 1);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, root: &Path, output: &OutputWriter) -> Result<()> {
    match command {
        Commands::Init { algo } => cmd_init(root, &algo, output),
        Commands::Put { paths, pin } => cmd_put(root, paths, pin, output).await,
        Commands::Link { links, pin } => cmd_link(root, &links, pin, output).await,
        Commands::Pin(pin_cmd) => match pin_cmd {
            PinCommands::Add { name, cid } => cmd_pin_add(root, &name, &cid, output).await,
            PinCommands::Ls => cmd_pin_ls(root, output),
            PinCommands::Rm { name } => cmd_pin_rm(root, &name, output),
        },
        Commands::Gc {
            stream_errors,
            quiet,
            dry_run,
        } => {
            let config = GcConfig {
                dry_run,
                ..GcConfig::default()
            };
            if stream_errors {
                cmd_gc_stream(root, config, quiet, output).await
            } else {
                cmd_gc_collect(root, config, quiet, output).await
            }
        }
        Commands::Verify => cmd_verify(root, output).await,
        Commands::Stat { human } => cmd_stat(root, human, output).await,
        Commands::Version { quiet } => cmd_version(quiet, output),
    }
}

fn open_store(root: &Path) -> Result<Arc<FsBlockstore>> {
    let store =
        FsBlockstore::open(root).with_context(|| format!("Failed to open repo at {}", root.display()))?;
    Ok(Arc::new(store))
}

fn parse_cid(cid_str: &str) -> Result<Cid> {
    Cid::from_hex(cid_str).with_context(|| format!("Invalid cid: {}", cid_str))
}

/// Cancellation token fired by Ctrl-C.
fn cancel_on_ctrl_c() -> CancelToken {
    let ctx = CancelToken::new();
    let trigger = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    ctx
}

fn cmd_init(root: &Path, algo: &str, output: &OutputWriter) -> Result<()> {
    let algorithm = Algorithm::parse(algo)?;

    FsBlockstore::init(root, algorithm)
        .with_context(|| format!("Failed to initialize repo at {}", root.display()))?;

    let data = InitOutput {
        success: true,
        result_code: 0,
        root: root.display().to_string(),
        algorithm: algorithm.as_str().to_string(),
    };
    output.write(&data, || {
        format!(
            "Initialized blockrepo at {}\nAlgorithm: {}\n",
            root.display(),
            algorithm.as_str()
        )
    })
}

fn pin_last(
    store: &FsBlockstore,
    name: Option<String>,
    blocks: &[StoredBlock],
) -> Result<Option<PinInfo>> {
    let (Some(name), Some(last)) = (name, blocks.last()) else {
        return Ok(None);
    };
    store
        .pins()
        .add(&name, &last.cid)
        .with_context(|| format!("Failed to create pin: {}", name))?;
    Ok(Some(PinInfo {
        name,
        cid: last.cid,
    }))
}

fn put_text(blocks: &[StoredBlock], pin: &Option<PinInfo>) -> String {
    let mut text = String::new();
    for block in blocks {
        text.push_str(&format!("{} {}\n", block.cid, block.source));
    }
    if let Some(pin) = pin {
        text.push_str(&format!("Pinned: {} -> {}\n", pin.name, pin.cid));
    }
    text
}

async fn cmd_put(
    root: &Path,
    paths: Vec<PathBuf>,
    pin: Option<String>,
    output: &OutputWriter,
) -> Result<()> {
    let store = open_store(root)?;
    let mut blocks = Vec::new();

    for path in paths {
        let payload =
            std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let cid = store
            .put_block(Codec::Raw, &payload)
            .await
            .with_context(|| format!("Failed to store {}", path.display()))?;
        blocks.push(StoredBlock {
            cid,
            source: path.display().to_string(),
        });
    }

    let pin = pin_last(&store, pin, &blocks)?;
    let text = put_text(&blocks, &pin);
    let data = PutOutput {
        success: true,
        result_code: 0,
        blocks,
        pin,
    };
    output.write(&data, || text)
}

async fn cmd_link(
    root: &Path,
    links: &[String],
    pin: Option<String>,
    output: &OutputWriter,
) -> Result<()> {
    let store = open_store(root)?;
    let mut entries = Vec::new();

    for link in links {
        let (name, cid_str) = link
            .split_once('=')
            .with_context(|| format!("Invalid link (expected name=cid): {}", link))?;
        let cid = parse_cid(cid_str)?;
        if !store.has(&cid).await? {
            anyhow::bail!("Linked block not found: {}", cid);
        }
        entries.push(dag::LinkEntry::new(name, cid)?);
    }

    let cid = store
        .put_block(Codec::Links, &dag::encode_links(entries))
        .await
        .context("Failed to store link node")?;
    let blocks = vec![StoredBlock {
        cid,
        source: format!("{} links", links.len()),
    }];

    let pin = pin_last(&store, pin, &blocks)?;
    let text = put_text(&blocks, &pin);
    let data = PutOutput {
        success: true,
        result_code: 0,
        blocks,
        pin,
    };
    output.write(&data, || text)
}

async fn cmd_pin_add(root: &Path, name: &str, cid_str: &str, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;
    let cid = parse_cid(cid_str)?;

    if !store.has(&cid).await? {
        anyhow::bail!("Block not found: {}", cid);
    }

    store
        .pins()
        .add(name, &cid)
        .with_context(|| format!("Failed to add pin: {}", name))?;

    let data = PinAddOutput {
        success: true,
        result_code: 0,
        pin: PinInfo {
            name: name.to_string(),
            cid,
        },
    };
    output.write(&data, || format!("{} -> {}\n", name, cid))
}

fn cmd_pin_ls(root: &Path, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;

    let pins: Vec<PinInfo> = store
        .pins()
        .list()
        .context("Failed to list pins")?
        .into_iter()
        .map(|(name, cid)| PinInfo { name, cid })
        .collect();

    let text = if pins.is_empty() {
        "No pins\n".to_string()
    } else {
        pins.iter()
            .map(|pin| format!("{} -> {}\n", pin.name, pin.cid))
            .collect()
    };
    let data = PinListOutput {
        success: true,
        result_code: 0,
        pins,
    };
    output.write(&data, || text)
}

fn cmd_pin_rm(root: &Path, name: &str, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;

    store
        .pins()
        .remove(name)
        .with_context(|| format!("Failed to remove pin: {}", name))?;

    let data = PinRmOutput {
        success: true,
        result_code: 0,
        name: name.to_string(),
    };
    output.write(&data, || format!("Removed pin: {}\n", name))
}

fn removed_line(cid: &Cid, quiet: bool, dry_run: bool) -> String {
    match (quiet, dry_run) {
        (true, _) => format!("{}\n", cid),
        (false, true) => format!("would remove {}\n", cid),
        (false, false) => format!("removed {}\n", cid),
    }
}

fn gc_summary(report: &GcReport, quiet: bool) -> String {
    if quiet {
        return String::new();
    }
    let verb = if report.dry_run { "Would remove" } else { "Removed" };
    format!(
        "{} {} blocks, {} bytes\n",
        verb, report.removed, report.bytes_freed
    )
}

/// Start a gc run over every pinned graph in the repo.
async fn start_gc(
    root: &Path,
    config: GcConfig,
) -> Result<blockrepo_core::ResultStream<GcEvent, GcReport>> {
    let store = open_store(root)?;
    let roots = store.pins().roots().context("Failed to read pins")?;
    let oracle = DagReachability::new(store.clone());
    let ctx = cancel_on_ctrl_c();

    GarbageCollector::with_config(store, RepoLock::new(), config)
        .collect(&ctx, &oracle, &roots)
        .await
        .context("Failed to start garbage collection")
}

async fn cmd_gc_collect(
    root: &Path,
    config: GcConfig,
    quiet: bool,
    output: &OutputWriter,
) -> Result<()> {
    let dry_run = config.dry_run;
    let stream = start_gc(root, config).await?;

    let mut removed = Vec::new();
    let report = stream
        .collect_removed(|cid| {
            if !output.is_json() {
                print!("{}", removed_line(cid, quiet, dry_run));
            }
            removed.push(*cid);
        })
        .await?;

    let text = gc_summary(&report, quiet);
    let data = GcOutput {
        success: true,
        result_code: 0,
        removed_cids: removed,
        report,
    };
    output.write(&data, || text)
}

async fn cmd_gc_stream(
    root: &Path,
    config: GcConfig,
    quiet: bool,
    output: &OutputWriter,
) -> Result<()> {
    let dry_run = config.dry_run;
    let mut stream = start_gc(root, config).await?;

    while let Some(event) = stream.next().await {
        match &event {
            GcEvent::Removed { cid, .. } => {
                output.write_event(&event, Some(removed_line(cid, quiet, dry_run)))?;
            }
            GcEvent::Failed { cid, error } => {
                output.write_event(&event, None)?;
                output.warn(&format!("failed to remove {}: {}", cid, error));
            }
        }
    }

    let report = stream.finish().await?;
    let summary = gc_summary(&report, quiet);
    match report.status {
        StreamStatus::Completed => output.write_event(&report, Some(summary)),
        StreamStatus::CompletedWithErrors { .. } => {
            output.write_event(&report, Some(summary))?;
            anyhow::bail!("encountered errors during gc run")
        }
        StreamStatus::Cancelled => anyhow::bail!("garbage collection cancelled"),
    }
}

async fn cmd_verify(root: &Path, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;
    let ctx = cancel_on_ctrl_c();
    let mut stream = IntegrityVerifier::new(store)
        .verify(&ctx)
        .await
        .context("Failed to start verification")?;

    while let Some(event) = stream.next().await {
        let text = match &event {
            VerifyEvent::Progress { count } => format!("{} blocks processed.\r", count),
            VerifyEvent::Corrupt { cid, reason } => {
                format!("block {} was corrupt ({})\n", cid, reason)
            }
            VerifyEvent::Complete { ok: true } => "verify complete, all blocks validated.\n".to_string(),
            VerifyEvent::Complete { ok: false } => String::new(),
        };
        output.write_event(&event, Some(text))?;
    }

    let report = stream.finish().await?;
    if report.status == StreamStatus::Cancelled {
        anyhow::bail!("verification cancelled after {} blocks", report.examined);
    }

    let ok = report.is_ok();
    if output.is_json() {
        let data = VerifyOutput {
            success: ok,
            result_code: if ok { 0 } else { 1 },
            report,
        };
        output.write_event(&data, None)?;
    }
    if !ok {
        anyhow::bail!("verify complete, some blocks were corrupt");
    }
    Ok(())
}

async fn cmd_stat(root: &Path, human: bool, output: &OutputWriter) -> Result<()> {
    let store = open_store(root)?;
    let ctx = cancel_on_ctrl_c();
    let stat = repo_stat(&ctx, &*store)
        .await
        .context("Failed to compute repo stat")?;

    let data = StatOutput {
        success: true,
        result_code: 0,
        stat,
        repo_path: store.root().display().to_string(),
        version: format!("fs-repo@{}", REPO_VERSION),
    };
    output.write(&data, || {
        let size = repo_size_line(stat.repo_size, human);
        format!(
            "NumBlocks \t {}\n{}RepoPath \t {}\nVersion \t {}\n",
            stat.num_blocks, size, data.repo_path, data.version
        )
    })
}

fn cmd_version(quiet: bool, output: &OutputWriter) -> Result<()> {
    let data = VersionOutput {
        success: true,
        result_code: 0,
        version: env!("CARGO_PKG_VERSION").to_string(),
        repo_version: format!("fs-repo@{}", REPO_VERSION),
    };
    output.write(&data, || {
        if quiet {
            format!("{}\n", data.repo_version)
        } else {
            format!(
                "blockrepo {} (repo version {})\n",
                data.version, data.repo_version
            )
        }
    })
}
