use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};

use dmir_core::config::MirrorConfig;
use dmir_core::dir_store::DirStore;
use dmir_core::drive::{DriveStore, DRIVE_API};
use dmir_core::manifest::{FolderSkip, Manifest, ManifestRow};
use dmir_core::progress::{Progress, ProgressSink};
use dmir_core::remote::{DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE};
use dmir_core::report;
use dmir_core::session::{Session, StaticToken, TokenFile};
use dmir_core::{parse_id, EntryMetadata, EntryRef, RemoteStore, TraversalEngine};

#[derive(Parser)]
#[command(name = "dmir", version, about = "Mirror a remote folder tree onto the local filesystem")]
struct Cli {
    /// -v prints a table per listing page, -vv also enables debug logs
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Download a folder and everything below it
    Mirror {
        /// Folder share URL or id
        #[arg(env = "DMIR_FOLDER")]
        reference: Option<String>,
        /// Local destination root
        #[arg(long, default_value = "downloads")]
        dest: PathBuf,
        /// Mirror a local directory instead of the remote API
        #[arg(long, conflicts_with_all = ["reference", "access_token", "token_file"])]
        from_dir: Option<PathBuf>,
        #[arg(long, env = "DMIR_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
        /// JSON file with an "access_token" field, re-read on every request
        #[arg(long, env = "DMIR_TOKEN_FILE")]
        token_file: Option<PathBuf>,
        #[arg(long, default_value = DRIVE_API, hide = true)]
        api_base: String,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Parallel downloads of sibling files
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=64))]
        jobs: u16,
        /// Treat any existing local file as complete, whatever its size
        #[arg(long, default_value_t = false)]
        no_verify_size: bool,
        #[arg(long)]
        include: Vec<String>,
        #[arg(long)]
        exclude: Vec<String>,
        /// Write the run manifest as JSON
        #[arg(long)]
        manifest_out: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// Print the id a folder reference resolves to
    ParseId { reference: String },
    /// Render a saved manifest as a table
    Report { manifest: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;
    match cli.cmd {
        Cmd::Mirror {
            reference, dest, from_dir, access_token, token_file, api_base, page_size, chunk_size,
            jobs, no_verify_size, include, exclude, manifest_out, progress,
        } => {
            let cfg = MirrorConfig { jobs: jobs as usize, verify_size: !no_verify_size, include, exclude };
            let opts = MirrorOpts { dest, page_size, chunk_size, manifest_out, progress, tables: cli.verbose > 0 };
            match from_dir {
                Some(dir) => mirror_dir(&dir, cfg, &opts)?,
                None => {
                    let reference = reference.ok_or_else(|| anyhow!("a folder reference is required (argument or DMIR_FOLDER)"))?;
                    let session = pick_session(access_token, token_file)?;
                    mirror_drive(&reference, session, &api_base, cfg, &opts)?;
                }
            }
        }
        Cmd::ParseId { reference } => println!("{}", parse_id(&reference)?),
        Cmd::Report { manifest } => show_report(&manifest)?,
    }
    Ok(())
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = if verbose >= 2 { "debug" } else { "info" };
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for target in ["dmir", "dmir_core"] {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }
    tracing_subscriber::fmt().with_writer(std::io::stderr).with_env_filter(filter).init();
    Ok(())
}

struct MirrorOpts {
    dest: PathBuf,
    page_size: usize,
    chunk_size: usize,
    manifest_out: Option<PathBuf>,
    progress: bool,
    tables: bool,
}

fn pick_session(token: Option<String>, token_file: Option<PathBuf>) -> Result<Box<dyn Session>> {
    if let Some(path) = token_file {
        let tf = TokenFile::new(path);
        tracing::debug!(path = ?tf.path(), "using token file");
        return Ok(Box::new(tf));
    }
    match token {
        Some(t) => Ok(Box::new(StaticToken::new(t))),
        None => Err(anyhow!("no credentials: pass --access-token/DMIR_ACCESS_TOKEN or --token-file/DMIR_TOKEN_FILE")),
    }
}

fn mirror_drive(reference: &str, session: Box<dyn Session>, api_base: &str, cfg: MirrorConfig, opts: &MirrorOpts) -> Result<()> {
    let store = DriveStore::new(session)?
        .with_base_url(api_base)
        .with_page_size(opts.page_size)
        .with_chunk_size(opts.chunk_size);
    let root = parse_id(reference)?;
    run(&store, cfg, &root, opts)
}

fn mirror_dir(dir: &Path, cfg: MirrorConfig, opts: &MirrorOpts) -> Result<()> {
    let store = DirStore::open(dir)
        .with_context(|| format!("open source directory {}", dir.display()))?
        .with_page_size(opts.page_size)
        .with_chunk_size(opts.chunk_size);
    let root = store.root_ref().clone();
    run(&store, cfg, &root, opts)
}

/// Prints per-page tables when verbose; counts bytes for the ticker.
struct CliSink {
    progress: Progress,
    tables: bool,
}

impl ProgressSink for CliSink {
    fn transfer_started(&self, entry: &EntryMetadata) {
        self.progress.transfer_started(entry);
    }
    fn chunk_written(&self, id: &EntryRef, chunk_len: u64, so_far: u64, fraction: Option<f64>) {
        self.progress.chunk_written(id, chunk_len, so_far, fraction);
    }
    fn transfer_finished(&self, id: &EntryRef, bytes: u64) {
        self.progress.transfer_finished(id, bytes);
    }
    fn page_done(&self, folder: &str, rows: &[ManifestRow]) {
        if self.tables && !rows.is_empty() {
            print!("Files in {}:\n{}\n", folder, report::render(rows));
        }
    }
    fn folder_skipped(&self, skip: &FolderSkip) {
        eprintln!("skipped folder {} ({}): {}", skip.remote_path, skip.id, skip.error);
    }
}

fn run(store: &dyn RemoteStore, cfg: MirrorConfig, root: &EntryRef, opts: &MirrorOpts) -> Result<()> {
    let sink = CliSink { progress: Progress::new(opts.progress), tables: opts.tables };
    let engine = TraversalEngine::new(store, cfg)?.with_sink(&sink);
    sink.progress.start();
    let outcome = engine.run_from(root, &opts.dest);
    sink.progress.stop();
    let manifest = outcome.with_context(|| format!("mirror {} into {}", root, opts.dest.display()))?;

    if let Some(out) = &opts.manifest_out {
        manifest.save_json(out).with_context(|| format!("write manifest {}", out.display()))?;
    }
    if opts.tables && !manifest.skipped_folders.is_empty() {
        println!("Skipped folders:\n{}", report::render_skips(&manifest.skipped_folders));
    }
    println!("{}", manifest.summary());
    Ok(())
}

fn show_report(path: &Path) -> Result<()> {
    let manifest = Manifest::load_json(path).with_context(|| format!("read manifest {}", path.display()))?;
    println!("{} ({}) -> {}", manifest.root_name, manifest.root_id, manifest.local_root);
    print!("{}", report::render(&manifest.rows));
    if !manifest.skipped_folders.is_empty() {
        println!("\nSkipped folders:\n{}", report::render_skips(&manifest.skipped_folders));
    }
    println!("{}", manifest.summary());
    Ok(())
}
