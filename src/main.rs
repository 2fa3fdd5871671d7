use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result, bail};
use clap::builder::styling::{AnsiColor, Color, Styles};
use clap::{Args, Parser, Subcommand};

use gimera::apply_engine::{self, ApplyOptions};
use gimera::git::Repo;
use gimera::manifest::{Manifest, RepoType};
use gimera::styling::{self, ERROR, ERROR_EMOJI, SUCCESS_EMOJI};
use gimera::user_config::UserConfig;
use gimera::{audit_log, env, patcher, snapshot};

fn help_styles() -> Styles {
    Styles::styled()
        .header(anstyle::Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .usage(anstyle::Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Green))))
        .literal(anstyle::Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
        .placeholder(anstyle::Style::new().fg_color(Some(Color::Ansi(AnsiColor::Cyan))))
        .error(anstyle::Style::new().bold().fg_color(Some(Color::Ansi(AnsiColor::Red))))
}

/// Compose a host repository out of pieces of other git repositories.
#[derive(Parser)]
#[command(name = "gimera", version, styles = help_styles())]
struct Cli {
    /// Run as if gimera was started in this directory
    #[arg(short = 'C', long, global = true, value_name = "path")]
    directory: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    apply: ApplyArgs,
}

#[derive(Args, Default)]
struct ApplyArgs {
    /// Restrict the run to these entry paths (default: all entries)
    repos: Vec<String>,

    /// Pull the configured branch forward instead of staying at the pinned sha
    #[arg(short = 'u', long)]
    update: bool,

    /// Treat every entry as integrated for this run
    #[arg(short = 'I', long = "all-integrated")]
    all_integrated: bool,

    /// Treat every entry as submodule for this run
    #[arg(short = 'S', long = "all-submodule")]
    all_submodule: bool,

    /// Recurse into nested gimera.yml manifests
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Require every entry to share one materialized type before switching later entries
    #[arg(short = 's', long)]
    strict: bool,

    /// Skip applying patches
    #[arg(short = 'P', long = "no-patches")]
    no_patches: bool,

    /// Only install entries that are missing, skip everything already present
    #[arg(short = 'm', long)]
    missing: bool,

    /// Snapshot local edits before reconciling and restore them afterward
    #[arg(short = 'M', long = "migrate-changes")]
    migrate_changes: bool,

    /// Skip fetching; use whatever is already in the cache
    #[arg(short = 'n', long = "no-fetch")]
    no_fetch: bool,

    /// Leave the host repo's HEAD where it started, staging changes instead of committing
    #[arg(long = "no-auto-commit")]
    no_auto_commit: bool,

    /// Proceed past dirty-tree checks that would otherwise refuse
    #[arg(short = 'f', long)]
    force: bool,

    /// Delete local branches that no longer track anything upstream
    #[arg(long)]
    remove_invalid_branches: bool,

    /// Propagate failures as a nonzero exit immediately
    #[arg(long)]
    raise_exception: bool,

    /// Skip the patch-apply step entirely
    #[arg(long)]
    do_not_apply_patches: bool,

    /// Don't write resolved commit shas back into gimera.yml
    #[arg(long = "no-sha-update")]
    no_sha_update: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the host repository against gimera.yml
    Apply(ApplyArgs),
    /// Commit any pending local edits under tracked entry paths
    Commit {
        /// Entry path to commit (default: every entry)
        path: Option<String>,
    },
    /// Capture an entry's working-tree edits into its configured patch file
    EditPatch {
        /// Entry path whose edits should become a patch
        path: String,
        /// Patch file name to write (default: a generated name)
        #[arg(long)]
        patchfile: Option<String>,
    },
    /// Discard any snapshot left behind by an interrupted --migrate-changes run
    Abort,
    /// Show git status for the host repo
    Status,
    /// Snapshot uncommitted edits under tracked entry paths
    Snap,
    /// Restore edits captured by a previous `snap`
    Snaprestore {
        /// Snapshot token to restore (default: most recent)
        token: Option<String>,
    },
    /// List snapshot tokens
    ListSnapshots,
    /// Delete all snapshot tokens
    Purge,
    /// Add a new entry to gimera.yml
    Add {
        url: String,
        branch: String,
        path: String,
        #[arg(value_enum)]
        repo_type: RepoTypeArg,
    },
    /// Verify every submodule entry is initialized and checked out
    CheckAllSubmodulesInitialized,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum RepoTypeArg {
    Submodule,
    Integrated,
}

impl From<RepoTypeArg> for RepoType {
    fn from(v: RepoTypeArg) -> Self {
        match v {
            RepoTypeArg::Submodule => RepoType::Submodule,
            RepoTypeArg::Integrated => RepoType::Integrated,
        }
    }
}

/// CLI flag > env var > user-config default. All three are plain booleans
/// that only ever turn a behavior *on*, so resolving them is just an OR.
fn resolved(cli_flag: bool, env_flag: bool, cfg_flag: bool) -> bool {
    cli_flag || env_flag || cfg_flag
}

fn apply_options_from(args: &ApplyArgs, cfg: &UserConfig) -> ApplyOptions {
    let force_type = if args.all_integrated {
        Some(RepoType::Integrated)
    } else if args.all_submodule {
        Some(RepoType::Submodule)
    } else {
        None
    };

    ApplyOptions {
        repos: args.repos.clone(),
        update: args.update,
        force_type,
        strict: args.strict,
        recursive: args.recursive,
        no_patches: resolved(args.no_patches || args.do_not_apply_patches, env::do_not_apply_patches(), false),
        remove_invalid_branches: args.remove_invalid_branches,
        auto_commit: !args.no_auto_commit,
        no_fetch: args.no_fetch,
        migrate_changes: args.migrate_changes,
        force: resolved(args.force, env::force(), cfg.force),
        missing: args.missing,
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "off"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let dir = match &cli.directory {
        Some(d) => d.clone(),
        None => std::env::current_dir().context("resolving current directory")?,
    };

    let host = Repo::discover(&dir).context("not inside a git repository")?;
    audit_log::init(&host.git_dir().join("gimera-logs"), &describe_invocation(&cli));

    let cfg = UserConfig::load().unwrap_or_default();

    match cli.command {
        Some(Commands::Apply(args)) => do_apply(&dir, &args, &cfg),
        Some(Commands::Commit { path }) => do_commit(&host, path.as_deref()),
        Some(Commands::EditPatch { path, patchfile }) => do_edit_patch(&dir, &host, &path, patchfile.as_deref()),
        Some(Commands::Abort) => do_abort(&dir),
        Some(Commands::Status) => do_status(&host),
        Some(Commands::Snap) => do_snap(&dir),
        Some(Commands::Snaprestore { token }) => do_snaprestore(&dir, token),
        Some(Commands::ListSnapshots) => do_list_snapshots(&dir),
        Some(Commands::Purge) => do_purge(&dir),
        Some(Commands::Add { url, branch, path, repo_type }) => do_add(&dir, url, branch, path, repo_type.into()),
        Some(Commands::CheckAllSubmodulesInitialized) => do_check_all_submodules_initialized(&host),
        None => do_apply(&dir, &cli.apply, &cfg),
    }
}

fn describe_invocation(cli: &Cli) -> String {
    match &cli.command {
        Some(cmd) => format!("gimera {}", subcommand_name(cmd)),
        None => "gimera apply".to_string(),
    }
}

fn subcommand_name(cmd: &Commands) -> &'static str {
    match cmd {
        Commands::Apply(_) => "apply",
        Commands::Commit { .. } => "commit",
        Commands::EditPatch { .. } => "edit-patch",
        Commands::Abort => "abort",
        Commands::Status => "status",
        Commands::Snap => "snap",
        Commands::Snaprestore { .. } => "snaprestore",
        Commands::ListSnapshots => "list-snapshots",
        Commands::Purge => "purge",
        Commands::Add { .. } => "add",
        Commands::CheckAllSubmodulesInitialized => "check-all-submodules-initialized",
    }
}

fn do_apply(dir: &std::path::Path, args: &ApplyArgs, cfg: &UserConfig) -> Result<()> {
    let opts = apply_options_from(args, cfg);
    apply_engine::apply(dir, &opts)?;
    styling::println!("{SUCCESS_EMOJI} gimera apply complete");
    Ok(())
}

fn do_commit(host: &Repo, path: Option<&str>) -> Result<()> {
    let target = path.unwrap_or(".");
    host.commit_dir_if_dirty(std::path::Path::new(target), &format!("gimera: commit {target}"), false)?;
    Ok(())
}

fn do_edit_patch(dir: &std::path::Path, host: &Repo, path: &str, patchfile: Option<&str>) -> Result<()> {
    let manifest = Manifest::load(dir, &Default::default())?;
    let entry = manifest.find_entry(path).with_context(|| format!("no entry at {path}"))?.clone();
    let default_name = format!("{:04}-manual.patch", manifest.all_patch_dirs(&entry).len() + 1);
    let out_name = patchfile.unwrap_or(&default_name);
    let out_dir = dir.join("patches");
    let out_file = out_dir.join(out_name);
    patcher::make_patch(host, &entry, std::path::Path::new(&entry.path), &out_file)?;
    styling::println!("{SUCCESS_EMOJI} wrote {}", out_file.display());
    Ok(())
}

fn do_abort(dir: &std::path::Path) -> Result<()> {
    for token in snapshot::list_tokens(dir)? {
        snapshot::cleanup(dir, &token)?;
    }
    Ok(())
}

fn do_status(host: &Repo) -> Result<()> {
    let status = host.status()?;
    for entry in &status.entries {
        styling::println!("{} {}", entry.index, entry.path.display());
    }
    Ok(())
}

fn do_snap(dir: &std::path::Path) -> Result<()> {
    let token = snapshot::new_token();
    snapshot::snapshot_recursive(dir, &[dir.to_path_buf()], &token)?;
    styling::println!("{SUCCESS_EMOJI} snapshot {token}");
    Ok(())
}

fn do_snaprestore(dir: &std::path::Path, token: Option<String>) -> Result<()> {
    let token = match token {
        Some(t) => t,
        None => snapshot::list_tokens(dir)?.pop().context("no snapshots to restore")?,
    };
    snapshot::snapshot_restore(dir, &[dir.to_path_buf()], &token)
}

fn do_list_snapshots(dir: &std::path::Path) -> Result<()> {
    for token in snapshot::list_tokens(dir)? {
        styling::println!("{token}");
    }
    Ok(())
}

fn do_purge(dir: &std::path::Path) -> Result<()> {
    for token in snapshot::list_tokens(dir)? {
        snapshot::cleanup(dir, &token)?;
    }
    Ok(())
}

fn do_add(dir: &std::path::Path, url: String, branch: String, path: String, repo_type: RepoType) -> Result<()> {
    let mut manifest = match Manifest::load(dir, &Default::default()) {
        Ok(m) => m,
        Err(_) => {
            std::fs::write(dir.join(gimera::manifest::MANIFEST_FILENAME), "repos: []\n")?;
            Manifest::load(dir, &Default::default())?
        }
    };
    manifest.add_entry(url, branch, path, repo_type)
}

fn do_check_all_submodules_initialized(host: &Repo) -> Result<()> {
    for sub in host.get_submodules()? {
        let sub_path = host.path().join(&sub.relpath);
        if !sub_path.join(".git").exists() {
            bail!("submodule not initialized: {}", sub.relpath.display());
        }
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        styling::eprintln!("{ERROR_EMOJI} {ERROR}{e}{ERROR:#}");
        process::exit(1);
    }
}
