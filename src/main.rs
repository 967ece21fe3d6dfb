//! ghostreg - Windows uninstall-record auditor CLI
//!
//! Lists installed applications from the registry Uninstall keys, flags
//! "ghost" records whose files are gone, and removes a selected record
//! after exporting it to a restorable `.reg` file.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::info;

use ghostreg::config::Config;
use ghostreg::regfile::{decode_text, RegDocument};
use ghostreg::scanner::ScanFailure;
use ghostreg::{
    list_backups, logging, resolve_backup_path, AppEntry, AppFilter, AppStatus, AuditSession,
    BackupService, LocalFs, MemoryRegistry, RegFileBackup, RegistryStore, RemovalReceipt,
    ScanSnapshot,
};

type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// The main CLI struct parsed by clap
#[derive(Parser)]
#[command(name = "ghostreg")]
#[command(version)]
#[command(about = "Find and remove ghost entries from the Windows uninstall registry", long_about = None)]
struct Cli {
    /// Output results in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    /// Configuration file (default: %APPDATA%\ghostreg\config.toml)
    #[arg(long, global = true, env = "GHOSTREG_CONFIG")]
    config: Option<PathBuf>,

    /// Audit a .reg export instead of the live registry (read-only)
    #[arg(long, global = true, value_name = "FILE")]
    offline: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Scan the uninstall registry and classify every application
    Scan {
        /// Only list ghost entries
        #[arg(long)]
        ghosts_only: bool,

        /// Filter by display name (case-insensitive substring)
        #[arg(long, short = 's')]
        search: Option<String>,

        /// Maximum number of rows to print
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },

    /// Show details for one application
    Show {
        /// Registry path (HKLM\...\Key), display name or key name
        query: String,
    },

    /// Back up and delete the registry record of an application
    Remove {
        /// Registry path (HKLM\...\Key), display name or key name
        query: String,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,

        /// Allow removing records that are not ghosts
        #[arg(long)]
        force: bool,
    },

    /// Import a backup file back into the registry
    Restore {
        /// Backup file path, or a file name inside the backup directory
        file: String,

        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// List backup files, newest first
    Backups,
}

impl Commands {
    fn mutates(&self) -> bool {
        matches!(self, Commands::Remove { .. } | Commands::Restore { .. })
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    logging::init(&config.logging.level, cli.verbose, config.logging.file.as_deref());

    if let Err(e) = run(&cli, &config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: &Cli, config: &Config) -> CliResult {
    if let Commands::Backups = cli.command {
        return handle_backups(cli, config);
    }

    if let Some(snapshot_file) = &cli.offline {
        if cli.command.mutates() {
            return Err("remove and restore are not available with --offline".into());
        }
        let store = Arc::new(load_offline(snapshot_file)?);
        let backup = Arc::new(RegFileBackup::new(config.backup_dir(), store.clone()));
        let session = AuditSession::new(store, LocalFs, backup).with_roots(config.scan.roots.clone());
        return dispatch(cli, config, &session);
    }

    run_live(cli, config)
}

#[cfg(windows)]
fn run_live(cli: &Cli, config: &Config) -> CliResult {
    use ghostreg::backup::RegExeBackup;
    use ghostreg::config::BackupEngine;
    use ghostreg::privilege::{self, Elevation};
    use ghostreg::registry::WinRegistry;

    let elevation = privilege::current();
    info!(%elevation, "privilege level");
    if elevation == Elevation::Limited && !cli.json {
        eprintln!("Running in {}", elevation);
    }

    let store = Arc::new(WinRegistry::new());
    let roots = config.scan.roots.clone();
    match config.backup.engine {
        BackupEngine::RegExe => {
            let backup = Arc::new(RegExeBackup::new(config.backup_dir()));
            let session = AuditSession::new(store, LocalFs, backup).with_roots(roots);
            dispatch(cli, config, &session)
        }
        BackupEngine::Native => {
            let backup = Arc::new(RegFileBackup::new(config.backup_dir(), store.clone()));
            let session = AuditSession::new(store, LocalFs, backup).with_roots(roots);
            dispatch(cli, config, &session)
        }
    }
}

#[cfg(not(windows))]
fn run_live(_cli: &Cli, _config: &Config) -> CliResult {
    Err("the live registry is only available on Windows; use --offline <file.reg>".into())
}

/// Loads a `.reg` export into an in-memory registry
fn load_offline(path: &Path) -> CliResult<MemoryRegistry> {
    let bytes = fs::read(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    let text = decode_text(&bytes)?;
    let doc = RegDocument::parse(&text)?;

    let store = MemoryRegistry::new();
    let values = doc.apply(&store)?;
    info!(file = %path.display(), keys = doc.sections.len(), values, "offline snapshot loaded");
    Ok(store)
}

fn dispatch<S, B>(cli: &Cli, config: &Config, session: &AuditSession<S, LocalFs, B>) -> CliResult
where
    S: RegistryStore + Send + Sync + 'static,
    B: BackupService,
{
    match &cli.command {
        Commands::Scan {
            ghosts_only,
            search,
            limit,
        } => {
            let filter = AppFilter {
                ghosts_only: *ghosts_only,
                search: search.clone(),
            };
            handle_scan(cli, session, &filter, *limit)
        }
        Commands::Show { query } => handle_show(cli, session, query),
        Commands::Remove { query, yes, force } => handle_remove(cli, session, query, *yes, *force),
        Commands::Restore { file, yes } => handle_restore(cli, config, session, file, *yes),
        Commands::Backups => handle_backups(cli, config),
    }
}

/// Prints `prompt` and reads a yes/no answer from stdin
fn confirm(prompt: &str) -> io::Result<bool> {
    eprint!("{} [y/N]: ", prompt);
    io::stderr().flush()?;

    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Truncates to `width` characters, marking the cut with `~`
fn fit(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('~');
    cut
}

fn scan_with_progress<S, B>(cli: &Cli, session: &AuditSession<S, LocalFs, B>) -> CliResult<Arc<ScanSnapshot>>
where
    S: RegistryStore + Send + Sync + 'static,
    B: BackupService,
{
    if !cli.json {
        eprintln!("Scanning registry...");
    }
    Ok(session.start_scan()?.wait()?)
}

fn find_one<'a>(snapshot: &'a ScanSnapshot, query: &str) -> CliResult<&'a AppEntry> {
    let matches = snapshot.lookup(query);
    match matches.as_slice() {
        [] => Err(format!("no application matches '{}'", query).into()),
        [entry] => Ok(*entry),
        many => {
            eprintln!("'{}' matches {} applications:", query, many.len());
            for entry in many {
                eprintln!("  {}  {}", entry.id(), entry.display_name());
            }
            Err("ambiguous name; pass the full registry path instead".into())
        }
    }
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    generation: u64,
    total: usize,
    valid: usize,
    ghost: usize,
    unknown: usize,
    entries: Vec<&'a AppEntry>,
    failures: &'a [ScanFailure],
}

/// Handle the scan command
fn handle_scan<S, B>(
    cli: &Cli,
    session: &AuditSession<S, LocalFs, B>,
    filter: &AppFilter,
    limit: Option<usize>,
) -> CliResult
where
    S: RegistryStore + Send + Sync + 'static,
    B: BackupService,
{
    let snapshot = scan_with_progress(cli, session)?;
    let mut entries = snapshot.filter(filter);
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    if cli.json {
        return print_json(&ScanOutput {
            generation: snapshot.generation,
            total: snapshot.entries.len(),
            valid: snapshot.count(AppStatus::Valid),
            ghost: snapshot.count(AppStatus::Ghost),
            unknown: snapshot.count(AppStatus::Unknown),
            entries,
            failures: &snapshot.failures,
        });
    }

    println!("\n=== Installed Applications ===");
    println!(
        "Total: {}  Valid: {}  Ghost: {}  Unknown: {}",
        snapshot.entries.len(),
        snapshot.count(AppStatus::Valid),
        snapshot.count(AppStatus::Ghost),
        snapshot.count(AppStatus::Unknown)
    );
    println!();
    println!("{:<8} {:<40} {:<16} {:<24}", "Status", "Name", "Version", "Publisher");
    println!("{}", "-".repeat(91));
    for entry in &entries {
        println!(
            "{:<8} {:<40} {:<16} {:<24}",
            entry.status.to_string(),
            fit(entry.display_name(), 40),
            fit(entry.fields.display_version.as_deref().unwrap_or(""), 16),
            fit(entry.fields.publisher.as_deref().unwrap_or(""), 24)
        );
        if cli.verbose {
            println!("         {}", entry.id());
            println!("         {}", entry.reason);
        }
    }
    if entries.is_empty() {
        println!("(no matching applications)");
    }

    if !snapshot.failures.is_empty() {
        println!("\nSkipped {} registry keys:", snapshot.failures.len());
        for failure in &snapshot.failures {
            println!(r"  {}\{}: {}", failure.root, failure.path, failure.message);
        }
    }

    println!(
        "\nExcluded: {} (no name {}, system components {}, HAL {})",
        snapshot.excluded.total(),
        snapshot.excluded.no_display_name,
        snapshot.excluded.system_component,
        snapshot.excluded.hardware_artifact
    );
    println!("Scan took {:.2?}", snapshot.duration);
    Ok(())
}

/// Handle the show command
fn handle_show<S, B>(cli: &Cli, session: &AuditSession<S, LocalFs, B>, query: &str) -> CliResult
where
    S: RegistryStore + Send + Sync + 'static,
    B: BackupService,
{
    let snapshot = scan_with_progress(cli, session)?;
    let entry = find_one(&snapshot, query)?;

    if cli.json {
        return print_json(entry);
    }

    println!("\n=== {} ===", entry.display_name());
    print!("{}", entry);
    Ok(())
}

/// Handle the remove command
fn handle_remove<S, B>(
    cli: &Cli,
    session: &AuditSession<S, LocalFs, B>,
    query: &str,
    yes: bool,
    force: bool,
) -> CliResult
where
    S: RegistryStore + Send + Sync + 'static,
    B: BackupService,
{
    let snapshot = scan_with_progress(cli, session)?;
    let entry = find_one(&snapshot, query)?;

    if !entry.is_ghost() {
        if !force {
            return Err(format!(
                "'{}' is {} ({}); pass --force to remove its registry record anyway",
                entry.display_name(),
                entry.status,
                entry.reason
            )
            .into());
        }
        eprintln!(
            "WARNING: '{}' does not look like a ghost: {}.",
            entry.display_name(),
            entry.reason
        );
        eprintln!("Only the registry record is deleted. Program files stay on disk and the");
        eprintln!("program will no longer appear in Programs and Features.");
    }

    if !yes {
        eprintln!("\nRegistry key: {} ({})", entry.id(), entry.view);
        let prompt = format!("Back up and delete the record for '{}'?", entry.display_name());
        if !confirm(&prompt)? {
            eprintln!("Cancelled.");
            return Ok(());
        }
    }

    let receipt: RemovalReceipt = session.remove(entry)?;
    if cli.json {
        return print_json(&receipt);
    }

    println!("\n=== Removal Complete ===");
    print!("{}", receipt);
    println!("Restore with: ghostreg restore \"{}\"", receipt.backup_path.display());
    Ok(())
}

/// Handle the restore command
fn handle_restore<S, B>(
    cli: &Cli,
    config: &Config,
    session: &AuditSession<S, LocalFs, B>,
    file: &str,
    yes: bool,
) -> CliResult
where
    S: RegistryStore + Send + Sync + 'static,
    B: BackupService,
{
    let path = resolve_backup_path(&config.backup_dir(), file);
    if !path.is_file() {
        return Err(format!("backup file not found: {}", path.display()).into());
    }

    if !yes {
        let prompt = format!("Import {} into the registry?", path.display());
        if !confirm(&prompt)? {
            eprintln!("Cancelled.");
            return Ok(());
        }
    }

    session.restore(&path)?;
    if cli.json {
        return print_json(&serde_json::json!({ "restored": path }));
    }

    println!("\n=== Restore Complete ===");
    println!("Imported: {}", path.display());
    Ok(())
}

/// Handle the backups command
fn handle_backups(cli: &Cli, config: &Config) -> CliResult {
    let dir = config.backup_dir();
    let backups = list_backups(&dir)?;

    if cli.json {
        return print_json(&backups);
    }

    println!("\n=== Backups ({}) ===", dir.display());
    if backups.is_empty() {
        println!("No backups found.");
        return Ok(());
    }
    for backup in &backups {
        println!(
            "{}  {:>8} B  {}",
            backup.modified.format("%Y-%m-%d %H:%M:%S"),
            backup.size,
            backup.name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_remove_flags() {
        let cli = Cli::parse_from(["ghostreg", "remove", "Foo", "--yes", "--force"]);
        assert!(cli.command.mutates());
        match cli.command {
            Commands::Remove { query, yes, force } => {
                assert_eq!(query, "Foo");
                assert!(yes);
                assert!(force);
            }
            _ => panic!("expected remove"),
        }
    }

    #[test]
    fn test_fit_truncates() {
        assert_eq!(fit("short", 10), "short");
        assert_eq!(fit("abcdefghij", 5), "abcd~");
    }

    #[test]
    fn test_offline_snapshot_loads() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("snapshot.reg");
        fs::write(
            &file,
            "Windows Registry Editor Version 5.00\r\n\r\n\
             [HKEY_LOCAL_MACHINE\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Uninstall\\Foo]\r\n\
             \"DisplayName\"=\"Foo\"\r\n",
        )
        .unwrap();

        let store = load_offline(&file).unwrap();
        assert!(store.key_exists(
            ghostreg::RootKey::LocalMachine,
            r"SOFTWARE\Microsoft\Windows\CurrentVersion\Uninstall\Foo"
        ));
    }
}
