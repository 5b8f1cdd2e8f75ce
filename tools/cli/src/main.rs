//! Hidden Vault CLI - Command line interface for vault operations.
//!
//! Every command opens the vault it needs, does its work and locks again
//! before exiting; nothing stays unlocked between invocations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use zeroize::Zeroizing;

use hiddenvault_common::{FileId, VaultId};
use hiddenvault_crypto::KdfParams;
use hiddenvault_vault::{AuditOutcome, RecoveryCodes, VaultManager, VaultSettings};

#[derive(Parser)]
#[command(name = "hiddenvault")]
#[command(about = "Hidden Vault - Encrypted file vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Settings file (default: <config dir>/hiddenvault/settings.json).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Create {
        /// Display name of the vault.
        #[arg(short, long)]
        name: String,

        /// Path of the vault file.
        #[arg(short, long)]
        path: PathBuf,

        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long)]
        strength: Option<String>,
    },

    /// Show the plaintext header of a vault. No password needed.
    Info {
        /// Path to the vault.
        #[arg(short, long)]
        path: PathBuf,
    },

    /// List files stored in a vault.
    List {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Print entries as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Encrypt a file into the vault.
    Add {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Source file to add.
        #[arg(short, long)]
        source: PathBuf,

        /// Tag to attach; may be repeated.
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Delete the source file after a successful import.
        #[arg(long)]
        delete_source: bool,
    },

    /// Decrypt a file out of the vault.
    Extract {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Id of the entry.
        #[arg(short, long)]
        id: FileId,

        /// Destination file path.
        #[arg(short, long)]
        dest: PathBuf,
    },

    /// Remove a file from the vault.
    Remove {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,

        /// Id of the entry.
        #[arg(short, long)]
        id: FileId,
    },

    /// Reclaim space left behind by removed files.
    Compact {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,
    },

    /// Print the vault's audit log.
    Audit {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,
    },

    /// Reset the password with a recovery code.
    Recover {
        /// Path to the vault.
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Check a recovery code without changing the vault.
    VerifyCode {
        /// Path to the vault.
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Replace all recovery codes with a new set.
    RotateCodes {
        /// Path to the vault.
        #[arg(short = 'p', long)]
        vault_path: PathBuf,
    },

    /// Create a decoy vault next to an existing one.
    Decoy {
        /// Path to the main vault.
        #[arg(short, long)]
        path: PathBuf,

        /// Display name of the decoy.
        #[arg(short, long, default_value = "Personal")]
        name: String,
    },

    /// Look for sensitive files in a directory.
    Scan {
        /// Directory to scan.
        #[arg(short, long)]
        dir: PathBuf,

        /// Print candidates as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let settings = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Create {
            name,
            path,
            strength,
        } => cmd_create(settings, &name, &path, strength.as_deref()).await,

        Commands::Info { path } => cmd_info(settings, &path).await,

        Commands::List { vault_path, json } => cmd_list(settings, &vault_path, json).await,

        Commands::Add {
            vault_path,
            source,
            tags,
            delete_source,
        } => cmd_add(settings, &vault_path, &source, tags, delete_source).await,

        Commands::Extract {
            vault_path,
            id,
            dest,
        } => cmd_extract(settings, &vault_path, id, &dest).await,

        Commands::Remove { vault_path, id } => cmd_remove(settings, &vault_path, id).await,

        Commands::Compact { vault_path } => cmd_compact(settings, &vault_path).await,

        Commands::Audit { vault_path } => cmd_audit(settings, &vault_path).await,

        Commands::Recover { path } => cmd_recover(settings, &path).await,

        Commands::VerifyCode { path } => cmd_verify_code(settings, &path).await,

        Commands::RotateCodes { vault_path } => cmd_rotate_codes(settings, &vault_path).await,

        Commands::Decoy { path, name } => cmd_decoy(settings, &path, &name).await,

        Commands::Scan { dir, json } => cmd_scan(settings, &dir, json).await,
    }
}

/// Read settings from `path`, else from the default location if present.
fn load_settings(path: Option<&Path>) -> Result<VaultSettings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match dirs::config_dir() {
            Some(dir) if dir.join("hiddenvault/settings.json").exists() => {
                dir.join("hiddenvault/settings.json")
            }
            _ => return Ok(VaultSettings::default()),
        },
    };

    info!("Loading settings from {}", path.display());
    VaultSettings::load(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

/// Prompt for password securely.
fn prompt_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(Zeroizing::new(password.into_bytes()))
}

/// Prompt twice and require both entries to match.
fn prompt_new_password(prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
    let password = prompt_password(prompt)?;
    let confirm = prompt_password("Confirm password: ")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }
    Ok(password)
}

fn read_recovery_code() -> Result<Zeroizing<String>> {
    let code = rpassword::prompt_password("Enter recovery code: ")
        .context("Failed to read recovery code")?;
    Ok(Zeroizing::new(code))
}

fn manager(settings: VaultSettings) -> Result<VaultManager> {
    VaultManager::new(settings).context("Invalid settings")
}

/// Prompt for the password and open the vault at `path`.
async fn unlock(manager: &VaultManager, path: &Path) -> Result<VaultId> {
    let password = prompt_password("Enter password: ")?;
    let (vault_id, _) = manager
        .open(path, &password)
        .await
        .context("Failed to open vault")?;
    Ok(vault_id)
}

fn print_codes(codes: &RecoveryCodes) {
    println!();
    println!("Recovery codes (generation {}):", codes.generation());
    for (i, phrase) in codes.phrases().iter().enumerate() {
        println!("  {}. {}", i + 1, phrase);
    }
    println!("Store these somewhere safe. They are not shown again.");
}

/// Create a new vault.
async fn cmd_create(
    mut settings: VaultSettings,
    name: &str,
    path: &Path,
    strength: Option<&str>,
) -> Result<()> {
    info!("Creating new vault: {}", name);

    if let Some(strength) = strength {
        settings.kdf = KdfParams::from_preset(strength).context("Invalid strength")?;
    }

    let manager = manager(settings)?;
    let password = prompt_new_password("Enter password: ")?;

    let (vault_id, codes) = manager
        .create(path, &password, name)
        .await
        .context("Failed to create vault")?;

    println!("Vault created successfully!");
    println!("  ID: {}", vault_id);
    println!("  Location: {}", path.display());
    print_codes(&codes);

    Ok(())
}

/// Show vault information.
async fn cmd_info(settings: VaultSettings, path: &Path) -> Result<()> {
    let manager = manager(settings)?;
    let summary = manager
        .inspect(path)
        .await
        .context("Failed to read vault header")?;

    println!("Vault Information:");
    println!("  ID: {}", summary.vault_id);
    println!("  Name: {}", summary.name);
    println!("  Version: {}.{}", summary.version.major, summary.version.minor);
    println!("  Created: {}", summary.created_at);
    println!("  Modified: {}", summary.modified_at);
    println!("  KDF Parameters:");
    println!("    Memory: {} KiB", summary.kdf_params.memory_cost);
    println!("    Time: {} iterations", summary.kdf_params.time_cost);
    println!("    Parallelism: {}", summary.kdf_params.parallelism);
    println!(
        "  Recovery: {} codes, generation {}",
        summary.recovery_slots, summary.recovery_generation
    );
    if let Some(decoy) = &summary.decoy {
        println!("  Decoy: {}", decoy.display());
    }
    println!("  Manifest capacity: {} bytes", summary.manifest_capacity);
    println!("  Blob region: {} bytes", summary.blob_region_len);

    Ok(())
}

/// List stored files.
async fn cmd_list(settings: VaultSettings, vault_path: &Path, json: bool) -> Result<()> {
    let manager = manager(settings)?;
    let vault_id = unlock(&manager, vault_path).await?;

    let entries = manager
        .list_entries(&vault_id)
        .await
        .context("Failed to list entries")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("Vault is empty.");
    } else {
        for entry in &entries {
            println!(
                "  {}  {} ({} bytes, {})",
                entry.id, entry.file_name, entry.size, entry.mime_type
            );
            if !entry.tags.is_empty() {
                println!("      tags: {}", entry.tags.join(", "));
            }
        }
    }

    manager.lock_all().await;
    Ok(())
}

/// Add a file to the vault.
async fn cmd_add(
    settings: VaultSettings,
    vault_path: &Path,
    source: &Path,
    tags: Vec<String>,
    delete_source: bool,
) -> Result<()> {
    info!("Adding file {} to vault", source.display());

    let manager = manager(settings)?;
    let vault_id = unlock(&manager, vault_path).await?;

    let result = manager
        .import_file(&vault_id, source, tags, delete_source)
        .await
        .context("Failed to add file");
    manager.lock_all().await;
    let file_id = result?;

    println!("File added successfully: {}", source.display());
    println!("  ID: {}", file_id);

    Ok(())
}

/// Extract a file from the vault.
async fn cmd_extract(
    settings: VaultSettings,
    vault_path: &Path,
    id: FileId,
    dest: &Path,
) -> Result<()> {
    info!("Extracting {} from vault to {}", id, dest.display());

    let manager = manager(settings)?;
    let vault_id = unlock(&manager, vault_path).await?;

    let result = manager
        .export_file(&vault_id, id, dest)
        .await
        .context("Failed to extract file");
    manager.lock_all().await;
    result?;

    println!("File extracted successfully: {}", dest.display());

    Ok(())
}

/// Remove a file from the vault.
async fn cmd_remove(settings: VaultSettings, vault_path: &Path, id: FileId) -> Result<()> {
    info!("Removing: {}", id);

    let manager = manager(settings)?;
    let vault_id = unlock(&manager, vault_path).await?;

    let result = manager
        .delete_entry(&vault_id, id)
        .await
        .context("Failed to remove file");
    manager.lock_all().await;
    result?;

    println!("File removed: {}", id);

    Ok(())
}

async fn cmd_compact(settings: VaultSettings, vault_path: &Path) -> Result<()> {
    let manager = manager(settings)?;
    let vault_id = unlock(&manager, vault_path).await?;

    let result = manager
        .compact(&vault_id)
        .await
        .context("Failed to compact vault");
    manager.lock_all().await;

    println!("Reclaimed {} bytes", result?);

    Ok(())
}

async fn cmd_audit(settings: VaultSettings, vault_path: &Path) -> Result<()> {
    let manager = manager(settings)?;
    let vault_id = unlock(&manager, vault_path).await?;

    let result = manager
        .audit_log(&vault_id)
        .await
        .context("Failed to read audit log");
    manager.lock_all().await;

    for event in result? {
        let file = event.file_id.map(|id| id.to_string()).unwrap_or_default();
        match &event.outcome {
            AuditOutcome::Success => {
                println!("  {}  {:?} {}", event.timestamp, event.action, file)
            }
            AuditOutcome::Failure { reason } => println!(
                "  {}  {:?} {} FAILED: {}",
                event.timestamp, event.action, file, reason
            ),
        }
    }

    Ok(())
}

/// Reset the password with a recovery code.
async fn cmd_recover(settings: VaultSettings, path: &Path) -> Result<()> {
    info!("Recovering vault at {}", path.display());

    let manager = manager(settings)?;
    let code = read_recovery_code()?;
    let new_password = prompt_new_password("Enter new password: ")?;

    let codes = manager
        .recover_password(path, &code, &new_password)
        .await
        .context("Failed to recover vault")?;

    println!("Password reset successfully! Earlier recovery codes no longer work.");
    print_codes(&codes);

    Ok(())
}

async fn cmd_verify_code(settings: VaultSettings, path: &Path) -> Result<()> {
    let manager = manager(settings)?;
    let code = read_recovery_code()?;

    if manager
        .verify_recovery_code(path, &code)
        .await
        .context("Failed to read vault")?
    {
        println!("Recovery code is valid.");
        Ok(())
    } else {
        anyhow::bail!("Recovery code is not valid for this vault")
    }
}

async fn cmd_rotate_codes(settings: VaultSettings, vault_path: &Path) -> Result<()> {
    let manager = manager(settings)?;
    let vault_id = unlock(&manager, vault_path).await?;

    let result = manager
        .generate_recovery_codes(&vault_id)
        .await
        .context("Failed to rotate recovery codes");
    manager.lock_all().await;

    print_codes(&result?);

    Ok(())
}

/// Create a decoy vault.
async fn cmd_decoy(settings: VaultSettings, path: &Path, name: &str) -> Result<()> {
    info!("Creating decoy for {}", path.display());

    let manager = manager(settings)?;
    let password = prompt_new_password("Enter decoy password: ")?;

    let (decoy_id, codes) = manager
        .create_decoy(path, &password, name)
        .await
        .context("Failed to create decoy")?;

    println!("Decoy vault created successfully!");
    println!("  ID: {}", decoy_id);
    println!("  Location: {}", VaultManager::decoy_path(path)?.display());
    print_codes(&codes);

    Ok(())
}

async fn cmd_scan(settings: VaultSettings, dir: &Path, json: bool) -> Result<()> {
    let manager = manager(settings)?;
    let candidates = manager
        .scan_directory_for_sensitive_files(dir)
        .await
        .context("Failed to scan directory")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&candidates)?);
        return Ok(());
    }

    if candidates.is_empty() {
        println!("No sensitive files found.");
    }
    for candidate in &candidates {
        let categories: Vec<&str> = candidate.categories.iter().map(|c| c.as_str()).collect();
        println!(
            "  [{}] {} ({})",
            candidate.risk,
            candidate.path.display(),
            categories.join(", ")
        );
    }

    Ok(())
}
