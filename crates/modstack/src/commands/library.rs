use crate::errors::CliError;
use crate::println_pad;
use crate::utils::config;
use camino::Utf8PathBuf;
use colored::Colorize;
use miette::Result;
use modstack_engine::{FsModLibrary, ModLibrary};

/// Directory overrides shared by every library command.
#[derive(Debug, Clone, Default)]
pub struct LibraryArgs {
    pub install_dir: Option<Utf8PathBuf>,
    pub storage_dir: Option<Utf8PathBuf>,
}

impl LibraryArgs {
    /// Open the library, with flags taking precedence over config.toml.
    pub fn open(self) -> Result<FsModLibrary> {
        let cfg = config::load_config();
        let install_dir = self
            .install_dir
            .or_else(|| cfg.install_dir.clone())
            .ok_or(CliError::InstallDirNotSet)?;
        if !install_dir.is_dir() {
            return Err(CliError::InstallDirNotFound { path: install_dir }.into());
        }

        let storage_dir = self
            .storage_dir
            .unwrap_or_else(|| cfg.storage_dir_for(&install_dir));
        tracing::debug!("Library install_dir={} storage_dir={}", install_dir, storage_dir);
        Ok(FsModLibrary::new(install_dir, storage_dir))
    }
}

#[derive(Debug, Clone)]
pub struct InstallModArgs {
    pub path: Utf8PathBuf,
    pub variant: String,
}

pub fn install_mod(library: LibraryArgs, args: InstallModArgs) -> Result<()> {
    let library = library.open()?;
    if !args.path.is_dir() {
        return Err(CliError::ModSourceNotFound { path: args.path }.into());
    }

    let entry = library
        .install_mod_from_dir(&args.path, &args.variant)
        .map_err(CliError::from_engine)?;

    println_pad!(
        "{} {}",
        "✓ Installed".bright_green().bold(),
        args.path.as_str().bright_white()
    );
    println_pad!("{} {}", "Id:".bright_white().bold(), entry.id.bright_cyan());
    println_pad!(
        "{} {}",
        "Variant:".bright_white().bold(),
        entry.variant.bright_cyan()
    );
    println_pad!(
        "{}",
        "Run 'modstack apply' to apply the change".bright_yellow()
    );
    Ok(())
}

pub fn list_mods(library: LibraryArgs) -> Result<()> {
    let library = library.open()?;
    let mods = library.list_mods().map_err(CliError::from_engine)?;

    if mods.is_empty() {
        println_pad!("{}", "No mods installed".bright_yellow());
        return Ok(());
    }

    println_pad!("{}", "Installed mods (highest priority first):".bright_blue().bold());
    for (index, entry) in mods.iter().enumerate() {
        let status = if entry.enabled {
            "enabled".bright_green()
        } else {
            "disabled".bright_red()
        };
        let title = match library.read_installed_mod(&entry.id) {
            Ok(m) => format!("{} {}", m.project().display_name, m.project().version),
            Err(e) => {
                tracing::warn!("Failed to load mod {}: {}", entry.id, e);
                "(unreadable)".to_string()
            }
        };

        println_pad!(
            "{:>3}. {} {} {} {}",
            index + 1,
            title.bright_white().bold(),
            format!("[{}]", entry.variant).dimmed(),
            status,
            entry.id.dimmed()
        );
    }
    Ok(())
}

fn set_enabled(library: LibraryArgs, id: &str, enabled: bool) -> Result<()> {
    let library = library.open()?;
    library
        .set_mod_enabled(id, enabled)
        .map_err(CliError::from_engine)?;

    let verb = if enabled { "Enabled" } else { "Disabled" };
    println_pad!(
        "{} {}",
        format!("✓ {verb}").bright_green().bold(),
        id.bright_cyan()
    );
    Ok(())
}

pub fn enable_mod(library: LibraryArgs, id: &str) -> Result<()> {
    set_enabled(library, id, true)
}

pub fn disable_mod(library: LibraryArgs, id: &str) -> Result<()> {
    set_enabled(library, id, false)
}

pub fn uninstall_mod(library: LibraryArgs, id: &str) -> Result<()> {
    let library = library.open()?;
    library.uninstall_mod(id).map_err(CliError::from_engine)?;

    println_pad!(
        "{} {}",
        "✓ Uninstalled".bright_green().bold(),
        id.bright_cyan()
    );
    println_pad!(
        "{}",
        "Files it changed stay in place until the next 'modstack apply'".bright_yellow()
    );
    Ok(())
}

pub fn reorder_mods(library: LibraryArgs, ids: &[String]) -> Result<()> {
    let library = library.open()?;
    library.reorder_mods(ids).map_err(CliError::from_engine)?;

    println_pad!("{}", "✓ Priority order updated".bright_green().bold());
    Ok(())
}
