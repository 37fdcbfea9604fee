use crate::errors::CliError;
use crate::utils::config::{self, AppConfig};
use camino::Utf8PathBuf;
use colored::Colorize;
use miette::Result;

fn update_config(update: impl FnOnce(&mut AppConfig)) -> Result<()> {
    let mut cfg = config::load_config();
    update(&mut cfg);
    config::save_config(&cfg).map_err(|source| CliError::ConfigSave { source }.into())
}

/// Print a config path entry with status indicator
fn print_path_config(name: &str, path: Option<&Utf8PathBuf>) {
    match path {
        Some(p) => {
            let status = if p.is_dir() {
                "✓".bright_green()
            } else {
                "✗".bright_red()
            };
            println!("  {} {} {}", format!("{}:", name).bright_white(), p, status);
        }
        None => {
            println!(
                "  {} {}",
                format!("{}:", name).bright_white(),
                "(not set)".bright_yellow()
            );
        }
    }
}

pub fn show_config() -> Result<()> {
    let cfg = config::load_config();
    let config_path = config::default_config_path()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    println!();
    println!("  {} {}", "config_file:".bright_white(), config_path);
    print_path_config("install_dir", cfg.install_dir.as_ref());
    print_path_config("storage_dir", cfg.storage_dir.as_ref());
    println!();
    Ok(())
}

pub fn set_install_path(path: Utf8PathBuf) -> Result<()> {
    if !path.is_dir() {
        return Err(CliError::InstallDirNotFound { path }.into());
    }
    update_config(|cfg| cfg.install_dir = Some(path.clone()))?;

    println!(
        "{}",
        "✓ Install path set successfully!".bright_green().bold()
    );
    println!();
    println!(
        "  {} {}",
        "Path:".bright_white().bold(),
        path.as_str().bright_green()
    );
    Ok(())
}

pub fn set_storage_path(path: Utf8PathBuf) -> Result<()> {
    update_config(|cfg| cfg.storage_dir = Some(path.clone()))?;

    println!(
        "{}",
        "✓ Storage path set successfully!".bright_green().bold()
    );
    println!();
    println!(
        "  {} {}",
        "Path:".bright_white().bold(),
        path.as_str().bright_green()
    );
    if !path.is_dir() {
        println!(
            "  {}",
            "The directory does not exist yet and will be created on first install".bright_yellow()
        );
    }
    Ok(())
}

pub fn reset_config() -> Result<()> {
    let config_path = config::default_config_path()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "Unknown".to_string());

    config::save_config(&AppConfig::default())
        .map_err(|source| CliError::ConfigSave { source })?;

    println!(
        "{}",
        "✓ Configuration reset to defaults".bright_green().bold()
    );
    println!();
    println!("  {} {}", "Config file:".bright_white().bold(), config_path);
    println!();
    println!(
        "  {}",
        "Run 'modstack config set-install-path <path>' to choose a game installation"
            .bright_cyan()
    );
    Ok(())
}
