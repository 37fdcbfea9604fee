use camino::Utf8PathBuf;
use clap::builder::{styling::AnsiColor, Styles};
use clap::ColorChoice;
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use commands::{
    apply_mods, disable_mod, enable_mod, install_mod, list_mods, reorder_mods, revert_mods,
    show_status, uninstall_mod, ApplyArgs, InstallModArgs, LibraryArgs,
};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

mod commands;
mod errors;
mod utils;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Game installation the mods are applied to (overrides config.toml)
    #[arg(long, global = true)]
    install_dir: Option<Utf8PathBuf>,

    /// Directory holding installed mods and history (overrides config.toml)
    #[arg(long, global = true)]
    storage_dir: Option<Utf8PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply every enabled mod, reverting the previous apply first
    Apply {
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Restore every file touched by previous applies
    Revert {
        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },
    /// Show the applied history
    Status {
        /// Print the history as JSON
        #[arg(long)]
        json: bool,
    },
    /// List installed mods in priority order
    List,
    /// Install a mod from a directory
    Install {
        /// The mod directory, containing mod.config.json or mod.config.toml
        path: Utf8PathBuf,

        /// The variant to select
        #[arg(long, default_value = "default")]
        variant: String,
    },
    /// Enable an installed mod
    Enable { id: String },
    /// Disable an installed mod
    Disable { id: String },
    /// Remove an installed mod from the library
    Uninstall { id: String },
    /// Set the priority order of installed mods, highest priority first
    Reorder {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Manage config.toml
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the current configuration
    Show,
    /// Set the game installation directory
    SetInstallPath { path: Utf8PathBuf },
    /// Set the library storage directory
    SetStoragePath { path: Utf8PathBuf },
    /// Reset the configuration to defaults
    Reset,
}

fn parse_args() -> Result<Args> {
    // Configure colored/styled help output
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default().bold())
        .usage(AnsiColor::Green.on_default().bold())
        .literal(AnsiColor::Cyan.on_default())
        .placeholder(AnsiColor::Blue.on_default());

    let matches = Args::command()
        .styles(styles)
        .color(ColorChoice::Auto)
        .get_matches();

    Args::from_arg_matches(&matches).into_diagnostic()
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "modstack=debug,modstack_engine=debug"
    } else {
        "modstack=info,modstack_engine=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = parse_args()?;
    init_logging(args.verbose);

    let library = LibraryArgs {
        install_dir: args.install_dir,
        storage_dir: args.storage_dir,
    };

    match args.command {
        Commands::Apply { no_progress } => apply_mods(library, ApplyArgs { no_progress }),
        Commands::Revert { no_progress } => revert_mods(library, ApplyArgs { no_progress }),
        Commands::Status { json } => show_status(library, json),
        Commands::List => list_mods(library),
        Commands::Install { path, variant } => install_mod(library, InstallModArgs { path, variant }),
        Commands::Enable { id } => enable_mod(library, &id),
        Commands::Disable { id } => disable_mod(library, &id),
        Commands::Uninstall { id } => uninstall_mod(library, &id),
        Commands::Reorder { ids } => reorder_mods(library, &ids),
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::show_config(),
            ConfigAction::SetInstallPath { path } => commands::set_install_path(path),
            ConfigAction::SetStoragePath { path } => commands::set_storage_path(path),
            ConfigAction::Reset => commands::reset_config(),
        },
    }
}
