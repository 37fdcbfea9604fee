use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Game installation directory is not set")]
    #[diagnostic(
        code(config::install_dir_missing),
        help("Pass --install-dir or run 'modstack config set-install-path <path>'")
    )]
    InstallDirNotSet,

    #[error("Game installation directory does not exist: {path}")]
    #[diagnostic(
        code(config::install_dir_invalid),
        help("Make sure the path points to an existing directory")
    )]
    InstallDirNotFound { path: Utf8PathBuf },

    #[error("Mod directory not found: {path}")]
    #[diagnostic(
        code(library::source_missing),
        help("Point 'modstack install' at a directory containing mod.config.json or mod.config.toml")
    )]
    ModSourceNotFound { path: Utf8PathBuf },

    #[error("No installed mod with id {id}")]
    #[diagnostic(
        code(library::mod_not_found),
        help("Run 'modstack list' to see installed mod ids")
    )]
    ModNotFound { id: String },

    #[error("{count} location(s) failed to apply")]
    #[diagnostic(
        code(engine::apply_failed),
        help("Everything else was applied and recorded. Fix the failing mods and apply again")
    )]
    ApplyFailed { count: usize },

    #[error("Apply was cancelled")]
    #[diagnostic(
        code(engine::cancelled),
        help("Files processed before cancelling were recorded. Apply again to finish")
    )]
    ApplyCancelled,

    #[error(transparent)]
    #[diagnostic(code(engine::error))]
    Engine(#[from] modstack_engine::Error),

    #[error("Failed to save config: {source}")]
    #[diagnostic(
        code(config::save_failed),
        help("Check file permissions next to the modstack executable")
    )]
    ConfigSave {
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    /// Map engine errors to friendlier diagnostics where one exists.
    pub fn from_engine(error: modstack_engine::Error) -> Self {
        match error {
            modstack_engine::Error::ModNotFound(id) => Self::ModNotFound { id },
            other => Self::Engine(other),
        }
    }
}
