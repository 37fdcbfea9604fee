mod apply;
mod config;
mod library;

pub use apply::{apply_mods, revert_mods, show_status, ApplyArgs};
pub use config::{reset_config, set_install_path, set_storage_path, show_config};
pub use library::{
    disable_mod, enable_mod, install_mod, list_mods, reorder_mods, uninstall_mod, InstallModArgs,
    LibraryArgs,
};
