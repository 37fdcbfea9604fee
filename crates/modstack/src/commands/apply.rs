use crate::commands::LibraryArgs;
use crate::errors::CliError;
use crate::println_pad;
use crate::utils::{create_progress_bar, print_ansi_boxed_lines};
use colored::Colorize;
use miette::{IntoDiagnostic, Result};
use modstack_engine::{ApplyOutcome, EngineStage, FsModLibrary, ModEngine, ModLibrary};

#[derive(Debug, Clone, Copy)]
pub struct ApplyArgs {
    pub no_progress: bool,
}

fn stage_label(stage: EngineStage) -> &'static str {
    match stage {
        EngineStage::ReadingHistory => "Reading history",
        EngineStage::Scheduling => "Scheduling",
        EngineStage::ApplyingLocation => "Applying",
        EngineStage::FinishingArchives => "Finishing archives",
        EngineStage::CommittingHistory => "Committing history",
        EngineStage::Complete => "Done",
    }
}

fn engine(args: ApplyArgs) -> (ModEngine, Option<indicatif::ProgressBar>) {
    let engine = ModEngine::default();
    if args.no_progress {
        return (engine, None);
    }

    let pb = create_progress_bar();
    let sink = pb.clone();
    let engine = engine.with_progress(move |progress| {
        sink.set_length(progress.total);
        sink.set_position(progress.current);
        let message = match progress.current_location {
            Some(location) if !location.is_empty() => {
                format!("{} {}", stage_label(progress.stage), location)
            }
            _ => stage_label(progress.stage).to_string(),
        };
        sink.set_message(message);
    });
    (engine, Some(pb))
}

fn run(library: &FsModLibrary, args: ApplyArgs, revert: bool) -> Result<ApplyOutcome> {
    let (mut engine, pb) = engine(args);
    let outcome = if revert {
        engine.apply(library, &[])
    } else {
        engine.apply_library(library)
    };
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    outcome.map_err(|e| CliError::from_engine(e).into())
}

fn report(outcome: &ApplyOutcome) -> Result<()> {
    let mut lines = vec![
        format!(
            "{} {}",
            "Locations applied:".bright_white(),
            outcome.applied_locations.len()
        ),
        format!("{} {}", "History entries:".bright_white(), outcome.history.len()),
        format!(
            "{} {}",
            "Archives rewritten:".bright_white(),
            outcome.repacked_archives.len()
        ),
        format!(
            "{} {:.2}s",
            "Elapsed:".bright_white(),
            outcome.build_time.as_secs_f64()
        ),
    ];
    if !outcome.skipped_mods.is_empty() {
        lines.push(format!(
            "{} {}",
            "Skipped mods:".bright_yellow(),
            outcome.skipped_mods.join(", ")
        ));
    }
    if !outcome.skipped_records.is_empty() {
        lines.push(format!(
            "{} {}",
            "Skipped unsafe paths:".bright_yellow(),
            outcome.skipped_records.len()
        ));
    }
    if !outcome.dropped_locations.is_empty() {
        lines.push(format!(
            "{} {}",
            "Unsupported archives:".bright_yellow(),
            outcome.dropped_locations.join(", ")
        ));
    }
    print_ansi_boxed_lines(&lines);

    for failure in &outcome.failed_locations {
        println_pad!(
            "{} {}: {}",
            "✗".bright_red(),
            failure.location.bright_white(),
            failure.error
        );
    }

    if outcome.cancelled {
        return Err(CliError::ApplyCancelled.into());
    }
    if !outcome.failed_locations.is_empty() {
        return Err(CliError::ApplyFailed {
            count: outcome.failed_locations.len(),
        }
        .into());
    }
    Ok(())
}

pub fn apply_mods(library: LibraryArgs, args: ApplyArgs) -> Result<()> {
    let library = library.open()?;
    println_pad!(
        "{} {}",
        "🔧 Applying mods to".bright_blue().bold(),
        library.install_root().as_str().bright_white()
    );

    let outcome = run(&library, args, false)?;
    if outcome.success {
        println_pad!("{}", "✓ Mods applied".bright_green().bold());
    }
    report(&outcome)
}

pub fn revert_mods(library: LibraryArgs, args: ApplyArgs) -> Result<()> {
    let library = library.open()?;
    println_pad!(
        "{} {}",
        "↩ Reverting".bright_blue().bold(),
        library.install_root().as_str().bright_white()
    );

    let outcome = run(&library, args, true)?;
    if outcome.success {
        println_pad!("{}", "✓ Installation restored".bright_green().bold());
    }
    report(&outcome)
}

pub fn show_status(library: LibraryArgs, json: bool) -> Result<()> {
    let library = library.open()?;
    let history = library
        .read_history()
        .map_err(CliError::from_engine)?
        .unwrap_or_default();

    if json {
        println!("{}", serde_json::to_string_pretty(&history).into_diagnostic()?);
        return Ok(());
    }

    if history.is_empty() {
        println_pad!("{}", "Nothing applied".bright_yellow());
        return Ok(());
    }

    println_pad!(
        "{} {}",
        "Applied to".bright_blue().bold(),
        library.install_root().as_str().bright_white()
    );
    let sections = [
        ("Added", &history.added_files),
        ("Replaced", &history.replaced_files),
        ("Removed", &history.removed_files),
    ];
    for (title, files) in sections {
        if files.is_empty() {
            continue;
        }
        println_pad!("\n{} ({})", title.bright_magenta().bold(), files.len());
        for path in files {
            println_pad!("   {} {}", "•".bright_cyan(), path);
        }
    }
    Ok(())
}
