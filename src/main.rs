use CADENZA::{
    Args, Performance, Score, export_midi_file, import_midi_file, load_performance, load_score,
    render, save_performed,
};
use anyhow::{Result, bail};
use clap::Parser;
use log::{debug, info, warn};
use std::path::Path;

fn is_midi(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("mid") || e.eq_ignore_ascii_case("midi"))
}

fn load_inputs(args: &Args) -> Result<(Score, Performance)> {
    let (score, midi_performance) = if is_midi(&args.score) {
        info!("Importing MIDI file: '{}'...", args.score.display());
        let imported = import_midi_file(&args.score)?;
        (imported.score, Some(imported.performance))
    } else {
        info!("Loading score: '{}'...", args.score.display());
        (load_score(&args.score)?, None)
    };

    let performance = match (&args.performance, midi_performance) {
        (Some(path), _) => load_performance(path, args.performance_name.as_deref())?,
        (None, Some(performance)) => performance,
        (None, None) => {
            warn!("No performance given, rendering with defaults..!");
            Performance::new("default", score.ppq)
        }
    };
    Ok((score, performance))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let (score, performance) = load_inputs(&args)?;
    debug!(
        "Loaded '{}' with {} notes and performance '{}'..!",
        score.title.clone().unwrap_or_else(|| "<unknown>".into()),
        score.note_count(),
        performance.name
    );

    let performed = render(&score, &performance, &args.render_options());

    for failure in performed.skipped.iter() {
        warn!("Skipped part '{}': {}..!", failure.part, failure.reason);
    }
    if args.verbose {
        for warning in performed.warnings.iter() {
            info!(
                "[{}] {}",
                warning.part.as_deref().unwrap_or("global"),
                warning.error
            );
        }
    }

    if args.dry_run {
        info!("Previewing at most {} notes..!", args.dry_run_max);
        let mut notes: Vec<_> = performed
            .parts
            .iter()
            .flat_map(|p| p.notes().map(move |n| (p.name.as_str(), n)))
            .collect();
        notes.sort_by(|a, b| a.1.ms_date.total_cmp(&b.1.ms_date));

        for (i, (part, note)) in notes.iter().enumerate() {
            if i >= args.dry_run_max {
                break;
            }
            info!(
                "Note {}: part={} id={} pitch={} vel={} date={} ms={:.3} dur_ms={:.3}",
                i,
                part,
                note.id.as_deref().unwrap_or("-"),
                note.pitch().unwrap_or_default(),
                note.velocity().unwrap_or_default(),
                note.date,
                note.ms_date,
                note.ms_duration.unwrap_or_default()
            );
        }
        return Ok(());
    }

    if args.output_json.is_none() && args.output_midi.is_none() {
        bail!("Nothing to do, pass --output-json, --output-midi or --dry-run..!");
    }
    if let Some(path) = args.output_json.as_ref() {
        save_performed(&performed, path)?;
        info!("Wrote '{}'..!", path.display());
    }
    if let Some(path) = args.output_midi.as_ref() {
        export_midi_file(&performed, path)?;
    }

    info!(
        "Rendered {} notes over {:.1} seconds, exiting..!",
        performed.note_count(),
        performed.ms_length() / 1000.0
    );
    Ok(())
}
