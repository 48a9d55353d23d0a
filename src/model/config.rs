use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "CADENZA",
    about = "Render a symbolic score into an expressive, millisecond-timed performance!"
)]
pub struct Args {
    /// Path to the score, either a JSON score or a MIDI file (.mid/.midi).
    pub score: PathBuf,

    /// Path to a JSON performance (or a set of performances).
    /// Without one, a MIDI score is rendered with the tempo map found in the file.
    pub performance: Option<PathBuf>,

    /// Name of the performance to use when the file holds several.
    #[arg(short = 'n', long = "performance")]
    pub performance_name: Option<String>,

    /// Base seed for random imprecision, renders are reproducible when set.
    #[arg(short, long)]
    pub seed: Option<u64>,

    /// Disable shaking of simultaneous imprecision offsets.
    #[arg(long = "no-shake", default_value_t = false)]
    pub no_shake: bool,

    /// Ignore sequencing maps and render the score as written.
    #[arg(long = "no-repeats", default_value_t = false)]
    pub no_repeats: bool,

    /// Render parts on worker threads.
    #[arg(short, long, default_value_t = false)]
    pub parallel: bool,

    /// Write the rendered performance as JSON.
    #[arg(long = "output-json")]
    pub output_json: Option<PathBuf>,

    /// Write the rendered performance as a MIDI file.
    #[arg(long = "output-midi")]
    pub output_midi: Option<PathBuf>,

    /// Dry run (print the first dry_run_max rendered notes and exit).
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,

    /// Maximum events to print in dry run.
    #[arg(long, default_value_t = 80)]
    pub dry_run_max: usize,

    /// Prints extra information to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            seed: self.seed,
            shake_polyphony: !self.no_shake,
            expand_sequencing: !self.no_repeats,
            parallel_parts: self.parallel,
            ..Default::default()
        }
    }
}

/// Switches for one render.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderOptions {
    /// Seed for imprecision providers whose distribution has none. `None` draws fresh entropy.
    pub seed: Option<u64>,
    pub shake_polyphony: bool,
    /// Resolve unknown tempo, dynamics and articulation names through the built-in tables.
    pub builtin_defaults: bool,
    pub parallel_parts: bool,
    pub expand_sequencing: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            seed: None,
            shake_polyphony: true,
            builtin_defaults: true,
            parallel_parts: false,
            expand_sequencing: true,
        }
    }
}

impl RenderOptions {
    pub fn seeded(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli_flags_map_to_options() {
        let args = Args::parse_from([
            "cadenza",
            "score.json",
            "performance.json",
            "--seed",
            "7",
            "--no-shake",
            "--parallel",
        ]);
        let options = args.render_options();

        assert_eq!(options.seed, Some(7));
        assert!(!options.shake_polyphony);
        assert!(options.parallel_parts);
        assert!(options.expand_sequencing);
        assert!(options.builtin_defaults);
    }

    #[test]
    fn options_from_partial_json() {
        let options: RenderOptions = serde_json::from_str(r#"{"seed": 3}"#).unwrap();
        assert_eq!(options, RenderOptions::seeded(3));
    }
}
