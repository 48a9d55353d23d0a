use crate::model::map::Dated;
use crate::model::performance::{Performance, TempoEntry, TempoMap};
use crate::model::score::{Event, EventKind, Score, ScorePart, TimeSignature, TimeSignatureMap};
use anyhow::{Result, anyhow};
use log::{debug, info, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
const SUSTAIN_PEDAL: u8 = 64;

/// Name of the auxiliary map that takes controller changes other than the sustain pedal.
pub const CONTROL_MAP: &str = "control";

struct NoteInterval {
    key: u8,
    start_tick: u64,
    end_tick: u64,
    velocity: u8,
    channel: u8,
}

/// A score read from a MIDI file together with the performance its tempo events describe.
#[derive(Debug, Clone)]
pub struct ImportedMidi {
    pub score: Score,
    pub performance: Performance,
}

pub fn import_midi_file<P: AsRef<Path>>(path: P) -> Result<ImportedMidi> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to read MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    let title = path
        .as_ref()
        .file_name()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string());
    midi_bytes_to_score(&bytes, title)
}

pub fn midi_bytes_to_score(bytes: &[u8], title: Option<String>) -> Result<ImportedMidi> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Failed to parse MIDI: {:?}", e))?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u64,
        Timing::Timecode(_fps, _subframe) => {
            return Err(anyhow!(
                "SMPTE timecode midi timing is not currently supported..!"
            ));
        }
    };
    if ticks_per_quarter == 0 {
        return Err(anyhow!("MIDI file declares 0 ticks per quarter note..!"));
    }

    debug!("Ticks per quarter note: {}", ticks_per_quarter);
    debug!(
        "MIDI format: {:?}, tracks: {}",
        smf.header.format,
        smf.tracks.len()
    );

    let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
    let mut time_signatures: Vec<(u64, TimeSignature)> = Vec::new();
    let mut track_names: HashMap<u8, String> = HashMap::new();
    let mut controls: BTreeMap<u8, Vec<(u64, u8, u8)>> = BTreeMap::new();

    let mut intervals: Vec<NoteInterval> = Vec::new();
    let mut open_notes: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();
    let mut last_tick: u64 = 0;

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut abs_tick: u64 = 0;
        let mut track_name: Option<String> = None;

        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);

            match &event.kind {
                TrackEventKind::Meta(meta) => match meta {
                    MetaMessage::Tempo(micro) => {
                        let mpqn: u32 = micro.as_int();
                        tempo_changes.push((abs_tick, mpqn));
                        debug!(
                            "Tempo change at tick {} -> {} us/qn (track {})",
                            abs_tick, mpqn, track_idx
                        );
                    }
                    MetaMessage::TimeSignature(numerator, denominator_pow, _, _) => {
                        time_signatures.push((
                            abs_tick,
                            TimeSignature {
                                numerator: *numerator as f64,
                                denominator: 1u32 << (*denominator_pow).min(31),
                            },
                        ));
                    }
                    MetaMessage::TrackName(bytes) => {
                        if track_name.is_none() {
                            let name = String::from_utf8_lossy(bytes).trim().to_string();
                            debug!("Track name: {}", name);
                            track_name = Some(name);
                        }
                    }
                    _ => {}
                },
                TrackEventKind::Midi { channel, message } => {
                    let ch: u8 = channel.as_int();
                    if let Some(name) = track_name.as_ref().filter(|n| !n.is_empty()) {
                        track_names.entry(ch).or_insert_with(|| name.clone());
                    }

                    match message {
                        MidiMessage::NoteOn { key, vel } => {
                            let velocity: u8 = vel.as_int();

                            if velocity == 0 {
                                close_note(
                                    &mut open_notes,
                                    &mut intervals,
                                    ch,
                                    key.as_int(),
                                    abs_tick,
                                );
                            } else {
                                open_notes
                                    .entry((ch, key.as_int()))
                                    .or_default()
                                    .push((abs_tick, velocity));
                            }
                        }
                        MidiMessage::NoteOff { key, vel: _ } => {
                            close_note(&mut open_notes, &mut intervals, ch, key.as_int(), abs_tick);
                        }
                        MidiMessage::Controller { controller, value } => {
                            controls.entry(ch).or_default().push((
                                abs_tick,
                                controller.as_int(),
                                value.as_int(),
                            ));
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        last_tick = last_tick.max(abs_tick);
    }

    let last_tick_estimate = intervals
        .iter()
        .map(|interval| interval.end_tick)
        .max()
        .unwrap_or(0)
        .max(last_tick);

    for ((ch, key), stack) in open_notes.into_iter() {
        for (start_tick, start_vel) in stack {
            let end_tick = if last_tick_estimate > start_tick {
                last_tick_estimate
            } else {
                start_tick + ticks_per_quarter
            };

            intervals.push(NoteInterval {
                key,
                start_tick,
                end_tick,
                velocity: start_vel,
                channel: ch,
            });

            warn!(
                "Unclosed NoteOn for {}, channel: {} at tick: {} auto-closing at: {}..!",
                key, ch, start_tick, end_tick
            );
        }
    }

    intervals.sort_by_key(|i| (i.start_tick, i.channel, i.key));

    let mut channels: Vec<u8> = intervals.iter().map(|i| i.channel).collect();
    channels.extend(controls.keys().copied());
    channels.sort_unstable();
    channels.dedup();

    let mut parts: Vec<ScorePart> = Vec::new();
    let mut note_counter = 0usize;
    for (index, ch) in channels.iter().enumerate() {
        let name = track_names
            .get(ch)
            .cloned()
            .unwrap_or_else(|| format!("Channel {}", ch + 1));
        let mut part = ScorePart::new(&name, index as u32 + 1, *ch, 0);

        for interval in intervals.iter().filter(|i| i.channel == *ch) {
            if interval.end_tick <= interval.start_tick {
                debug!(
                    "Skipping zero length midi note {} at tick {}..!",
                    interval.key, interval.start_tick
                );
                continue;
            }
            note_counter += 1;
            part.score.push(Event::note(
                &format!("n{}", note_counter),
                interval.start_tick as f64,
                (interval.end_tick - interval.start_tick) as f64,
                interval.key as f64,
                interval.velocity as f64,
            ));
        }

        for (tick, controller, value) in controls.get(ch).into_iter().flatten() {
            if *controller == SUSTAIN_PEDAL {
                part.pedal_map.push(Event::pedal(*tick as f64, 0.0, *value as f64));
            } else {
                part.aux_maps
                    .entry(CONTROL_MAP.to_string())
                    .or_default()
                    .push(Event {
                        id: None,
                        date: *tick as f64,
                        duration: 0.0,
                        kind: EventKind::Control {
                            controller: *controller,
                            value: *value as f64,
                        },
                    });
            }
        }

        parts.push(part);
    }

    tempo_changes.sort_by_key(|(tick, _)| *tick);
    let mut tempo = TempoMap::new();
    for (tick, mpqn) in tempo_changes.into_iter().filter(|(_, mpqn)| *mpqn > 0) {
        tempo.push_entry(
            tick as f64,
            TempoEntry::constant(MICROSECONDS_PER_MINUTE / mpqn as f64, 0.25),
        );
    }

    let time_signature_map: TimeSignatureMap = time_signatures
        .into_iter()
        .map(|(tick, signature)| Dated::new(tick as f64, signature))
        .collect();

    let ppq = ticks_per_quarter.min(u32::MAX as u64) as u32;
    let mut score = Score {
        title,
        ppq,
        parts,
        ..Default::default()
    };
    score.global.time_signature_map = time_signature_map;

    let mut performance = Performance::new("midi", ppq);
    if !tempo.is_empty() {
        performance.global.dated.tempo = Some(tempo);
    }

    info!(
        "Imported {} notes in {} parts from MIDI..!",
        note_counter,
        score.parts.len()
    );
    Ok(ImportedMidi { score, performance })
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), Vec<(u64, u8)>>,
    intervals: &mut Vec<NoteInterval>,
    ch: u8,
    key: u8,
    abs_tick: u64,
) {
    if let Some(stack) = open_notes.get_mut(&(ch, key))
        && let Some((start_tick, start_vel)) = stack.pop()
    {
        intervals.push(NoteInterval {
            key,
            start_tick,
            end_tick: abs_tick,
            velocity: start_vel,
            channel: ch,
        });
    } else {
        debug!(
            "Orphaned NoteOff for {} ch{} at tick {}..!",
            key, ch, abs_tick
        );
    }
}
