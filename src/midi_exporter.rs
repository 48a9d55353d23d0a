use crate::model::rendered::{ControlPoint, Performed, RenderedEvent, RenderedPart};
use crate::model::score::EventKind;
use anyhow::{Result, anyhow};
use log::{debug, info};
use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};
use std::fs;
use std::path::Path;

/// At 60 bpm with 1000 ticks per quarter one tick is one millisecond.
pub const TICKS_PER_QUARTER: u16 = 1000;
const MICROSECONDS_PER_QUARTER: u32 = 1_000_000;

/// Largest tick a delta time can reach.
const MAX_TICK: f64 = 0x0FFF_FFFF as f64;

const SUSTAIN_PEDAL: u8 = 64;
const CHANNEL_VOLUME: u8 = 7;

/// Events at one tick go out in this order, so a note can end and restart on the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Priority {
    NoteOff,
    Control,
    NoteOn,
}

fn tick(ms: f64) -> u32 {
    if ms.is_finite() && ms > 0.0 {
        ms.round().min(MAX_TICK) as u32
    } else {
        0
    }
}

fn seven_bit(value: f64) -> u7 {
    u7::new(value.round().clamp(0.0, 127.0) as u8)
}

fn controller(channel: u4, controller: u8, value: f64) -> TrackEventKind<'static> {
    TrackEventKind::Midi {
        channel,
        message: MidiMessage::Controller {
            controller: seven_bit(controller as f64),
            value: seven_bit(value),
        },
    }
}

fn push_event(
    timed: &mut Vec<(u32, Priority, TrackEventKind<'static>)>,
    channel: u4,
    event: &RenderedEvent,
) {
    let start = tick(event.ms_date);
    match &event.kind {
        EventKind::Note { pitch, velocity } => {
            let key = seven_bit(*pitch);
            let vel = u7::new(velocity.unwrap_or(100.0).round().clamp(1.0, 127.0) as u8);
            let end = tick(event.ms_end.unwrap_or(event.ms_date)).max(start);
            timed.push((
                start,
                Priority::NoteOn,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn { key, vel },
                },
            ));
            timed.push((
                end,
                Priority::NoteOff,
                TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOff { key, vel: u7::new(0) },
                },
            ));
        }
        EventKind::Pedal { value } => {
            timed.push((start, Priority::Control, controller(channel, SUSTAIN_PEDAL, *value)));
            if let Some(end) = event.ms_end.filter(|_| event.duration > 0.0) {
                timed.push((tick(end), Priority::Control, controller(channel, SUSTAIN_PEDAL, 0.0)));
            }
        }
        EventKind::Control { controller: cc, value } => {
            timed.push((start, Priority::Control, controller(channel, *cc, *value)));
        }
        EventKind::Rest | EventKind::Marker { .. } => {}
    }
}

fn volume_events(
    timed: &mut Vec<(u32, Priority, TrackEventKind<'static>)>,
    channel: u4,
    curve: &[ControlPoint],
) {
    let mut last: Option<u7> = None;
    for point in curve {
        let Some(ms) = point.ms_date else {
            continue;
        };
        let value = seven_bit(point.value);
        if last == Some(value) && !point.mandatory {
            continue;
        }
        timed.push((tick(ms), Priority::Control, controller(channel, CHANNEL_VOLUME, point.value)));
        last = Some(value);
    }
}

fn part_track<'a>(part: &'a RenderedPart, global: &[RenderedEvent]) -> Track<'a> {
    let channel = u4::new(part.midi_channel.unwrap_or(0).min(15));
    let mut timed: Vec<(u32, Priority, TrackEventKind<'static>)> = Vec::new();

    for event in part
        .score
        .iter()
        .chain(part.pedal_map.iter())
        .chain(part.aux_maps.values().flatten())
        .chain(global.iter())
    {
        push_event(&mut timed, channel, event);
    }
    volume_events(&mut timed, channel, &part.channel_volume);

    timed.sort_by_key(|(tick, priority, _)| (*tick, *priority));

    let mut track: Track<'a> = Vec::with_capacity(timed.len() + 2);
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(part.name.as_bytes())),
    });

    let mut last_tick = 0u32;
    for (tick, _, kind) in timed {
        track.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind,
        });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    track
}

/// Lays a rendered performance out as a format 1 file: a tempo track and one track per part.
pub fn performed_to_smf(performed: &Performed) -> Smf<'_> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(MICROSECONDS_PER_QUARTER))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    let mut global: Vec<RenderedEvent> = performed.global.pedal_map.clone();
    global.extend(performed.global.aux_maps.values().flatten().cloned());

    for part in performed.parts.iter() {
        let track = part_track(part, &global);
        debug!("Track '{}' holds {} events..!", part.name, track.len());
        smf.tracks.push(track);
    }
    smf
}

pub fn performed_to_midi_bytes(performed: &Performed) -> Result<Vec<u8>> {
    let smf = performed_to_smf(performed);
    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| anyhow!("Failed to encode MIDI: {:?}", e))?;
    Ok(bytes)
}

pub fn export_midi_file<P: AsRef<Path>>(performed: &Performed, path: P) -> Result<()> {
    let bytes = performed_to_midi_bytes(performed)?;
    fs::write(path.as_ref(), &bytes).map_err(|e| {
        anyhow!(
            "Failed to write MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;
    info!(
        "Wrote {} parts to '{}'..!",
        performed.parts.len(),
        path.as_ref().display()
    );
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::midi_importer::midi_bytes_to_score;

    fn note(id: &str, pitch: f64, velocity: f64, ms_date: f64, ms_end: f64) -> RenderedEvent {
        RenderedEvent {
            id: Some(id.into()),
            kind: EventKind::Note {
                pitch,
                velocity: Some(velocity),
            },
            date: 0.0,
            duration: 720.0,
            performed_date: 0.0,
            performed_end: Some(720.0),
            ms_date,
            ms_end: Some(ms_end),
            ms_duration: Some(ms_end - ms_date),
            detune_cents: None,
            detune_hz: None,
            tuning_offset: None,
            tuning_unit: None,
        }
    }

    fn performed() -> Performed {
        let mut volume = vec![
            ControlPoint::new(0.0, 64.0, true),
            ControlPoint::new(10.0, 64.2, false),
            ControlPoint::new(20.0, 80.0, false),
        ];
        for (i, point) in volume.iter_mut().enumerate() {
            point.ms_date = Some(i as f64 * 100.0);
        }

        Performed {
            name: "test".into(),
            ppq: 720,
            parts: vec![RenderedPart {
                name: "Piano".into(),
                number: Some(1),
                midi_channel: Some(2),
                midi_port: Some(0),
                score: vec![
                    note("a", 60.0, 0.0, 0.0, 499.6),
                    note("b", 62.0, 300.0, 499.6, 1000.0),
                ],
                channel_volume: volume,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn millisecond_time_base() {
        env_logger::try_init().unwrap_or(());

        let bytes = performed_to_midi_bytes(&performed()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.tracks.len(), 2);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(TICKS_PER_QUARTER)));

        let mut abs = 0u32;
        let mut ons = Vec::new();
        let mut volumes = 0;
        for event in smf.tracks[1].iter() {
            abs += event.delta.as_int();
            if let TrackEventKind::Midi { channel, message } = event.kind {
                assert_eq!(channel.as_int(), 2);
                match message {
                    MidiMessage::NoteOn { key, vel } => ons.push((abs, key.as_int(), vel.as_int())),
                    MidiMessage::Controller { controller, .. } if controller.as_int() == CHANNEL_VOLUME => {
                        volumes += 1
                    }
                    _ => {}
                }
            }
        }
        // velocity clamped into 1..=127, onsets rounded to whole milliseconds
        assert_eq!(ons, vec![(0, 60, 1), (500, 62, 127)]);
        // the second point rounds to the same value and is dropped
        assert_eq!(volumes, 2);
    }

    #[test]
    fn exported_file_reimports() {
        let bytes = performed_to_midi_bytes(&performed()).unwrap();
        let imported = midi_bytes_to_score(&bytes, None).unwrap();
        let notes = &imported.score.parts[0].score;

        assert_eq!(imported.score.parts[0].name, "Piano");
        assert_eq!(notes.len(), 2);
        assert_eq!((notes[0].date, notes[0].duration), (0.0, 500.0));
        assert_eq!((notes[1].date, notes[1].duration), (500.0, 500.0));
    }
}
