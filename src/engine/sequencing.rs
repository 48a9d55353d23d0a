//! Flattens repeats and alternative endings into one linear timeline.

use crate::model::map::{Dated, GenericMap, MapItem};
use crate::model::performance::{ArticulationMap, DatedMaps, ImprecisionMap};
use crate::model::score::{Event, Goto, ScoreGlobal, ScorePart};
use log::{debug, info};
use std::collections::BTreeMap;

/// Id of a repeated element mapped to the id of its next copy.
pub type RepetitionIds = BTreeMap<String, String>;

pub fn repetition_id(copy: usize, id: &str) -> String {
    format!("repetition_{}_{}", copy, id)
}

/// A stretch of the source timeline and where it lands in the flattened one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: f64,
    /// `None` runs to the end of the source.
    pub end: Option<f64>,
    pub offset: f64,
}

impl Segment {
    pub fn contains(&self, date: f64) -> bool {
        date >= self.start && self.end.is_none_or(|end| date < end)
    }
}

/// The linear reading order of a timeline with jumps.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    pub segments: Vec<Segment>,
    /// For every goto in input order, whether it was taken each time playback reached it.
    pub decisions: Vec<Vec<bool>>,
}

struct Activity<'a> {
    goto: &'a Goto,
    source: usize,
    counter: usize,
}

impl Activity<'_> {
    /// Consumes one pass. The pattern's last character holds once it is exhausted, but an
    /// exhausted jump backwards stays inactive so playback cannot loop forever.
    fn check(&mut self) -> bool {
        let pattern = self.goto.activity.as_bytes();
        let exhausted = self.counter >= pattern.len();
        let flag = match pattern.get(self.counter).or(pattern.last()) {
            Some(c) => *c == b'1',
            None => true,
        };
        self.counter += 1;

        if exhausted && self.goto.target_date <= self.goto.date {
            return false;
        }
        flag
    }
}

/// Resolves the jumps of a sequencing map. `None` if there is nothing to resolve.
pub fn resolve(gotos: &[Goto]) -> Option<Sequence> {
    if gotos.is_empty() {
        return None;
    }

    let mut activities: Vec<Activity> = gotos
        .iter()
        .enumerate()
        .map(|(source, goto)| Activity {
            goto,
            source,
            counter: 0,
        })
        .collect();
    // stable, so gotos at one date are checked in document order
    activities.sort_by(|a, b| a.goto.date.total_cmp(&b.goto.date));

    let mut decisions = vec![Vec::new(); gotos.len()];
    let mut segments = Vec::new();
    let mut current = 0.0;
    let mut offset = 0.0;

    let mut i = 0;
    while i < activities.len() {
        let activity = &mut activities[i];
        if activity.goto.date < current {
            i += 1;
            continue;
        }
        let active = activity.check();
        decisions[activity.source].push(active);
        if !active {
            i += 1;
            continue;
        }

        let goto = activity.goto;
        segments.push(Segment {
            start: current,
            end: Some(goto.date),
            offset,
        });
        offset += goto.date - goto.target_date;
        current = goto.target_date;
        i = 0;
    }

    segments.push(Segment {
        start: current,
        end: None,
        offset,
    });

    debug!(
        "Resolved {} gotos into {} segments..!",
        gotos.len(),
        segments.len()
    );
    Some(Sequence {
        segments,
        decisions,
    })
}

/// One copy of a source element: its index, the date shift and how many copies came before.
#[derive(Debug, Clone, Copy)]
struct Placement {
    source: usize,
    offset: f64,
    repetition: usize,
}

fn strip_hash(id: &str) -> &str {
    id.strip_prefix('#').unwrap_or(id)
}

impl Sequence {
    fn plan(&self, dates: &[f64]) -> Vec<Placement> {
        let mut counts = vec![0usize; dates.len()];
        let mut plan = Vec::new();

        for segment in &self.segments {
            for (source, date) in dates.iter().enumerate() {
                if !segment.contains(*date) {
                    continue;
                }
                plan.push(Placement {
                    source,
                    offset: segment.offset,
                    repetition: counts[source],
                });
                counts[source] += 1;
            }
        }
        plan
    }

    /// Copies the events along the sequence. Repeated events with an id get a fresh one and the
    /// id chain is recorded in `ids`.
    pub fn expand_events(&self, events: &[Event], ids: &mut RepetitionIds) -> Vec<Event> {
        let dates: Vec<f64> = events.iter().map(|e| e.date).collect();
        let mut expanded: Vec<Event> = self
            .plan(&dates)
            .into_iter()
            .map(|copy| {
                let mut event = events[copy.source].clone();
                event.date += copy.offset;
                if copy.repetition > 0
                    && let Some(id) = event.id.as_deref()
                {
                    let previous = match copy.repetition {
                        1 => id.to_string(),
                        n => repetition_id(n - 1, id),
                    };
                    let next = repetition_id(copy.repetition, id);
                    ids.insert(previous, next.clone());
                    event.id = Some(next);
                }
                event
            })
            .collect();
        expanded.sort_by(|a, b| a.date.total_cmp(&b.date));
        expanded
    }

    pub fn expand_map<T: Clone>(&self, map: &GenericMap<T>) -> GenericMap<T> {
        let dates: Vec<f64> = map.iter().map(|e| e.date).collect();
        self.plan(&dates)
            .into_iter()
            .filter_map(|copy| {
                let entry = map.get(copy.source)?;
                Some(Dated::new(entry.date + copy.offset, entry.value.clone()))
            })
            .collect()
    }

    /// Like [`Sequence::expand_map`], pointing each copy of a note articulation at the matching
    /// copy of its note.
    pub fn expand_articulations(&self, map: &ArticulationMap, ids: &RepetitionIds) -> ArticulationMap {
        let dates: Vec<f64> = map.iter().map(|e| e.date).collect();
        self.plan(&dates)
            .into_iter()
            .filter_map(|copy| {
                let entry = map.get(copy.source)?;
                let mut value = entry.value.clone();
                if let MapItem::Entry(articulation) = &mut value
                    && let Some(note_id) = articulation.note_id.as_deref()
                {
                    let mut id = strip_hash(note_id).to_string();
                    for _ in 0..copy.repetition {
                        match ids.get(&id) {
                            Some(next) => id = next.clone(),
                            None => break,
                        }
                    }
                    articulation.note_id = Some(id);
                }
                Some(Dated::new(entry.date + copy.offset, value))
            })
            .collect()
    }

    fn expand_imprecision(&self, map: &ImprecisionMap) -> ImprecisionMap {
        ImprecisionMap {
            detune_unit: map.detune_unit,
            entries: self.expand_map(&map.entries),
        }
    }

    /// Expands every performance map of one scope. Run after the score of that scope so the
    /// repetition ids are known.
    pub fn expand_dated_maps(&self, dated: &DatedMaps, ids: &RepetitionIds) -> DatedMaps {
        DatedMaps {
            tempo: dated.tempo.as_ref().map(|m| self.expand_map(m)),
            rubato: dated.rubato.as_ref().map(|m| self.expand_map(m)),
            dynamics: dated.dynamics.as_ref().map(|m| self.expand_map(m)),
            articulation: dated
                .articulation
                .as_ref()
                .map(|m| self.expand_articulations(m, ids)),
            asynchrony: dated.asynchrony.as_ref().map(|m| self.expand_map(m)),
            metrical_accentuation: dated
                .metrical_accentuation
                .as_ref()
                .map(|m| self.expand_map(m)),
            imprecision_timing: dated
                .imprecision_timing
                .as_ref()
                .map(|m| self.expand_imprecision(m)),
            imprecision_dynamics: dated
                .imprecision_dynamics
                .as_ref()
                .map(|m| self.expand_imprecision(m)),
            imprecision_tone_duration: dated
                .imprecision_tone_duration
                .as_ref()
                .map(|m| self.expand_imprecision(m)),
            imprecision_tuning: dated
                .imprecision_tuning
                .as_ref()
                .map(|m| self.expand_imprecision(m)),
        }
    }

    /// The part with its score, pedal, auxiliary and time signature maps flattened. The result
    /// carries no sequencing map.
    pub fn expand_part(&self, part: &ScorePart, ids: &mut RepetitionIds) -> ScorePart {
        ScorePart {
            name: part.name.clone(),
            number: part.number,
            midi_channel: part.midi_channel,
            midi_port: part.midi_port,
            score: self.expand_events(&part.score, ids),
            pedal_map: self.expand_events(&part.pedal_map, ids),
            time_signature_map: part
                .time_signature_map
                .as_ref()
                .map(|m| self.expand_map(m)),
            sequencing_map: None,
            aux_maps: part
                .aux_maps
                .iter()
                .map(|(name, events)| (name.clone(), self.expand_events(events, ids)))
                .collect(),
        }
    }

    pub fn expand_global(&self, global: &ScoreGlobal, ids: &mut RepetitionIds) -> ScoreGlobal {
        ScoreGlobal {
            time_signature_map: self.expand_map(&global.time_signature_map),
            sequencing_map: None,
            pedal_map: self.expand_events(&global.pedal_map, ids),
            aux_maps: global
                .aux_maps
                .iter()
                .map(|(name, events)| (name.clone(), self.expand_events(events, ids)))
                .collect(),
        }
    }
}

/// The sequencing map that governs a part: its own if it has one (even an empty one), otherwise
/// the global map.
pub fn for_part<'a>(part: &'a ScorePart, global: &'a ScoreGlobal) -> Option<&'a [Goto]> {
    match (&part.sequencing_map, &global.sequencing_map) {
        (Some(local), _) => Some(local.as_slice()),
        (None, Some(global)) => Some(global.as_slice()),
        _ => None,
    }
    .filter(|gotos| !gotos.is_empty())
}

pub fn log_sequence(label: &str, sequence: &Sequence) {
    let taken: usize = sequence
        .decisions
        .iter()
        .map(|d| d.iter().filter(|taken| **taken).count())
        .sum();
    info!(
        "Expanded {} along {} jumps..!",
        label, taken
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::performance::{ArticulationEntry, TempoEntry, TempoMap};

    fn note(id: &str, date: f64) -> Event {
        Event::note(id, date, 500.0, 60.0, 80.0)
    }

    #[test]
    fn loop_pattern_terminates() {
        env_logger::try_init().unwrap_or(());

        // a repeat that is taken on the first and third pass, nested in a second repeat
        let gotos = vec![Goto::new(2000.0, 0.0, "101"), Goto::new(3000.0, 1000.0, "10")];
        let sequence = resolve(&gotos).unwrap();

        assert_eq!(&sequence.decisions[0][..3], &[true, false, true]);
        // the exhausted backward jump is never taken again
        assert!(sequence.decisions[0][3..].iter().all(|taken| !taken));
        assert_eq!(sequence.decisions[1], vec![true, false]);

        let taken: usize = sequence.decisions[0].iter().filter(|t| **t).count();
        assert_eq!(taken, 2);

        assert_eq!(
            sequence.segments,
            vec![
                Segment { start: 0.0, end: Some(2000.0), offset: 0.0 },
                Segment { start: 0.0, end: Some(3000.0), offset: 2000.0 },
                Segment { start: 1000.0, end: Some(2000.0), offset: 4000.0 },
                Segment { start: 0.0, end: None, offset: 6000.0 },
            ]
        );
    }

    #[test]
    fn simple_repeat_with_ids() {
        let gotos = vec![Goto::new(1000.0, 0.0, "10")];
        let sequence = resolve(&gotos).unwrap();
        let events = vec![note("a", 0.0), note("b", 500.0), note("c", 1000.0)];

        let mut ids = RepetitionIds::new();
        let expanded = sequence.expand_events(&events, &mut ids);

        let dates: Vec<f64> = expanded.iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![0.0, 500.0, 1000.0, 1500.0, 2000.0]);
        let names: Vec<&str> = expanded.iter().filter_map(|e| e.id.as_deref()).collect();
        assert_eq!(names, vec!["a", "b", "repetition_1_a", "repetition_1_b", "c"]);
        assert_eq!(ids.get("a").map(String::as_str), Some("repetition_1_a"));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn third_pass_chains_ids() {
        let gotos = vec![Goto::new(1000.0, 0.0, "110")];
        let sequence = resolve(&gotos).unwrap();
        let mut ids = RepetitionIds::new();
        let expanded = sequence.expand_events(&[note("a", 0.0)], &mut ids);

        assert_eq!(expanded.len(), 3);
        assert_eq!(ids.get("a").map(String::as_str), Some("repetition_1_a"));
        assert_eq!(
            ids.get("repetition_1_a").map(String::as_str),
            Some("repetition_2_a")
        );
        assert_eq!(expanded[2].date, 2000.0);
    }

    #[test]
    fn alternative_endings() {
        // volta 1 is skipped on the second pass by a forward jump
        let gotos = vec![Goto::new(2000.0, 0.0, "10"), Goto::new(1000.0, 2000.0, "01")];
        let sequence = resolve(&gotos).unwrap();
        let events = vec![note("a", 0.0), note("volta1", 1000.0), note("volta2", 2000.0)];
        let mut ids = RepetitionIds::new();
        let expanded = sequence.expand_events(&events, &mut ids);

        let names: Vec<&str> = expanded.iter().filter_map(|e| e.id.as_deref()).collect();
        assert_eq!(names, vec!["a", "volta1", "repetition_1_a", "volta2"]);
        let dates: Vec<f64> = expanded.iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![0.0, 1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn maps_follow_the_score() {
        let gotos = vec![Goto::new(1000.0, 0.0, "10")];
        let sequence = resolve(&gotos).unwrap();

        let mut tempo = TempoMap::new();
        tempo.push_style(0.0, "tempi");
        tempo.push_entry(0.0, TempoEntry::constant(100.0, 0.25));
        tempo.push_entry(1000.0, TempoEntry::constant(80.0, 0.25));
        let expanded = sequence.expand_map(&tempo);
        let dates: Vec<f64> = expanded.iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![0.0, 0.0, 1000.0, 1000.0, 2000.0]);

        let events = vec![note("a", 0.0)];
        let mut ids = RepetitionIds::new();
        sequence.expand_events(&events, &mut ids);

        let mut articulation = ArticulationMap::new();
        articulation.push_entry(
            0.0,
            ArticulationEntry {
                note_id: Some("#a".into()),
                ..ArticulationEntry::named("staccato")
            },
        );
        let expanded = sequence.expand_articulations(&articulation, &ids);
        let targets: Vec<Option<&str>> = expanded
            .iter()
            .map(|e| e.value.entry().and_then(|a| a.note_id.as_deref()))
            .collect();
        assert_eq!(targets, vec![Some("a"), Some("repetition_1_a")]);
    }

    #[test]
    fn local_map_overrides_global() {
        let mut global = ScoreGlobal::default();
        global.sequencing_map = Some(vec![Goto::new(1000.0, 0.0, "1")]);
        let mut part = ScorePart::new("piano", 1, 0, 0);
        assert!(for_part(&part, &global).is_some());

        part.sequencing_map = Some(Vec::new());
        assert!(for_part(&part, &global).is_none());
        assert!(resolve(&[]).is_none());
    }
}
