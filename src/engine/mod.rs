use crate::error::{Diagnostics, RenderError};
use crate::model::performance::NamedValue;
use crate::model::score::{Event, EventKind};
use crate::model::style::{StyleKind, StylePools};
use crate::util::{
    DEFAULT_BPM, DEFAULT_VOLUME, clamp_velocity, default_tempo, default_volume, parse_number,
};
use log::debug;

pub mod accentuation;
pub mod articulation;
pub mod asynchrony;
pub mod dynamics;
pub mod imprecision;
pub mod random;
pub mod sequencing;
pub mod timing;

/// Read-only inputs shared by the engines while rendering one part.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    pub ppq: f64,
    pub styles: StylePools<'a>,
    /// Fall back to the built-in name tables for references no style defines.
    pub builtin_defaults: bool,
}

impl<'a> Context<'a> {
    pub fn new(ppq: u32, styles: StylePools<'a>, builtin_defaults: bool) -> Self {
        Self {
            ppq: ppq as f64,
            styles,
            builtin_defaults,
        }
    }

    /// Resolves a bpm value through the tempo style, a numeric parse and the built-in table.
    pub fn resolve_tempo(&self, value: &NamedValue, style: &str, diag: &mut Diagnostics) -> f64 {
        match value {
            NamedValue::Value(bpm) => *bpm,
            NamedValue::Named(name) => {
                if let Some(def) = self.styles.tempo(style, name) {
                    return def.value;
                }
                if let Some(bpm) = parse_number(name) {
                    return bpm;
                }
                if self.builtin_defaults
                    && let Some(bpm) = default_tempo(name)
                {
                    debug!("Using the default tempo {} for '{}'..!", bpm, name);
                    return bpm;
                }
                diag.report(RenderError::missing(StyleKind::Tempo.def_label(), style, name));
                DEFAULT_BPM
            }
        }
    }

    /// Resolves a volume value through the dynamics style, a numeric parse and the built-in table.
    pub fn resolve_volume(&self, value: &NamedValue, style: &str, diag: &mut Diagnostics) -> f64 {
        match value {
            NamedValue::Value(volume) => *volume,
            NamedValue::Named(name) => {
                if let Some(def) = self.styles.dynamics(style, name) {
                    return def.value;
                }
                if let Some(volume) = parse_number(name) {
                    return volume;
                }
                if self.builtin_defaults
                    && let Some(volume) = default_volume(name)
                {
                    debug!("Using the default volume {} for '{}'..!", volume, name);
                    return volume;
                }
                diag.report(RenderError::missing(StyleKind::Dynamics.def_label(), style, name));
                DEFAULT_VOLUME
            }
        }
    }
}

/// Everything the engines derive for one event, kept apart from the event itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    /// Index of the source element in the list the timeline was built from.
    pub source: usize,
    pub id: Option<String>,
    pub is_note: bool,
    pub pitch: Option<f64>,
    /// Symbolic date as found in the source.
    pub date: f64,
    /// Symbolic onset after articulation delays.
    pub onset: f64,
    /// Symbolic duration, `None` for point events.
    pub duration: Option<f64>,
    pub velocity: Option<f64>,
    /// Onset and end after rubato.
    pub performed_onset: f64,
    pub performed_end: Option<f64>,
    pub ms_date: Option<f64>,
    pub ms_end: Option<f64>,
    pub detune_cents: Option<f64>,
    pub detune_hz: Option<f64>,
    pub tuning_offset: Option<f64>,
}

impl Slot {
    pub fn new(source: usize, date: f64) -> Self {
        Self {
            source,
            id: None,
            is_note: false,
            pitch: None,
            date,
            onset: date,
            duration: None,
            velocity: None,
            performed_onset: date,
            performed_end: None,
            ms_date: None,
            ms_end: None,
            detune_cents: None,
            detune_hz: None,
            tuning_offset: None,
        }
    }

    pub fn from_event(source: usize, event: &Event) -> Self {
        let mut slot = Slot::new(source, event.date);
        slot.id = event.id.clone();

        match &event.kind {
            EventKind::Note { pitch, velocity } => {
                slot.is_note = true;
                slot.pitch = Some(*pitch);
                slot.velocity = velocity.map(clamp_velocity);
                slot.duration = Some(event.duration.max(0.0));
            }
            _ if event.duration > 0.0 => slot.duration = Some(event.duration),
            _ => {}
        }

        slot.performed_end = slot.end();
        slot
    }

    /// Symbolic end after articulation.
    pub fn end(&self) -> Option<f64> {
        self.duration.map(|d| self.onset + d)
    }

    pub fn set_velocity(&mut self, velocity: f64) {
        self.velocity = Some(clamp_velocity(velocity));
    }

    pub fn ms_duration(&self) -> Option<f64> {
        match (self.ms_date, self.ms_end) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// The working copy of one map of events, ordered by symbolic onset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    pub slots: Vec<Slot>,
}

impl Timeline {
    pub fn from_events(events: &[Event]) -> Self {
        let mut timeline = Self {
            slots: events
                .iter()
                .enumerate()
                .map(|(i, e)| Slot::from_event(i, e))
                .collect(),
        };
        timeline.sort();
        timeline
    }

    /// Restores onset order after dates moved. Stable, so simultaneous events keep their order.
    pub fn sort(&mut self) {
        self.slots.sort_by(|a, b| a.onset.total_cmp(&b.onset));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn notes(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|s| s.is_note)
    }

    pub fn notes_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut().filter(|s| s.is_note)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.id.as_deref() == Some(id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timeline_orders_by_onset() {
        let events = vec![
            Event::note("b", 720.0, 360.0, 62.0, 90.0),
            Event::note("a", 0.0, 720.0, 60.0, 140.0),
            Event::pedal(0.0, 0.0, 127.0),
        ];
        let timeline = Timeline::from_events(&events);

        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline.slots[0].id.as_deref(), Some("a"));
        assert_eq!(timeline.slots[0].source, 1);
        assert_eq!(timeline.slots[0].velocity, Some(127.0));
        assert!(!timeline.slots[1].is_note);
        assert!(timeline.slots[1].duration.is_none());
        assert_eq!(timeline.notes().count(), 2);
        assert_eq!(timeline.position_of("b"), Some(2));
        assert_eq!(timeline.slots[2].end(), Some(1080.0));
    }
}
