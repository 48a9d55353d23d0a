use crate::model::map::GenericMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_PPQ: u32 = 720;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventKind {
    Note {
        pitch: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        velocity: Option<f64>,
    },
    Rest,
    Pedal {
        value: f64,
    },
    Control {
        controller: u8,
        value: f64,
    },
    Marker {
        text: String,
    },
}

impl EventKind {
    pub fn is_note(&self) -> bool {
        matches!(self, EventKind::Note { .. })
    }

    pub fn pitch(&self) -> Option<f64> {
        match self {
            EventKind::Note { pitch, .. } => Some(*pitch),
            _ => None,
        }
    }
}

/// A symbolic event: dates and durations are in ticks.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub date: f64,
    #[serde(default)]
    pub duration: f64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn note(id: &str, date: f64, duration: f64, pitch: f64, velocity: f64) -> Self {
        Self {
            id: Some(id.to_string()),
            date,
            duration,
            kind: EventKind::Note {
                pitch,
                velocity: Some(velocity),
            },
        }
    }

    pub fn pedal(date: f64, duration: f64, value: f64) -> Self {
        Self {
            id: None,
            date,
            duration,
            kind: EventKind::Pedal { value },
        }
    }

    pub fn end_date(&self) -> f64 {
        self.date + self.duration
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TimeSignature {
    pub numerator: f64,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4.0,
            denominator: 4,
        }
    }
}

pub type TimeSignatureMap = GenericMap<TimeSignature>;

/// A jump instruction of a sequencing map.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Goto {
    pub date: f64,
    pub target_date: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// One character per pass: '1' takes the jump, '0' ignores it.
    #[serde(default = "default_activity")]
    pub activity: String,
}

fn default_activity() -> String {
    "1".to_string()
}

impl Goto {
    pub fn new(date: f64, target_date: f64, activity: &str) -> Self {
        Self {
            date,
            target_date,
            target_id: None,
            activity: activity.to_string(),
        }
    }
}

pub type SequencingMap = Vec<Goto>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreGlobal {
    pub time_signature_map: TimeSignatureMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequencing_map: Option<SequencingMap>,
    pub pedal_map: Vec<Event>,
    pub aux_maps: BTreeMap<String, Vec<Event>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScorePart {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_port: Option<u8>,
    pub score: Vec<Event>,
    pub pedal_map: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_signature_map: Option<TimeSignatureMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequencing_map: Option<SequencingMap>,
    pub aux_maps: BTreeMap<String, Vec<Event>>,
}

impl ScorePart {
    pub fn new(name: &str, number: u32, midi_channel: u8, midi_port: u8) -> Self {
        Self {
            name: name.to_string(),
            number: Some(number),
            midi_channel: Some(midi_channel),
            midi_port: Some(midi_port),
            ..Default::default()
        }
    }

    /// The part's name, or a placeholder built from whatever identifies it.
    pub fn label(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match self.number {
            Some(n) => format!("part {}", n),
            None => "<unnamed part>".into(),
        }
    }
}

/// The symbolic input of a render.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default = "default_ppq")]
    pub ppq: u32,
    #[serde(default)]
    pub global: ScoreGlobal,
    #[serde(default)]
    pub parts: Vec<ScorePart>,
}

fn default_ppq() -> u32 {
    DEFAULT_PPQ
}

impl Default for Score {
    fn default() -> Self {
        Self {
            title: None,
            ppq: DEFAULT_PPQ,
            global: ScoreGlobal::default(),
            parts: Vec::new(),
        }
    }
}

impl Score {
    pub fn note_count(&self) -> usize {
        self.parts
            .iter()
            .map(|p| p.score.iter().filter(|e| e.kind.is_note()).count())
            .sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn event_json_shape() {
        let json = r#"{"id": "n1", "date": 720, "duration": 360, "type": "note", "pitch": 60}"#;
        let event: Event = serde_json::from_str(json).unwrap();

        assert_eq!(event.id.as_deref(), Some("n1"));
        assert_eq!(event.end_date(), 1080.0);
        assert_eq!(event.kind.pitch(), Some(60.0));
        assert!(matches!(event.kind, EventKind::Note { velocity: None, .. }));
    }

    #[test]
    fn score_defaults() {
        let score: Score = serde_json::from_str(r#"{"parts": [{"name": "Flute"}]}"#).unwrap();
        assert_eq!(score.ppq, DEFAULT_PPQ);
        assert_eq!(score.parts[0].label(), "Flute");
        assert!(score.parts[0].number.is_none());
        assert_eq!(score.note_count(), 0);
    }
}
