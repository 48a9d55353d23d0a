use crate::error::{PartFailure, RenderWarning};
use crate::model::performance::DetuneUnit;
use crate::model::score::EventKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An event with everything the rendering derived for it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
    /// Symbolic date of the (possibly expanded) source event.
    pub date: f64,
    pub duration: f64,
    /// Symbolic onset and end after articulation and rubato.
    pub performed_date: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performed_end: Option<f64>,
    pub ms_date: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms_end: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detune_cents: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detune_hz: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning_offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning_unit: Option<DetuneUnit>,
}

impl RenderedEvent {
    pub fn is_note(&self) -> bool {
        self.kind.is_note()
    }

    pub fn pitch(&self) -> Option<f64> {
        self.kind.pitch()
    }

    /// Rendered velocity of a note.
    pub fn velocity(&self) -> Option<f64> {
        match self.kind {
            EventKind::Note { velocity, .. } => velocity,
            _ => None,
        }
    }
}

/// One point of a continuous controller curve.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPoint {
    pub date: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ms_date: Option<f64>,
    pub value: f64,
    /// Must survive any thinning of the curve on export.
    #[serde(default)]
    pub mandatory: bool,
}

impl ControlPoint {
    pub fn new(date: f64, value: f64, mandatory: bool) -> Self {
        Self {
            date,
            ms_date: None,
            value,
            mandatory,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderedPart {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_port: Option<u8>,
    pub score: Vec<RenderedEvent>,
    pub pedal_map: Vec<RenderedEvent>,
    pub aux_maps: BTreeMap<String, Vec<RenderedEvent>>,
    pub channel_volume: Vec<ControlPoint>,
}

impl RenderedPart {
    pub fn notes(&self) -> impl Iterator<Item = &RenderedEvent> {
        self.score.iter().filter(|e| e.is_note())
    }

    pub fn find(&self, id: &str) -> Option<&RenderedEvent> {
        self.score.iter().find(|e| e.id.as_deref() == Some(id))
    }

    /// Last millisecond any of the part's events reaches.
    pub fn ms_length(&self) -> f64 {
        self.score
            .iter()
            .chain(self.pedal_map.iter())
            .map(|e| e.ms_end.unwrap_or(e.ms_date))
            .fold(0.0, f64::max)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderedGlobal {
    pub pedal_map: Vec<RenderedEvent>,
    pub aux_maps: BTreeMap<String, Vec<RenderedEvent>>,
}

/// The result of rendering one score with one performance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Performed {
    pub name: String,
    pub ppq: u32,
    pub global: RenderedGlobal,
    pub parts: Vec<RenderedPart>,
    pub skipped: Vec<PartFailure>,
    pub warnings: Vec<RenderWarning>,
    /// Original id to the id of its next repetition, for every id the sequencing expansion copied.
    pub repetition_ids: BTreeMap<String, String>,
}

impl Performed {
    pub fn part(&self, name: &str) -> Option<&RenderedPart> {
        self.parts.iter().find(|p| p.name == name)
    }

    pub fn note_count(&self) -> usize {
        self.parts.iter().map(|p| p.notes().count()).sum()
    }

    pub fn ms_length(&self) -> f64 {
        self.parts
            .iter()
            .map(RenderedPart::ms_length)
            .chain(self.global.pedal_map.iter().map(|e| e.ms_end.unwrap_or(e.ms_date)))
            .fold(0.0, f64::max)
    }

    /// Follows the repetition chain of an id: the original, then each of its copies in order.
    pub fn repetitions_of(&self, id: &str) -> Vec<String> {
        let mut chain = vec![id.to_string()];
        let mut current = id;
        while let Some(next) = self.repetition_ids.get(current) {
            if chain.iter().any(|c| c == next) {
                break;
            }
            chain.push(next.clone());
            current = next;
        }
        chain
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn note(id: &str, ms_date: f64, ms_end: f64) -> RenderedEvent {
        RenderedEvent {
            id: Some(id.into()),
            kind: EventKind::Note {
                pitch: 60.0,
                velocity: Some(100.0),
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

    #[test]
    fn repetition_chain() {
        let mut performed = Performed::default();
        performed
            .repetition_ids
            .insert("n1".into(), "repetition_1_n1".into());
        performed
            .repetition_ids
            .insert("repetition_1_n1".into(), "repetition_2_n1".into());

        assert_eq!(
            performed.repetitions_of("n1"),
            vec!["n1", "repetition_1_n1", "repetition_2_n1"]
        );
        assert_eq!(performed.repetitions_of("n2"), vec!["n2"]);
    }

    #[test]
    fn lengths_and_lookup() {
        let part = RenderedPart {
            name: "Piano".into(),
            score: vec![note("a", 0.0, 500.0), note("b", 400.0, 1250.0)],
            ..Default::default()
        };
        assert_eq!(part.ms_length(), 1250.0);
        assert_eq!(part.find("b").map(|e| e.ms_date), Some(400.0));

        let performed = Performed {
            parts: vec![part],
            ..Default::default()
        };
        assert_eq!(performed.note_count(), 2);
        assert!(performed.part("Piano").is_some());

        let json = serde_json::to_string(&performed).unwrap();
        let back: Performed = serde_json::from_str(&json).unwrap();
        assert_eq!(back, performed);
    }
}
