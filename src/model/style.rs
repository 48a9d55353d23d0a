use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn one() -> f64 {
    1.0
}

fn is_zero(value: &f64) -> bool {
    *value == 0.0
}

fn is_one(value: &f64) -> bool {
    *value == 1.0
}

/// The kinds of style pools a header can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleKind {
    Tempo,
    Dynamics,
    Rubato,
    Articulation,
    MetricalAccentuation,
}

impl StyleKind {
    /// Name of a single definition of this kind, as used in messages.
    pub fn def_label(&self) -> &'static str {
        match self {
            StyleKind::Tempo => "tempoDef",
            StyleKind::Dynamics => "dynamicsDef",
            StyleKind::Rubato => "rubatoDef",
            StyleKind::Articulation => "articulationDef",
            StyleKind::MetricalAccentuation => "accentuationPatternDef",
        }
    }
}

impl fmt::Display for StyleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StyleKind::Tempo => "tempoStyles",
            StyleKind::Dynamics => "dynamicsStyles",
            StyleKind::Rubato => "rubatoStyles",
            StyleKind::Articulation => "articulationStyles",
            StyleKind::MetricalAccentuation => "metricalAccentuationStyles",
        };
        write!(f, "{}", name)
    }
}

/// A named bundle of definitions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(bound(deserialize = "D: Deserialize<'de>"))]
pub struct Style<D> {
    #[serde(default)]
    pub defs: BTreeMap<String, D>,
}

impl<D> Default for Style<D> {
    fn default() -> Self {
        Self {
            defs: BTreeMap::new(),
        }
    }
}

impl<D> Style<D> {
    pub fn with(mut self, name: &str, def: D) -> Self {
        self.defs.insert(name.to_string(), def);
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct TempoDef {
    pub value: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DynamicsDef {
    pub value: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RubatoDef {
    pub frame_length: f64,
    #[serde(default)]
    pub intensity: Option<f64>,
    #[serde(default)]
    pub late_start: Option<f64>,
    #[serde(default)]
    pub early_end: Option<f64>,
    #[serde(default, rename = "loop")]
    pub looped: bool,
}

/// Duration, timing, velocity and tuning modifiers of an articulation.
///
/// Used both as a reusable definition in an articulation style and as the local modifiers of a
/// single articulation instruction.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ArticulationDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_duration: Option<f64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub absolute_duration_change: f64,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub relative_duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub absolute_duration_change_ms: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub absolute_delay: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub absolute_delay_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute_velocity: Option<f64>,
    #[serde(skip_serializing_if = "is_zero")]
    pub absolute_velocity_change: f64,
    #[serde(default = "one", skip_serializing_if = "is_one")]
    pub relative_velocity: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub detune_cents: f64,
    #[serde(skip_serializing_if = "is_zero")]
    pub detune_hz: f64,
}

impl Default for ArticulationDef {
    fn default() -> Self {
        Self {
            absolute_duration: None,
            absolute_duration_change: 0.0,
            relative_duration: 1.0,
            absolute_duration_ms: None,
            absolute_duration_change_ms: 0.0,
            absolute_delay: 0.0,
            absolute_delay_ms: 0.0,
            absolute_velocity: None,
            absolute_velocity_change: 0.0,
            relative_velocity: 1.0,
            detune_cents: 0.0,
            detune_hz: 0.0,
        }
    }
}

impl ArticulationDef {
    pub fn is_neutral(&self) -> bool {
        *self == ArticulationDef::default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Accentuation {
    pub beat: f64,
    pub value: f64,
    #[serde(default)]
    pub transition_from: Option<f64>,
    #[serde(default)]
    pub transition_to: Option<f64>,
}

impl Accentuation {
    pub fn new(beat: f64, value: f64) -> Self {
        Self {
            beat,
            value,
            transition_from: None,
            transition_to: None,
        }
    }

    pub fn from_value(&self) -> f64 {
        self.transition_from.unwrap_or(self.value)
    }

    pub fn to_value(&self) -> f64 {
        self.transition_to.unwrap_or_else(|| self.from_value())
    }
}

/// A metrical accentuation pattern spanning `length` beats.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AccentuationPatternDef {
    pub length: f64,
    #[serde(default)]
    pub accentuations: Vec<Accentuation>,
}

impl AccentuationPatternDef {
    pub fn new(length: f64, mut accentuations: Vec<Accentuation>) -> Self {
        accentuations.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        Self {
            length,
            accentuations,
        }
    }

    /// Accentuation value at a (1-based, possibly fractional) beat position.
    ///
    /// Positions before beat 1 read the value at beat 1, positions past the end of the pattern
    /// read the last accentuation's target value. Between two accentuations the value moves
    /// linearly from the first one's `transition_from` to its `transition_to`.
    pub fn accentuation_at(&self, beat: f64) -> f64 {
        let Some(last) = self.accentuations.last() else {
            return 0.0;
        };

        let beat = beat.max(1.0);
        if beat >= self.length + 1.0 {
            return last.to_value();
        }

        let index = self.accentuations.partition_point(|a| a.beat <= beat);
        if index == 0 {
            return 0.0;
        }
        let current = &self.accentuations[index - 1];
        if current.beat == beat {
            return current.value;
        }

        let segment_end = self
            .accentuations
            .get(index)
            .map(|next| next.beat)
            .unwrap_or(self.length + 1.0);
        if segment_end <= current.beat {
            return current.to_value();
        }

        let progress = (beat - current.beat) / (segment_end - current.beat);
        current.from_value() + (current.to_value() - current.from_value()) * progress
    }
}

/// Style pools of one environment (global or a single part).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Header {
    pub tempo_styles: BTreeMap<String, Style<TempoDef>>,
    pub dynamics_styles: BTreeMap<String, Style<DynamicsDef>>,
    pub rubato_styles: BTreeMap<String, Style<RubatoDef>>,
    pub articulation_styles: BTreeMap<String, Style<ArticulationDef>>,
    pub metrical_accentuation_styles: BTreeMap<String, Style<AccentuationPatternDef>>,
}

impl Header {
    pub fn is_empty(&self) -> bool {
        self.tempo_styles.is_empty()
            && self.dynamics_styles.is_empty()
            && self.rubato_styles.is_empty()
            && self.articulation_styles.is_empty()
            && self.metrical_accentuation_styles.is_empty()
    }
}

/// Read-only view on the style pools a part resolves names against.
///
/// A style found in the local header shadows a global style of the same name entirely.
#[derive(Debug, Clone, Copy)]
pub struct StylePools<'a> {
    pub local: Option<&'a Header>,
    pub global: &'a Header,
}

impl<'a> StylePools<'a> {
    pub fn new(local: Option<&'a Header>, global: &'a Header) -> Self {
        Self { local, global }
    }

    fn lookup<D>(
        &self,
        pick: impl Fn(&'a Header) -> &'a BTreeMap<String, Style<D>>,
        style: &str,
        name: &str,
    ) -> Option<&'a D> {
        self.local
            .and_then(|header| pick(header).get(style))
            .or_else(|| pick(self.global).get(style))
            .and_then(|s| s.defs.get(name))
    }

    pub fn tempo(&self, style: &str, name: &str) -> Option<&'a TempoDef> {
        self.lookup(|h| &h.tempo_styles, style, name)
    }

    pub fn dynamics(&self, style: &str, name: &str) -> Option<&'a DynamicsDef> {
        self.lookup(|h| &h.dynamics_styles, style, name)
    }

    pub fn rubato(&self, style: &str, name: &str) -> Option<&'a RubatoDef> {
        self.lookup(|h| &h.rubato_styles, style, name)
    }

    pub fn articulation(&self, style: &str, name: &str) -> Option<&'a ArticulationDef> {
        self.lookup(|h| &h.articulation_styles, style, name)
    }

    pub fn accentuation_pattern(
        &self,
        style: &str,
        name: &str,
    ) -> Option<&'a AccentuationPatternDef> {
        self.lookup(|h| &h.metrical_accentuation_styles, style, name)
    }
}
