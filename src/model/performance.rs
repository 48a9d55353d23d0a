use crate::model::map::{GenericMap, MapItem};
use crate::model::score::{DEFAULT_PPQ, ScorePart};
use crate::model::style::{ArticulationDef, Header};
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

fn quarter() -> f64 {
    0.25
}

fn yes() -> bool {
    true
}

/// A numeric value or the name of a definition (e.g. "Allegro", "mf").
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum NamedValue {
    Value(f64),
    Named(String),
}

impl From<f64> for NamedValue {
    fn from(value: f64) -> Self {
        NamedValue::Value(value)
    }
}

impl From<&str> for NamedValue {
    fn from(name: &str) -> Self {
        NamedValue::Named(name.to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TempoEntry {
    pub bpm: NamedValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_to: Option<NamedValue>,
    /// Length of one beat as a fraction of a whole note (0.25 = quarter).
    #[serde(default = "quarter")]
    pub beat_length: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_tempo_at: Option<f64>,
}

impl TempoEntry {
    pub fn constant(bpm: f64, beat_length: f64) -> Self {
        Self {
            bpm: bpm.into(),
            transition_to: None,
            beat_length,
            mean_tempo_at: None,
        }
    }

    pub fn transition(bpm: f64, transition_to: f64, beat_length: f64) -> Self {
        Self {
            transition_to: Some(transition_to.into()),
            ..Self::constant(bpm, beat_length)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RubatoEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_length: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub late_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_end: Option<f64>,
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub looped: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DynamicsEntry {
    pub volume: NamedValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_to: Option<NamedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curvature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protraction: Option<f64>,
    #[serde(default)]
    pub sub_note_dynamics: bool,
}

impl DynamicsEntry {
    pub fn constant(volume: f64) -> Self {
        Self {
            volume: volume.into(),
            transition_to: None,
            curvature: None,
            protraction: None,
            sub_note_dynamics: false,
        }
    }

    pub fn transition(volume: f64, transition_to: f64) -> Self {
        Self {
            transition_to: Some(transition_to.into()),
            ..Self::constant(volume)
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ArticulationEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_ref: Option<String>,
    /// Restricts the articulation to one note; otherwise it applies to every note at its date.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
    #[serde(flatten)]
    pub modifiers: ArticulationDef,
}

impl ArticulationEntry {
    pub fn named(name_ref: &str) -> Self {
        Self {
            name_ref: Some(name_ref.to_string()),
            ..Default::default()
        }
    }

    /// The referenced note id without a leading '#'.
    pub fn target(&self) -> Option<&str> {
        self.note_id.as_deref().map(|id| id.trim_start_matches('#'))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AsynchronyEntry {
    pub offset_ms: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccentuationEntry {
    pub name_ref: String,
    pub scale: f64,
    #[serde(default, rename = "loop")]
    pub looped: bool,
    #[serde(default = "yes")]
    pub stick_to_measures: bool,
}

/// Parameters of a random number model. Limits bound the raw values, clips cut the final ones.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "distribution", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Distribution {
    Uniform {
        lower_limit: f64,
        upper_limit: f64,
    },
    Gaussian {
        standard_deviation: f64,
        lower_limit: f64,
        upper_limit: f64,
    },
    Triangular {
        lower_limit: f64,
        upper_limit: f64,
        mode: f64,
        lower_clip: f64,
        upper_clip: f64,
    },
    BrownianNoise {
        max_step_width: f64,
        lower_limit: f64,
        upper_limit: f64,
    },
    CompensatingTriangle {
        degree_of_correlation: f64,
        lower_limit: f64,
        upper_limit: f64,
        lower_clip: f64,
        upper_clip: f64,
    },
    List {
        values: Vec<f64>,
    },
}

impl Distribution {
    /// Whether successive values depend on the previous one.
    pub fn is_correlated(&self) -> bool {
        matches!(
            self,
            Distribution::BrownianNoise { .. } | Distribution::CompensatingTriangle { .. }
        )
    }

    /// Width of the range values can land in, the default resolution for timing maps.
    pub fn value_range(&self) -> Option<f64> {
        match self {
            Distribution::Uniform {
                lower_limit,
                upper_limit,
            }
            | Distribution::Gaussian {
                lower_limit,
                upper_limit,
                ..
            }
            | Distribution::BrownianNoise {
                lower_limit,
                upper_limit,
                ..
            } => Some(upper_limit - lower_limit),
            Distribution::Triangular {
                lower_clip,
                upper_clip,
                ..
            }
            | Distribution::CompensatingTriangle {
                lower_clip,
                upper_clip,
                ..
            } => Some(upper_clip - lower_clip),
            Distribution::List { values } => {
                let min = values.iter().copied().reduce(f64::min)?;
                let max = values.iter().copied().reduce(f64::max)?;
                Some(max - min)
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DistributionEntry {
    #[serde(flatten)]
    pub distribution: Distribution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milliseconds_timing_basis: Option<f64>,
}

impl DistributionEntry {
    pub fn new(distribution: Distribution) -> Self {
        Self {
            distribution,
            seed: None,
            milliseconds_timing_basis: None,
        }
    }

    pub fn seeded(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetuneUnit {
    #[default]
    #[serde(rename = "cents")]
    Cents,
    #[serde(rename = "Hz", alias = "Hertz")]
    Hertz,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImprecisionMap {
    pub detune_unit: DetuneUnit,
    pub entries: GenericMap<DistributionEntry>,
}

pub type TempoMap = GenericMap<MapItem<TempoEntry>>;
pub type RubatoMap = GenericMap<MapItem<RubatoEntry>>;
pub type DynamicsMap = GenericMap<MapItem<DynamicsEntry>>;
pub type ArticulationMap = GenericMap<MapItem<ArticulationEntry>>;
pub type AsynchronyMap = GenericMap<MapItem<AsynchronyEntry>>;
pub type MetricalAccentuationMap = GenericMap<MapItem<AccentuationEntry>>;

/// Anything that can stand in for a map of its type, the test for local-over-global precedence.
pub trait HasEntries {
    fn has_entries(&self) -> bool;
}

impl<T> HasEntries for GenericMap<MapItem<T>> {
    fn has_entries(&self) -> bool {
        GenericMap::has_entries(self)
    }
}

impl HasEntries for ImprecisionMap {
    fn has_entries(&self) -> bool {
        !self.entries.is_empty()
    }
}

/// Picks the local map when it has entries, otherwise the global one.
pub fn effective<'a, M: HasEntries>(local: Option<&'a M>, global: Option<&'a M>) -> Option<&'a M> {
    match local {
        Some(map) if map.has_entries() => Some(map),
        _ => global.filter(|map| map.has_entries()),
    }
}

/// The closed set of performance map types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MapKind {
    Tempo,
    Rubato,
    Dynamics,
    Articulation,
    Asynchrony,
    MetricalAccentuation,
    ImprecisionTiming,
    ImprecisionDynamics,
    ImprecisionToneDuration,
    ImprecisionTuning,
}

impl MapKind {
    pub const ALL: [MapKind; 10] = [
        MapKind::Tempo,
        MapKind::Rubato,
        MapKind::Dynamics,
        MapKind::Articulation,
        MapKind::Asynchrony,
        MapKind::MetricalAccentuation,
        MapKind::ImprecisionTiming,
        MapKind::ImprecisionDynamics,
        MapKind::ImprecisionToneDuration,
        MapKind::ImprecisionTuning,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            MapKind::Tempo => "tempoMap",
            MapKind::Rubato => "rubatoMap",
            MapKind::Dynamics => "dynamicsMap",
            MapKind::Articulation => "articulationMap",
            MapKind::Asynchrony => "asynchronyMap",
            MapKind::MetricalAccentuation => "metricalAccentuationMap",
            MapKind::ImprecisionTiming => "imprecisionMap.timing",
            MapKind::ImprecisionDynamics => "imprecisionMap.dynamics",
            MapKind::ImprecisionToneDuration => "imprecisionMap.toneduration",
            MapKind::ImprecisionTuning => "imprecisionMap.tuning",
        }
    }
}

impl fmt::Display for MapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for MapKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match MapKind::ALL.iter().find(|kind| kind.key() == s) {
            Some(kind) => Ok(*kind),
            None => bail!("Unknown map type '{}'..!", s),
        }
    }
}

/// The performance maps of one environment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct DatedMaps {
    #[serde(rename = "tempoMap", skip_serializing_if = "Option::is_none")]
    pub tempo: Option<TempoMap>,
    #[serde(rename = "rubatoMap", skip_serializing_if = "Option::is_none")]
    pub rubato: Option<RubatoMap>,
    #[serde(rename = "dynamicsMap", skip_serializing_if = "Option::is_none")]
    pub dynamics: Option<DynamicsMap>,
    #[serde(rename = "articulationMap", skip_serializing_if = "Option::is_none")]
    pub articulation: Option<ArticulationMap>,
    #[serde(rename = "asynchronyMap", skip_serializing_if = "Option::is_none")]
    pub asynchrony: Option<AsynchronyMap>,
    #[serde(rename = "metricalAccentuationMap", skip_serializing_if = "Option::is_none")]
    pub metrical_accentuation: Option<MetricalAccentuationMap>,
    #[serde(rename = "imprecisionMap.timing", skip_serializing_if = "Option::is_none")]
    pub imprecision_timing: Option<ImprecisionMap>,
    #[serde(rename = "imprecisionMap.dynamics", skip_serializing_if = "Option::is_none")]
    pub imprecision_dynamics: Option<ImprecisionMap>,
    #[serde(rename = "imprecisionMap.toneduration", skip_serializing_if = "Option::is_none")]
    pub imprecision_tone_duration: Option<ImprecisionMap>,
    #[serde(rename = "imprecisionMap.tuning", skip_serializing_if = "Option::is_none")]
    pub imprecision_tuning: Option<ImprecisionMap>,
}

impl DatedMaps {
    /// Whether a map of this type is present and has entries.
    pub fn has(&self, kind: MapKind) -> bool {
        match kind {
            MapKind::Tempo => self.tempo.as_ref().is_some_and(HasEntries::has_entries),
            MapKind::Rubato => self.rubato.as_ref().is_some_and(HasEntries::has_entries),
            MapKind::Dynamics => self.dynamics.as_ref().is_some_and(HasEntries::has_entries),
            MapKind::Articulation => self.articulation.as_ref().is_some_and(HasEntries::has_entries),
            MapKind::Asynchrony => self.asynchrony.as_ref().is_some_and(HasEntries::has_entries),
            MapKind::MetricalAccentuation => self
                .metrical_accentuation
                .as_ref()
                .is_some_and(HasEntries::has_entries),
            MapKind::ImprecisionTiming => self
                .imprecision_timing
                .as_ref()
                .is_some_and(HasEntries::has_entries),
            MapKind::ImprecisionDynamics => self
                .imprecision_dynamics
                .as_ref()
                .is_some_and(HasEntries::has_entries),
            MapKind::ImprecisionToneDuration => self
                .imprecision_tone_duration
                .as_ref()
                .is_some_and(HasEntries::has_entries),
            MapKind::ImprecisionTuning => self
                .imprecision_tuning
                .as_ref()
                .is_some_and(HasEntries::has_entries),
        }
    }

    pub fn kinds_present(&self) -> Vec<MapKind> {
        MapKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.has(*kind))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Environment {
    pub header: Header,
    pub dated: DatedMaps,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformancePart {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_channel: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_port: Option<u8>,
    pub header: Header,
    pub dated: DatedMaps,
}

impl PerformancePart {
    pub fn new(name: &str, number: u32, midi_channel: u8, midi_port: u8) -> Self {
        Self {
            name: name.to_string(),
            number: Some(number),
            midi_channel: Some(midi_channel),
            midi_port: Some(midi_port),
            ..Default::default()
        }
    }
}

/// A named interpretation of a score: global maps and styles plus per-part overrides.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_ppq", alias = "pulsesPerQuarter")]
    pub ppq: u32,
    #[serde(default)]
    pub global: Environment,
    #[serde(default)]
    pub parts: Vec<PerformancePart>,
}

fn default_ppq() -> u32 {
    DEFAULT_PPQ
}

impl Default for Performance {
    fn default() -> Self {
        Self::new("default", DEFAULT_PPQ)
    }
}

impl Performance {
    pub fn new(name: &str, ppq: u32) -> Self {
        Self {
            name: name.to_string(),
            ppq,
            global: Environment::default(),
            parts: Vec::new(),
        }
    }

    /// Finds the performance part for a score part: by number, then name, then MIDI channel and port.
    pub fn find_part(&self, part: &ScorePart) -> Option<&PerformancePart> {
        if let Some(number) = part.number
            && let Some(found) = self.parts.iter().find(|p| p.number == Some(number))
        {
            return Some(found);
        }

        if !part.name.is_empty()
            && let Some(found) = self.parts.iter().find(|p| p.name == part.name)
        {
            return Some(found);
        }

        match (part.midi_channel, part.midi_port) {
            (Some(channel), Some(port)) => self
                .parts
                .iter()
                .find(|p| p.midi_channel == Some(channel) && p.midi_port == Some(port)),
            _ => None,
        }
    }
}

/// Several performances of the same score, as stored in one file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSet {
    #[serde(default)]
    pub performances: Vec<Performance>,
}

impl PerformanceSet {
    pub fn get(&self, name: &str) -> Option<&Performance> {
        self.performances.iter().find(|p| p.name == name)
    }
}
