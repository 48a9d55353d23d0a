//! Symbolic ticks to milliseconds: tempo integration and rubato frames.

use crate::engine::{Context, Timeline};
use crate::error::{Diagnostics, RenderError};
use crate::model::performance::{RubatoMap, TempoMap};
use crate::model::style::StyleKind;
use log::debug;

pub const DEFAULT_TEMPO_BPM: f64 = 120.0;
pub const DEFAULT_BEAT_LENGTH: f64 = 0.25;

/// Milliseconds per minute divided by the number of whole notes per quarter.
const MS_PER_WHOLE_NOTE_MINUTE: f64 = 15_000.0;
const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Constant,
    /// Geometric interpolation, the rate changes by a constant factor per tick.
    Geometric { to: f64 },
    /// `bpm + (to - bpm) * x^exponent`, integrated numerically.
    Power { to: f64, exponent: f64 },
}

#[derive(Debug, Clone)]
struct TempoSegment {
    start: f64,
    length: f64,
    bpm: f64,
    beat_length: f64,
    shape: Shape,
    ms_at_start: f64,
}

impl TempoSegment {
    fn ms_per_tick(&self, bpm: f64, ppq: f64) -> f64 {
        MS_PER_WHOLE_NOTE_MINUTE / (bpm * self.beat_length * ppq)
    }

    fn bpm_at(&self, delta: f64) -> f64 {
        if delta <= 0.0 {
            return self.bpm;
        }
        let x = (delta / self.length).min(1.0);
        match self.shape {
            Shape::Constant => self.bpm,
            Shape::Geometric { to } => self.bpm * (to / self.bpm).powf(x),
            Shape::Power { to, exponent } => self.bpm + (to - self.bpm) * x.powf(exponent),
        }
    }

    /// Milliseconds elapsed between the segment start and `delta` ticks later.
    fn elapsed(&self, delta: f64, ppq: f64) -> f64 {
        if delta <= 0.0 {
            return delta * self.ms_per_tick(self.bpm, ppq);
        }

        match self.shape {
            Shape::Constant => delta * self.ms_per_tick(self.bpm, ppq),
            Shape::Geometric { to } => {
                let ratio = to / self.bpm;
                let log_ratio = ratio.ln();
                let within = delta.min(self.length);
                let ms = self.ms_per_tick(self.bpm, ppq) * self.length / log_ratio
                    * (1.0 - ratio.powf(-within / self.length));
                ms + (delta - within) * self.ms_per_tick(to, ppq)
            }
            Shape::Power { to, .. } => {
                let within = delta.min(self.length);
                let ms = self.simpson(within, ppq);
                ms + (delta - within) * self.ms_per_tick(to, ppq)
            }
        }
    }

    fn simpson(&self, delta: f64, ppq: f64) -> f64 {
        let steps = ((delta / (ppq * 0.25)).floor() as usize * 2).max(2);
        let h = delta / steps as f64;
        let f = |x: f64| self.ms_per_tick(self.bpm_at(x), ppq);

        let mut sum = f(0.0) + f(delta);
        for i in 1..steps {
            let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * f(i as f64 * h);
        }
        sum * h / 3.0
    }
}

/// A piecewise tempo curve over symbolic time.
#[derive(Debug, Clone)]
pub struct TempoCurve {
    ppq: f64,
    segments: Vec<TempoSegment>,
}

impl TempoCurve {
    pub fn constant(bpm: f64, beat_length: f64, ppq: f64) -> Self {
        Self {
            ppq,
            segments: vec![TempoSegment {
                start: 0.0,
                length: f64::INFINITY,
                bpm,
                beat_length,
                shape: Shape::Constant,
                ms_at_start: 0.0,
            }],
        }
    }

    /// Builds the curve of a tempo map. Without tempo entries the curve is a flat 120 bpm in quarters.
    pub fn from_map(map: Option<&TempoMap>, ctx: &Context, diag: &mut Diagnostics) -> Self {
        let Some(map) = map.filter(|m| m.has_entries()) else {
            return Self::constant(DEFAULT_TEMPO_BPM, DEFAULT_BEAT_LENGTH, ctx.ppq);
        };

        let mut segments: Vec<TempoSegment> = Vec::new();
        for scoped in map.scoped() {
            let entry = scoped.value;
            let style = scoped.style_name();

            let mut bpm = ctx.resolve_tempo(&entry.bpm, style, diag);
            if !(bpm > 0.0) {
                diag.report(RenderError::invalid(
                    "tempo bpm",
                    scoped.date,
                    format!("{} replaced by {}", bpm, DEFAULT_TEMPO_BPM),
                ));
                bpm = DEFAULT_TEMPO_BPM;
            }

            let mut beat_length = entry.beat_length;
            if !(beat_length > 0.0) {
                diag.report(RenderError::invalid(
                    "tempo beatLength",
                    scoped.date,
                    format!("{} replaced by {}", beat_length, DEFAULT_BEAT_LENGTH),
                ));
                beat_length = DEFAULT_BEAT_LENGTH;
            }

            let length = scoped
                .end_date
                .map(|end| end - scoped.date)
                .unwrap_or(f64::INFINITY);

            let target = entry
                .transition_to
                .as_ref()
                .map(|to| ctx.resolve_tempo(to, style, diag))
                .filter(|to| *to > 0.0);

            let shape = match (target, scoped.end_date) {
                (Some(to), Some(_)) if length > 0.0 && (to - bpm).abs() > EPSILON => {
                    match entry.mean_tempo_at {
                        None => Shape::Geometric { to },
                        Some(mean) if mean <= 0.0 => {
                            bpm = to;
                            Shape::Constant
                        }
                        Some(mean) if mean >= 1.0 => Shape::Constant,
                        Some(mean) => Shape::Power {
                            to,
                            exponent: 0.5f64.ln() / mean.ln(),
                        },
                    }
                }
                (Some(_), None) => {
                    debug!(
                        "Ignoring the tempo transition of the last tempo instruction at {}..!",
                        scoped.date
                    );
                    Shape::Constant
                }
                _ => Shape::Constant,
            };

            segments.push(TempoSegment {
                start: scoped.date,
                length,
                bpm,
                beat_length,
                shape,
                ms_at_start: 0.0,
            });
        }

        let ppq = ctx.ppq;
        let mut ms = 0.0;
        for i in 0..segments.len() {
            if i == 0 {
                // dates before the first instruction run at its initial tempo
                ms = segments[0].start * segments[0].ms_per_tick(segments[0].bpm, ppq);
            } else {
                let prev = &segments[i - 1];
                ms += prev.elapsed(segments[i].start - prev.start, ppq);
            }
            segments[i].ms_at_start = ms;
        }

        Self { ppq, segments }
    }

    fn segment_for(&self, date: f64) -> &TempoSegment {
        let index = self
            .segments
            .partition_point(|s| s.start <= date)
            .saturating_sub(1);
        &self.segments[index]
    }

    /// Milliseconds at a symbolic date.
    pub fn ms_at(&self, date: f64) -> f64 {
        let segment = self.segment_for(date);
        segment.ms_at_start + segment.elapsed(date - segment.start, self.ppq)
    }

    pub fn bpm_at(&self, date: f64) -> f64 {
        let segment = self.segment_for(date);
        segment.bpm_at(date - segment.start)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct RubatoFrame {
    start: f64,
    end: Option<f64>,
    frame_length: f64,
    intensity: f64,
    late_start: f64,
    early_end: f64,
    looped: bool,
}

impl RubatoFrame {
    fn warp(&self, date: f64) -> f64 {
        let offset = date - self.start;
        if offset < 0.0 || (!self.looped && offset >= self.frame_length) {
            return date;
        }

        let local = offset % self.frame_length;
        let position = (local / self.frame_length).powf(self.intensity);
        let shifted =
            (position * (self.early_end - self.late_start) + self.late_start) * self.frame_length;
        date - local + shifted
    }
}

/// Rubato frames of one map. Each frame compresses the onsets inside it into
/// `[lateStart, earlyEnd]` of its length, bent by the intensity exponent.
#[derive(Debug, Clone, Default)]
pub struct Rubato {
    frames: Vec<RubatoFrame>,
}

impl Rubato {
    pub fn from_map(map: Option<&RubatoMap>, ctx: &Context, diag: &mut Diagnostics) -> Self {
        let Some(map) = map else {
            return Self::default();
        };

        let mut frames: Vec<RubatoFrame> = Vec::new();
        for scoped in map.scoped() {
            let entry = scoped.value;
            let date = scoped.date;

            let def = match entry.name_ref.as_deref() {
                Some(name) => {
                    let def = ctx.styles.rubato(scoped.style_name(), name);
                    if def.is_none() {
                        diag.report(RenderError::missing(
                            StyleKind::Rubato.def_label(),
                            scoped.style_name(),
                            name,
                        ));
                    }
                    def
                }
                None => None,
            };

            let Some(mut frame_length) = entry.frame_length.or(def.map(|d| d.frame_length)) else {
                diag.report(RenderError::invalid(
                    "rubato frameLength",
                    date,
                    "missing, rubato instruction skipped",
                ));
                continue;
            };
            if frame_length < 0.0 {
                diag.report(RenderError::invalid(
                    "rubato frameLength",
                    date,
                    format!("{} replaced by {}", frame_length, -frame_length),
                ));
                frame_length = -frame_length;
            }
            if !(frame_length > 0.0) {
                diag.report(RenderError::invalid(
                    "rubato frameLength",
                    date,
                    "zero, rubato instruction skipped",
                ));
                continue;
            }

            let mut intensity = entry
                .intensity
                .or(def.and_then(|d| d.intensity))
                .unwrap_or(1.0);
            if intensity == 0.0 {
                diag.report(RenderError::invalid("rubato intensity", date, "0 replaced by 0.01"));
                intensity = 0.01;
            } else if intensity < 0.0 {
                diag.report(RenderError::invalid(
                    "rubato intensity",
                    date,
                    format!("{} replaced by {}", intensity, -intensity),
                ));
                intensity = -intensity;
            }

            let mut late_start = entry
                .late_start
                .or(def.and_then(|d| d.late_start))
                .unwrap_or(0.0);
            let mut early_end = entry
                .early_end
                .or(def.and_then(|d| d.early_end))
                .unwrap_or(1.0);
            if late_start < 0.0 {
                diag.report(RenderError::invalid(
                    "rubato lateStart",
                    date,
                    format!("{} replaced by 0", late_start),
                ));
                late_start = 0.0;
            }
            if early_end > 1.0 {
                diag.report(RenderError::invalid(
                    "rubato earlyEnd",
                    date,
                    format!("{} replaced by 1", early_end),
                ));
                early_end = 1.0;
            }
            if late_start >= early_end {
                diag.report(RenderError::invalid(
                    "rubato lateStart/earlyEnd",
                    date,
                    format!("{} >= {}, reset to 0 and 1", late_start, early_end),
                ));
                late_start = 0.0;
                early_end = 1.0;
            }

            let looped = entry
                .looped
                .unwrap_or_else(|| def.is_some_and(|d| d.looped));

            frames.push(RubatoFrame {
                start: date,
                end: scoped.end_date,
                frame_length,
                intensity,
                late_start,
                early_end,
                looped,
            });
        }

        Self { frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Repositions a symbolic date within the rubato frame it falls into.
    pub fn warp(&self, date: f64) -> f64 {
        let index = self.frames.partition_point(|f| f.start <= date);
        if index == 0 {
            return date;
        }
        let frame = &self.frames[index - 1];
        if frame.end.is_some_and(|end| date >= end) {
            return date;
        }
        frame.warp(date)
    }
}

/// Combined timing transform of one environment: rubato in symbolic time, then the tempo curve.
#[derive(Debug, Clone)]
pub struct Timing {
    pub tempo: TempoCurve,
    pub rubato: Rubato,
}

impl Timing {
    pub fn new(
        tempo_map: Option<&TempoMap>,
        rubato_map: Option<&RubatoMap>,
        ctx: &Context,
        diag: &mut Diagnostics,
    ) -> Self {
        Self {
            tempo: TempoCurve::from_map(tempo_map, ctx, diag),
            rubato: Rubato::from_map(rubato_map, ctx, diag),
        }
    }

    /// Milliseconds date of a symbolic date, rubato included.
    pub fn ms_for(&self, date: f64) -> f64 {
        self.tempo.ms_at(self.rubato.warp(date))
    }

    /// Sets performed dates and millisecond dates on every slot of the timeline.
    ///
    /// With `rubato` false only the tempo curve applies, which keeps continuous controller
    /// curves free of frame distortions.
    pub fn project(&self, timeline: &mut Timeline, rubato: bool) {
        for slot in timeline.slots.iter_mut() {
            let (onset, end) = if rubato {
                (
                    self.rubato.warp(slot.onset),
                    slot.end().map(|e| self.rubato.warp(e)),
                )
            } else {
                (slot.onset, slot.end())
            };

            slot.performed_onset = onset;
            slot.performed_end = end;
            slot.ms_date = Some(self.tempo.ms_at(onset));
            slot.ms_end = end.map(|e| self.tempo.ms_at(e));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::Slot;
    use crate::model::performance::{RubatoEntry, TempoEntry};
    use crate::model::style::{Header, RubatoDef, Style, StylePools};
    use assert_approx_eq::assert_approx_eq;

    fn context(header: &Header) -> Context<'_> {
        Context::new(720, StylePools::new(None, header), true)
    }

    #[test]
    fn constant_tempo_matches_closed_form() {
        env_logger::try_init().unwrap_or(());

        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let mut map = TempoMap::new();
        map.push_entry(0.0, TempoEntry::constant(96.0, 0.25));
        let curve = TempoCurve::from_map(Some(&map), &ctx, &mut diag);

        for date in [0.0, 1.0, 360.0, 720.0, 12_345.0, 100_000.0] {
            let expected = date / 720.0 * (60_000.0 / 96.0);
            assert!((curve.ms_at(date) - expected).abs() <= 1e-9 * expected.max(1.0));
        }
        assert!(diag.errors().is_empty());
    }

    #[test]
    fn empty_map_defaults_to_120() {
        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let curve = TempoCurve::from_map(None, &ctx, &mut diag);
        assert_approx_eq!(curve.ms_at(720.0), 500.0, 1e-9);
        assert_approx_eq!(curve.bpm_at(0.0), 120.0, 1e-9);
    }

    #[test]
    fn beat_length_scales_tempo() {
        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        // 60 half notes per minute are 120 quarters per minute
        let mut map = TempoMap::new();
        map.push_entry(0.0, TempoEntry::constant(60.0, 0.5));
        let curve = TempoCurve::from_map(Some(&map), &ctx, &mut diag);
        assert_approx_eq!(curve.ms_at(720.0), 500.0, 1e-9);
    }

    #[test]
    fn piecewise_segments_accumulate() {
        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let mut map = TempoMap::new();
        map.push_entry(0.0, TempoEntry::constant(120.0, 0.25));
        map.push_entry(1440.0, TempoEntry::constant(60.0, 0.25));
        let curve = TempoCurve::from_map(Some(&map), &ctx, &mut diag);

        assert_approx_eq!(curve.ms_at(1440.0), 1000.0, 1e-9);
        assert_approx_eq!(curve.ms_at(2160.0), 2000.0, 1e-9);
    }

    #[test]
    fn tempo_before_first_entry() {
        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let mut map = TempoMap::new();
        map.push_entry(720.0, TempoEntry::constant(60.0, 0.25));
        let curve = TempoCurve::from_map(Some(&map), &ctx, &mut diag);

        assert_approx_eq!(curve.ms_at(0.0), 0.0, 1e-9);
        assert_approx_eq!(curve.ms_at(720.0), 1000.0, 1e-9);
        assert_approx_eq!(curve.ms_at(1440.0), 2000.0, 1e-9);
    }

    #[test]
    fn geometric_accelerando() {
        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let mut map = TempoMap::new();
        map.push_entry(0.0, TempoEntry::transition(60.0, 120.0, 0.25));
        map.push_entry(2880.0, TempoEntry::constant(120.0, 0.25));
        let curve = TempoCurve::from_map(Some(&map), &ctx, &mut diag);

        // bounded by the constant start and end tempi
        let end = curve.ms_at(2880.0);
        assert!(end < 4.0 * 1000.0);
        assert!(end > 4.0 * 500.0);

        // closed form: 1000 * 4 / ln 2 * (1 - 1/2)
        assert_approx_eq!(end, 2000.0 / 2f64.ln(), 1e-6);
        assert_approx_eq!(curve.bpm_at(1440.0), 60.0 * 2f64.sqrt(), 1e-9);

        // strictly increasing and continuous into the next segment
        let mut last = -1.0;
        for i in 0..=40 {
            let ms = curve.ms_at(i as f64 * 90.0);
            assert!(ms > last);
            last = ms;
        }
        assert_approx_eq!(curve.ms_at(3600.0) - end, 500.0, 1e-6);
    }

    #[test]
    fn mean_tempo_linear_and_limits() {
        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let mut linear = TempoEntry::transition(60.0, 120.0, 0.25);
        linear.mean_tempo_at = Some(0.5);
        let mut map = TempoMap::new();
        map.push_entry(0.0, linear);
        map.push_entry(2880.0, TempoEntry::constant(120.0, 0.25));
        let curve = TempoCurve::from_map(Some(&map), &ctx, &mut diag);

        // linear bpm ramp: ms = 60000/ppq * L/(b1-b0) * ln(b1/b0)
        let expected = 60_000.0 / 720.0 * 2880.0 / 60.0 * 2f64.ln();
        assert_approx_eq!(curve.ms_at(2880.0), expected, 1e-2);
        assert_approx_eq!(curve.bpm_at(1440.0), 90.0, 1e-9);

        let mut at_target = TempoEntry::transition(60.0, 120.0, 0.25);
        at_target.mean_tempo_at = Some(0.0);
        let mut map = TempoMap::new();
        map.push_entry(0.0, at_target);
        map.push_entry(720.0, TempoEntry::constant(120.0, 0.25));
        let curve = TempoCurve::from_map(Some(&map), &ctx, &mut diag);
        assert_approx_eq!(curve.ms_at(720.0), 500.0, 1e-9);
    }

    #[test]
    fn named_tempo_resolution() {
        let mut header = Header::default();
        header.tempo_styles.insert(
            "Bach".into(),
            Style::default().with("Allegro", crate::model::style::TempoDef { value: 90.0 }),
        );
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let mut map = TempoMap::new();
        map.push_style(0.0, "Bach");
        map.push_entry(0.0, TempoEntry { bpm: "Allegro".into(), ..TempoEntry::constant(0.0, 0.25) });
        map.push_entry(720.0, TempoEntry { bpm: "Vivace".into(), ..TempoEntry::constant(0.0, 0.25) });
        map.push_entry(1440.0, TempoEntry { bpm: "???".into(), ..TempoEntry::constant(0.0, 0.25) });
        let curve = TempoCurve::from_map(Some(&map), &ctx, &mut diag);

        assert_approx_eq!(curve.bpm_at(0.0), 90.0, 1e-9);
        assert_approx_eq!(curve.bpm_at(720.0), 164.0, 1e-9);
        assert_approx_eq!(curve.bpm_at(1440.0), 100.0, 1e-9);
        assert_eq!(diag.errors().len(), 1);
    }

    fn rubato_map(entry: RubatoEntry) -> RubatoMap {
        let mut map = RubatoMap::new();
        map.push_entry(0.0, entry);
        map
    }

    #[test]
    fn rubato_stays_inside_bounds() {
        env_logger::try_init().unwrap_or(());

        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let map = rubato_map(RubatoEntry {
            frame_length: Some(1000.0),
            intensity: Some(1.7),
            late_start: Some(0.2),
            early_end: Some(0.8),
            looped: Some(true),
            ..Default::default()
        });
        let rubato = Rubato::from_map(Some(&map), &ctx, &mut diag);

        for frame in 0..3 {
            let start = frame as f64 * 1000.0;
            let mut last = f64::MIN;
            for i in 0..100 {
                let warped = rubato.warp(start + i as f64 * 10.0);
                assert!(warped >= start + 200.0 - 1e-9);
                assert!(warped <= start + 800.0 + 1e-9);
                assert!(warped > last);
                last = warped;
            }
        }
    }

    #[test]
    fn rubato_single_frame_without_loop() {
        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let map = rubato_map(RubatoEntry {
            frame_length: Some(720.0),
            intensity: Some(2.0),
            ..Default::default()
        });
        let rubato = Rubato::from_map(Some(&map), &ctx, &mut diag);

        assert_approx_eq!(rubato.warp(0.0), 0.0, 1e-9);
        assert_approx_eq!(rubato.warp(360.0), 180.0, 1e-9);
        assert_approx_eq!(rubato.warp(1080.0), 1080.0, 1e-9);
    }

    #[test]
    fn rubato_corrections_and_defs() {
        let mut header = Header::default();
        header.rubato_styles.insert(
            "romantic".into(),
            Style::default().with(
                "wide",
                RubatoDef {
                    frame_length: 480.0,
                    intensity: Some(0.0),
                    late_start: Some(0.9),
                    early_end: Some(0.1),
                    looped: true,
                },
            ),
        );
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let mut map = RubatoMap::new();
        map.push_style(0.0, "romantic");
        map.push_entry(0.0, RubatoEntry { name_ref: Some("wide".into()), ..Default::default() });
        map.push_entry(4800.0, RubatoEntry { name_ref: Some("missing".into()), ..Default::default() });
        let rubato = Rubato::from_map(Some(&map), &ctx, &mut diag);

        // intensity corrected, bounds reset, second entry skipped
        assert_eq!(rubato.frames.len(), 1);
        assert_eq!(rubato.frames[0].intensity, 0.01);
        assert_eq!(rubato.frames[0].late_start, 0.0);
        assert_eq!(rubato.frames[0].early_end, 1.0);
        assert!(rubato.frames[0].looped);
        assert_eq!(diag.errors().len(), 4);
    }

    #[test]
    fn projection_with_and_without_rubato() {
        let header = Header::default();
        let ctx = context(&header);
        let mut diag = Diagnostics::default();

        let map = rubato_map(RubatoEntry {
            frame_length: Some(1440.0),
            intensity: Some(2.0),
            ..Default::default()
        });
        let timing = Timing::new(None, Some(&map), &ctx, &mut diag);

        let mut slot = Slot::new(0, 720.0);
        slot.duration = Some(720.0);
        let mut timeline = Timeline { slots: vec![slot] };

        timing.project(&mut timeline, true);
        assert_approx_eq!(timeline.slots[0].performed_onset, 360.0, 1e-9);
        assert_approx_eq!(timeline.slots[0].ms_date.unwrap(), 250.0, 1e-9);
        assert_approx_eq!(timing.ms_for(720.0), 250.0, 1e-9);

        timing.project(&mut timeline, false);
        assert_approx_eq!(timeline.slots[0].ms_date.unwrap(), 500.0, 1e-9);
        assert_approx_eq!(timeline.slots[0].ms_end.unwrap(), 1000.0, 1e-9);
    }
}
