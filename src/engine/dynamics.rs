//! Note velocities from a dynamics map, plus the channel volume curve of sub-note dynamics.

use crate::engine::{Context, Timeline};
use crate::error::{Diagnostics, RenderError};
use crate::model::performance::DynamicsMap;
use crate::model::rendered::ControlPoint;
use log::debug;

pub const DEFAULT_VELOCITY: f64 = 100.0;
/// Largest volume step between two neighbouring channel volume points.
pub const MAX_VOLUME_STEP: f64 = 2.0;
const MAX_BISECTION_STEPS: usize = 64;

/// One dynamics instruction, resolved to numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicsSegment {
    pub start: f64,
    pub end: Option<f64>,
    pub volume: f64,
    pub transition_to: Option<f64>,
    /// X positions of the two inner Bézier control points.
    x1: f64,
    x2: f64,
    pub sub_note_dynamics: bool,
}

impl DynamicsSegment {
    pub fn new(start: f64, end: Option<f64>, volume: f64, transition_to: Option<f64>) -> Self {
        let mut segment = Self {
            start,
            end,
            volume,
            transition_to,
            x1: 0.0,
            x2: 1.0,
            sub_note_dynamics: false,
        };
        segment.shape(0.0, 0.0);
        segment
    }

    /// Places the inner control points. Curvature bends the ramp, protraction pushes the bend
    /// towards the start (negative) or the end (positive).
    pub fn shape(&mut self, curvature: f64, protraction: f64) {
        let c = curvature;
        let p = protraction;
        if p == 0.0 {
            self.x1 = c;
            self.x2 = 1.0 - c;
            return;
        }
        let sign = p.abs() / p;
        self.x1 = c + ((p.abs() + p) / (2.0 * p) - sign * c) * p;
        self.x2 = 1.0 - c + ((p - p.abs()) / (2.0 * p) + sign * c) * p;
    }

    pub fn is_constant(&self) -> bool {
        match self.transition_to {
            None => true,
            Some(to) => to == self.volume,
        }
    }

    fn target(&self) -> f64 {
        self.transition_to.unwrap_or(self.volume)
    }

    fn coefficients(&self) -> (f64, f64, f64) {
        (
            3.0 * self.x1 - 3.0 * self.x2 + 1.0,
            -6.0 * self.x1 + 3.0 * self.x2,
            3.0 * self.x1,
        )
    }

    /// Curve parameter whose date is within one tick of `date`.
    fn t_for_date(&self, date: f64, end: f64) -> f64 {
        if date <= self.start {
            return 0.0;
        }
        if date >= end {
            return 1.0;
        }

        let span = end - self.start;
        let offset = date - self.start;
        let (u, v, w) = self.coefficients();
        let x = |t: f64| ((u * t + v) * t + w) * t * span;

        let mut t = 0.5;
        let mut step = 0.25;
        let mut diff = x(t) - offset;
        for _ in 0..MAX_BISECTION_STEPS {
            if diff.abs() < 1.0 {
                break;
            }
            if diff > 0.0 {
                t -= step;
            } else {
                t += step;
            }
            step *= 0.5;
            diff = x(t) - offset;
        }
        t
    }

    fn smoothstep(&self, t: f64) -> f64 {
        (3.0 - 2.0 * t) * t * t * (self.target() - self.volume) + self.volume
    }

    pub fn value_at(&self, date: f64) -> f64 {
        if date < self.start || self.is_constant() {
            return self.volume;
        }
        let Some(end) = self.end else {
            return self.volume;
        };
        if date >= end {
            return self.target();
        }
        self.smoothstep(self.t_for_date(date, end))
    }

    fn point_at(&self, t: f64, end: f64) -> (f64, f64) {
        let (u, v, w) = self.coefficients();
        let date = ((u * t + v) * t + w) * t * (end - self.start) + self.start;
        (date, self.smoothstep(t))
    }

    /// Dense (date, volume) series over the segment, subdivided until neighbouring values are at
    /// most `max_step` apart.
    pub fn sub_note_series(&self, max_step: f64) -> Vec<(f64, f64)> {
        let Some(end) = self.end else {
            return vec![(self.start, self.volume)];
        };

        let mut ts = vec![0.0, 1.0];
        let mut series = vec![self.point_at(0.0, end), self.point_at(1.0, end)];
        let mut i = 0;
        while i + 1 < series.len() {
            // a step can always be halved, the depth limit only guards against NaN input
            let mut depth = 0;
            while (series[i + 1].1 - series[i].1).abs() > max_step && depth < 32 {
                let t = (ts[i] + ts[i + 1]) * 0.5;
                ts.insert(i + 1, t);
                series.insert(i + 1, self.point_at(t, end));
                depth += 1;
            }
            i += 1;
        }
        series
    }
}

/// Resolved dynamics instructions of one map.
#[derive(Debug, Clone, Default)]
pub struct Dynamics {
    segments: Vec<DynamicsSegment>,
}

impl Dynamics {
    pub fn from_map(map: &DynamicsMap, ctx: &Context, diag: &mut Diagnostics) -> Self {
        let mut segments = Vec::new();

        for scoped in map.scoped() {
            let entry = scoped.value;
            let style = scoped.style_name();
            let volume = ctx.resolve_volume(&entry.volume, style, diag);
            let transition_to = entry
                .transition_to
                .as_ref()
                .map(|to| ctx.resolve_volume(to, style, diag));

            let mut segment =
                DynamicsSegment::new(scoped.date, scoped.end_date, volume, transition_to);
            segment.sub_note_dynamics = entry.sub_note_dynamics;

            if transition_to.is_some() {
                let mut curvature = entry.curvature.unwrap_or(0.0);
                if !(0.0..=1.0).contains(&curvature) {
                    let corrected = curvature.clamp(0.0, 1.0);
                    diag.report(RenderError::invalid(
                        "dynamics curvature",
                        scoped.date,
                        format!("{} clamped to {}", curvature, corrected),
                    ));
                    curvature = corrected;
                }
                let mut protraction = entry.protraction.unwrap_or(0.0);
                if !(-1.0..=1.0).contains(&protraction) {
                    let corrected = protraction.clamp(-1.0, 1.0);
                    diag.report(RenderError::invalid(
                        "dynamics protraction",
                        scoped.date,
                        format!("{} clamped to {}", protraction, corrected),
                    ));
                    protraction = corrected;
                }
                segment.shape(curvature, protraction);
            }

            segments.push(segment);
        }

        Self { segments }
    }

    pub fn segments(&self) -> &[DynamicsSegment] {
        &self.segments
    }

    /// Volume at a symbolic date, `None` before the first instruction.
    pub fn value_at(&self, date: f64) -> Option<f64> {
        let index = self.segments.partition_point(|s| s.start <= date);
        index
            .checked_sub(1)
            .map(|i| self.segments[i].value_at(date))
    }

    /// Sets the velocity baseline of every note and returns the channel volume curve.
    pub fn render(&self, timeline: &mut Timeline) -> Vec<ControlPoint> {
        let mut curve: Vec<ControlPoint> = Vec::new();
        let count = self.segments.len();

        for (i, segment) in self.segments.iter().enumerate() {
            if segment.sub_note_dynamics && i + 1 < count {
                let series = segment.sub_note_series(MAX_VOLUME_STEP);
                for (n, (date, value)) in series.into_iter().enumerate() {
                    curve.push(ControlPoint::new(date, value, n == 0));
                }
            } else if curve.last().is_none_or(|p| p.value != DEFAULT_VELOCITY) {
                curve.push(ControlPoint::new(segment.start, DEFAULT_VELOCITY, true));
            }
        }

        for slot in timeline.notes_mut() {
            let index = self.segments.partition_point(|s| s.start <= slot.date);
            let Some(segment) = index.checked_sub(1).map(|i| &self.segments[i]) else {
                slot.set_velocity(DEFAULT_VELOCITY);
                continue;
            };

            if segment.sub_note_dynamics && index < count {
                slot.set_velocity(DEFAULT_VELOCITY);
            } else {
                slot.set_velocity(segment.value_at(slot.date));
            }
        }

        debug!(
            "Rendered {} dynamics instructions into {} channel volume points..!",
            count,
            curve.len()
        );
        curve
    }
}

/// Velocities for a part without a dynamics map: the notated velocity, or the default.
pub fn default_velocities(timeline: &mut Timeline) {
    for slot in timeline.notes_mut() {
        let velocity = slot.velocity.unwrap_or(DEFAULT_VELOCITY);
        slot.set_velocity(velocity);
    }
}
