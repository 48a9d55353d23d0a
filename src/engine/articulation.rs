//! Articulation in two passes: symbolic modifiers before the timing transform, millisecond
//! modifiers after it.

use crate::engine::{Context, Slot, Timeline};
use crate::error::{Diagnostics, RenderError};
use crate::model::performance::ArticulationMap;
use crate::model::style::{ArticulationDef, StyleKind};
use crate::util::default_articulation;
use log::debug;
use std::collections::BTreeMap;

/// Halving steps before a duration change is dropped altogether.
const MAX_HALVINGS: usize = 64;

/// Millisecond modifiers recorded by the symbolic pass, applied once the note has ms dates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MsModifiers {
    pub delay: Option<f64>,
    pub duration: Option<f64>,
    pub duration_change: Option<f64>,
}

impl MsModifiers {
    pub fn is_empty(&self) -> bool {
        self.delay.is_none() && self.duration.is_none() && self.duration_change.is_none()
    }
}

/// Millisecond modifiers keyed by the source index of the slot they belong to.
pub type MsTable = BTreeMap<usize, MsModifiers>;

/// Adds `change` to `value`, halving the change until the result stays above `floor`.
///
/// Returns the result and the change that was actually applied, or `None` if no halving helped.
pub(crate) fn guarded_change(value: f64, change: f64, floor: f64) -> Option<(f64, f64)> {
    let mut applied = change;
    for _ in 0..MAX_HALVINGS {
        let result = value + applied;
        if result > floor {
            return Some((result, applied));
        }
        applied *= 0.5;
    }
    None
}

fn resolve_def(
    name: &str,
    style: &str,
    ctx: &Context,
    diag: &mut Diagnostics,
) -> Option<ArticulationDef> {
    if let Some(def) = ctx.styles.articulation(style, name) {
        return Some(*def);
    }
    if ctx.builtin_defaults
        && let Some(def) = default_articulation(name)
    {
        debug!("Using the default articulation '{}'..!", name);
        return Some(def);
    }
    diag.report(RenderError::missing(
        StyleKind::Articulation.def_label(),
        style,
        name,
    ));
    None
}

/// Applies one set of modifiers to a note. Returns whether the onset moved.
/// Adds `change` to a symbolic duration without letting it reach zero.
fn change_duration(
    duration: f64,
    change: f64,
    what: &str,
    date: f64,
    diag: &mut Diagnostics,
) -> f64 {
    match guarded_change(duration, change, 0.0) {
        Some((result, applied)) => {
            if applied != change {
                diag.report(RenderError::DegenerateTiming {
                    what: what.into(),
                    date,
                    applied,
                });
            }
            result
        }
        None => {
            diag.report(RenderError::DegenerateTiming {
                what: what.into(),
                date,
                applied: 0.0,
            });
            duration
        }
    }
}

fn articulate(
    def: &ArticulationDef,
    slot: &mut Slot,
    modifiers: &mut MsModifiers,
    diag: &mut Diagnostics,
) -> bool {
    let mut moved = false;

    if let Some(duration) = slot.duration {
        if let Some(ms) = def.absolute_duration_ms {
            modifiers.duration = Some(ms);
        } else {
            let mut duration = duration;
            if let Some(absolute) = def.absolute_duration {
                if absolute > 0.0 {
                    duration = absolute;
                } else {
                    diag.report(RenderError::invalid(
                        "absoluteDuration",
                        slot.date,
                        "not positive, duration kept",
                    ));
                }
            }
            if def.relative_duration != 1.0 && duration > 0.0 {
                let change = duration * (def.relative_duration - 1.0);
                duration = change_duration(duration, change, "relativeDuration", slot.date, diag);
            }
            if def.absolute_duration_change != 0.0 {
                duration = change_duration(
                    duration,
                    def.absolute_duration_change,
                    "absoluteDurationChange",
                    slot.date,
                    diag,
                );
            }
            slot.duration = Some(duration);
        }

        if def.absolute_duration_change_ms != 0.0 {
            modifiers.duration_change = Some(def.absolute_duration_change_ms);
        }
    }

    if def.absolute_delay != 0.0 {
        slot.onset += def.absolute_delay;
        moved = true;
    }
    if def.absolute_delay_ms != 0.0 {
        modifiers.delay = Some(def.absolute_delay_ms);
    }

    if let Some(mut velocity) = slot.velocity {
        if let Some(absolute) = def.absolute_velocity {
            velocity = absolute;
        }
        velocity *= def.relative_velocity;
        velocity += def.absolute_velocity_change;
        slot.set_velocity(velocity);
    }

    if def.detune_cents != 0.0 {
        slot.detune_cents = Some(def.detune_cents);
    }
    if def.detune_hz != 0.0 {
        slot.detune_hz = Some(def.detune_hz);
    }

    moved
}

/// The symbolic pass: durations, tick delays, velocities and detuning.
///
/// Articulations name their note or apply to every note at their date. Notes without an explicit
/// articulation get the default articulation of the style switch in effect. Millisecond
/// modifiers are returned for [`render_ms`].
pub fn render_symbolic(
    timeline: &mut Timeline,
    map: &ArticulationMap,
    ctx: &Context,
    diag: &mut Diagnostics,
) -> MsTable {
    let mut assigned: BTreeMap<usize, Vec<Vec<ArticulationDef>>> = BTreeMap::new();

    for scoped in map.scoped() {
        let entry = scoped.value;
        let style = scoped.style_name();

        let mut defs = Vec::with_capacity(2);
        if let Some(name) = entry.name_ref.as_deref()
            && let Some(def) = resolve_def(name, style, ctx, diag)
        {
            defs.push(def);
        }
        if !entry.modifiers.is_neutral() {
            defs.push(entry.modifiers);
        }

        match entry.target() {
            Some(id) => match timeline.slots.iter().position(|s| s.is_note && s.id.as_deref() == Some(id)) {
                Some(position) => {
                    if timeline.slots[position].date != scoped.date {
                        debug!(
                            "Articulation at {} refers to note '{}' at {}..!",
                            scoped.date, id, timeline.slots[position].date
                        );
                    }
                    assigned.entry(position).or_default().push(defs);
                }
                None => debug!("Articulation target '{}' not found..!", id),
            },
            None => {
                for (position, slot) in timeline.slots.iter().enumerate() {
                    if slot.is_note && slot.date == scoped.date {
                        assigned.entry(position).or_default().push(defs.clone());
                    }
                }
            }
        }
    }

    let mut defaults: Vec<(f64, Option<ArticulationDef>)> = Vec::new();
    for (date, switch) in map.style_switches() {
        let def = switch
            .default_articulation
            .as_deref()
            .and_then(|name| resolve_def(name, &switch.name_ref, ctx, diag));
        defaults.push((date, def));
    }

    let mut table = MsTable::new();
    let mut moved = false;
    let mut articulated = 0usize;

    for (position, slot) in timeline.slots.iter_mut().enumerate() {
        if !slot.is_note {
            continue;
        }
        let mut modifiers = MsModifiers::default();

        if let Some(articulations) = assigned.get(&position) {
            for defs in articulations {
                for def in defs {
                    moved |= articulate(def, slot, &mut modifiers, diag);
                }
            }
            articulated += 1;
        } else {
            let index = defaults.partition_point(|(date, _)| *date <= slot.date);
            if let Some(def) = index.checked_sub(1).and_then(|i| defaults[i].1.as_ref()) {
                moved |= articulate(def, slot, &mut modifiers, diag);
                articulated += 1;
            }
        }

        if !modifiers.is_empty() {
            table.insert(slot.source, modifiers);
        }
    }

    if moved {
        timeline.sort();
    }
    debug!("Articulated {} notes..!", articulated);
    table
}

/// The millisecond pass: delays, absolute durations and duration changes in ms.
pub fn render_ms(timeline: &mut Timeline, table: &MsTable, diag: &mut Diagnostics) {
    if table.is_empty() {
        return;
    }

    for slot in timeline.slots.iter_mut() {
        let Some(modifiers) = table.get(&slot.source) else {
            continue;
        };
        let Some(mut date) = slot.ms_date else {
            continue;
        };

        if let Some(delay) = modifiers.delay {
            let mut delayed = date + delay;
            if let Some(end) = slot.ms_end
                && delayed >= end
            {
                let reduced = (end - date) / 2.0;
                diag.report(RenderError::DegenerateTiming {
                    what: "absoluteDelayMs".into(),
                    date: slot.date,
                    applied: reduced,
                });
                delayed = date + reduced;
            }
            date = delayed;
            slot.ms_date = Some(date);
        }

        let Some(mut end) = slot.ms_end else {
            continue;
        };
        if let Some(duration) = modifiers.duration {
            end = date + duration;
        }
        if let Some(change) = modifiers.duration_change {
            match guarded_change(end, change, date) {
                Some((result, applied)) => {
                    if applied != change {
                        diag.report(RenderError::DegenerateTiming {
                            what: "absoluteDurationChangeMs".into(),
                            date: slot.date,
                            applied,
                        });
                    }
                    end = result;
                }
                None => diag.report(RenderError::DegenerateTiming {
                    what: "absoluteDurationChangeMs".into(),
                    date: slot.date,
                    applied: 0.0,
                }),
            }
        }
        slot.ms_end = Some(end);
    }
}
