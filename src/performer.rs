use crate::engine::asynchrony::Asynchrony;
use crate::engine::dynamics::{Dynamics, default_velocities};
use crate::engine::imprecision::{self, Domain, Seeder};
use crate::engine::sequencing::{self, RepetitionIds};
use crate::engine::timing::Timing;
use crate::engine::{Context, Timeline, accentuation, articulation};
use crate::error::{Diagnostics, PartFailure, RenderError, RenderWarning};
use crate::model::config::RenderOptions;
use crate::model::map::Dated;
use crate::model::performance::{
    DatedMaps, DetuneUnit, HasEntries, ImprecisionMap, Performance, PerformancePart, effective,
};
use crate::model::rendered::{ControlPoint, Performed, RenderedEvent, RenderedGlobal, RenderedPart};
use crate::model::score::{DEFAULT_PPQ, Event, EventKind, Goto, Score, ScoreGlobal, ScorePart};
use crate::model::style::{Header, StylePools};
use log::{debug, info, warn};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::thread;

/// Seed scope of the global pedal and auxiliary maps.
const GLOBAL_SCOPE: u64 = u64::MAX;

/// One score part ready to render, with the performance maps that apply to it.
struct PartJob<'a> {
    part: ScorePart,
    header: Option<&'a Header>,
    dated: Option<Cow<'a, DatedMaps>>,
}

/// Everything the parts share.
struct Shared<'a> {
    ppq: u32,
    header: &'a Header,
    dated: Cow<'a, DatedMaps>,
    global: ScoreGlobal,
    options: &'a RenderOptions,
}

impl Shared<'_> {
    fn context<'b>(&'b self, local: Option<&'b Header>) -> Context<'b> {
        Context::new(
            self.ppq,
            StylePools::new(local, self.header),
            self.options.builtin_defaults,
        )
    }
}

/// Local map of a kind if it has entries, else the global one.
fn pick<'b, M: HasEntries>(
    local: Option<&'b DatedMaps>,
    global: &'b DatedMaps,
    field: fn(&DatedMaps) -> Option<&M>,
) -> Option<&'b M> {
    effective(local.and_then(field), field(global))
}

fn rescale_events(events: &[Event], factor: f64) -> Vec<Event> {
    events
        .iter()
        .map(|e| Event {
            date: e.date * factor,
            duration: e.duration * factor,
            ..e.clone()
        })
        .collect()
}

fn rescale_gotos(gotos: &[Goto], factor: f64) -> Vec<Goto> {
    gotos
        .iter()
        .map(|g| Goto {
            date: g.date * factor,
            target_date: g.target_date * factor,
            ..g.clone()
        })
        .collect()
}

fn rescale_aux(maps: &BTreeMap<String, Vec<Event>>, factor: f64) -> BTreeMap<String, Vec<Event>> {
    maps.iter()
        .map(|(name, events)| (name.clone(), rescale_events(events, factor)))
        .collect()
}

/// The score with all dates converted to another pulses-per-quarter resolution.
pub fn rescale(score: &Score, ppq: u32) -> Score {
    if score.ppq == ppq || score.ppq == 0 {
        return score.clone();
    }
    let factor = ppq as f64 / score.ppq as f64;
    debug!("Rescaling score from {} to {} ppq..!", score.ppq, ppq);

    let global = &score.global;
    Score {
        title: score.title.clone(),
        ppq,
        global: ScoreGlobal {
            time_signature_map: global
                .time_signature_map
                .iter()
                .map(|e| Dated::new(e.date * factor, e.value))
                .collect(),
            sequencing_map: global
                .sequencing_map
                .as_ref()
                .map(|g| rescale_gotos(g, factor)),
            pedal_map: rescale_events(&global.pedal_map, factor),
            aux_maps: rescale_aux(&global.aux_maps, factor),
        },
        parts: score
            .parts
            .iter()
            .map(|part| ScorePart {
                score: rescale_events(&part.score, factor),
                pedal_map: rescale_events(&part.pedal_map, factor),
                time_signature_map: part.time_signature_map.as_ref().map(|m| {
                    m.iter()
                        .map(|e| Dated::new(e.date * factor, e.value))
                        .collect()
                }),
                sequencing_map: part
                    .sequencing_map
                    .as_ref()
                    .map(|g| rescale_gotos(g, factor)),
                aux_maps: rescale_aux(&part.aux_maps, factor),
                ..part.clone()
            })
            .collect(),
    }
}

fn check_part(part: &ScorePart) -> Result<(), PartFailure> {
    let missing = [
        ("number", part.number.is_none()),
        ("midi channel", part.midi_channel.is_none()),
        ("midi port", part.midi_port.is_none()),
    ]
    .iter()
    .filter(|(_, missing)| *missing)
    .map(|(what, _)| *what)
    .collect::<Vec<_>>();

    if missing.is_empty() {
        return Ok(());
    }
    let error = RenderError::Structural {
        part: part.label(),
        reason: format!("missing {}", missing.join(", ")),
    };
    warn!("{}..!", error);
    Err(PartFailure {
        part: part.label(),
        reason: error.to_string(),
    })
}

/// Builds the output events of a timeline. Event kinds come from the source, everything else
/// from the slots.
fn materialize(events: &[Event], timeline: &Timeline, tuning_unit: Option<DetuneUnit>) -> Vec<RenderedEvent> {
    timeline
        .slots
        .iter()
        .filter_map(|slot| {
            let event = events.get(slot.source)?;
            let mut kind = event.kind.clone();
            if let EventKind::Note { velocity, .. } = &mut kind {
                *velocity = slot.velocity;
            }

            Some(RenderedEvent {
                id: slot.id.clone(),
                kind,
                date: event.date,
                duration: slot.duration.unwrap_or(event.duration),
                performed_date: slot.performed_onset,
                performed_end: slot.performed_end,
                ms_date: slot.ms_date.unwrap_or_default(),
                ms_end: slot.ms_end,
                ms_duration: slot.ms_duration(),
                detune_cents: slot.detune_cents,
                detune_hz: slot.detune_hz,
                tuning_offset: slot.tuning_offset,
                tuning_unit: slot.tuning_offset.and(tuning_unit),
            })
        })
        .collect()
}

fn render_part(job: &PartJob, shared: &Shared) -> (RenderedPart, Vec<RenderWarning>) {
    let part = &job.part;
    let label = part.label();
    info!("Rendering part '{}'..!", label);

    let mut diag = Diagnostics::new(Some(label.clone()));
    let ctx = shared.context(job.header);
    let local = job.dated.as_deref();
    let global = shared.dated.as_ref();

    let mut score = Timeline::from_events(&part.score);
    let mut pedal = Timeline::from_events(&part.pedal_map);
    let mut aux: BTreeMap<&String, Timeline> = part
        .aux_maps
        .iter()
        .map(|(name, events)| (name, Timeline::from_events(events)))
        .collect();

    let mut channel_volume: Vec<ControlPoint> = match pick(local, global, |d| d.dynamics.as_ref()) {
        Some(map) => Dynamics::from_map(map, &ctx, &mut diag).render(&mut score),
        None => {
            default_velocities(&mut score);
            Vec::new()
        }
    };

    if let Some(map) = pick(local, global, |d| d.metrical_accentuation.as_ref()) {
        let time_signatures = part
            .time_signature_map
            .as_ref()
            .filter(|m| !m.is_empty())
            .or(Some(&shared.global.time_signature_map))
            .filter(|m| !m.is_empty());
        accentuation::render(&mut score, map, time_signatures, &ctx, &mut diag);
    }

    let ms_modifiers = pick(local, global, |d| d.articulation.as_ref())
        .map(|map| articulation::render_symbolic(&mut score, map, &ctx, &mut diag));

    let timing = Timing::new(
        pick(local, global, |d| d.tempo.as_ref()),
        pick(local, global, |d| d.rubato.as_ref()),
        &ctx,
        &mut diag,
    );
    timing.project(&mut score, true);
    timing.project(&mut pedal, true);
    for timeline in aux.values_mut() {
        timing.project(timeline, true);
    }
    for point in channel_volume.iter_mut() {
        point.ms_date = Some(timing.tempo.ms_at(point.date));
    }

    if let Some(map) = pick(local, global, |d| d.asynchrony.as_ref()) {
        let asynchrony = Asynchrony::from_map(map);
        asynchrony.apply(&mut pedal);
        for timeline in aux.values_mut() {
            asynchrony.apply(timeline);
        }
        asynchrony.apply_to_curve(&mut channel_volume);
        asynchrony.apply(&mut score);
    }

    if let Some(table) = ms_modifiers.as_ref() {
        articulation::render_ms(&mut score, table, &mut diag);
    }

    let seeder = Seeder::new(
        shared.options.seed,
        part.number.map(u64::from).unwrap_or_default(),
    );
    let shake = shared.options.shake_polyphony;
    let ms_of = |date: f64| timing.ms_for(date);

    let mut tuning_unit = None;
    for domain in Domain::ALL {
        let map: Option<&ImprecisionMap> = match domain {
            Domain::Timing => pick(local, global, |d| d.imprecision_timing.as_ref()),
            Domain::Dynamics => pick(local, global, |d| d.imprecision_dynamics.as_ref()),
            Domain::ToneDuration => pick(local, global, |d| d.imprecision_tone_duration.as_ref()),
            Domain::Tuning => pick(local, global, |d| d.imprecision_tuning.as_ref()),
        };
        let Some(map) = map else {
            continue;
        };

        if domain == Domain::Timing {
            imprecision::render(&mut pedal, map, domain, ms_of, &seeder, shake, &mut diag);
            for timeline in aux.values_mut() {
                imprecision::render(timeline, map, domain, ms_of, &seeder, shake, &mut diag);
            }
        }
        if domain == Domain::Tuning {
            tuning_unit = Some(map.detune_unit);
        }
        imprecision::render(&mut score, map, domain, ms_of, &seeder, shake, &mut diag);
    }

    let rendered = RenderedPart {
        name: part.name.clone(),
        number: part.number,
        midi_channel: part.midi_channel,
        midi_port: part.midi_port,
        score: materialize(&part.score, &score, tuning_unit),
        pedal_map: materialize(&part.pedal_map, &pedal, None),
        aux_maps: aux
            .iter()
            .filter_map(|(name, timeline)| {
                let events = part.aux_maps.get(*name)?;
                Some(((*name).clone(), materialize(events, timeline, None)))
            })
            .collect(),
        channel_volume,
    };

    debug!(
        "Rendered part '{}': {} notes, {:.1} ms..!",
        label,
        rendered.notes().count(),
        rendered.ms_length()
    );
    (rendered, diag.into_warnings())
}

/// Global pedal and auxiliary maps, timed with the global maps only.
fn render_global(shared: &Shared) -> (RenderedGlobal, Vec<RenderWarning>) {
    let mut diag = Diagnostics::new(None);
    let ctx = shared.context(None);
    let dated = shared.dated.as_ref();
    let global = &shared.global;

    if global.pedal_map.is_empty() && global.aux_maps.is_empty() {
        return (RenderedGlobal::default(), diag.into_warnings());
    }

    let timing = Timing::new(dated.tempo.as_ref(), dated.rubato.as_ref(), &ctx, &mut diag);
    let asynchrony = dated.asynchrony.as_ref().map(Asynchrony::from_map);
    let seeder = Seeder::new(shared.options.seed, GLOBAL_SCOPE);
    let ms_of = |date: f64| timing.ms_for(date);

    let mut render_map = |events: &[Event]| {
        let mut timeline = Timeline::from_events(events);
        timing.project(&mut timeline, true);
        if let Some(asynchrony) = asynchrony.as_ref() {
            asynchrony.apply(&mut timeline);
        }
        if let Some(map) = dated.imprecision_timing.as_ref().filter(|m| m.has_entries()) {
            imprecision::render(
                &mut timeline,
                map,
                Domain::Timing,
                ms_of,
                &seeder,
                shared.options.shake_polyphony,
                &mut diag,
            );
        }
        materialize(events, &timeline, None)
    };

    let rendered = RenderedGlobal {
        pedal_map: render_map(&global.pedal_map),
        aux_maps: global
            .aux_maps
            .iter()
            .map(|(name, events)| (name.clone(), render_map(events)))
            .collect(),
    };
    (rendered, diag.into_warnings())
}

/// Renders a score with a performance.
///
/// Never fails as a whole: parts that cannot be rendered are listed in [`Performed::skipped`]
/// and recoverable problems in [`Performed::warnings`].
pub fn render(score: &Score, performance: &Performance, options: &RenderOptions) -> Performed {
    info!(
        "Rendering '{}' with performance '{}'..!",
        score.title.as_deref().unwrap_or("<untitled>"),
        performance.name
    );

    let mut warnings = Vec::new();
    let ppq = if performance.ppq == 0 {
        warnings.push(RenderWarning {
            part: None,
            error: RenderError::invalid("performance ppq", 0.0, format!("set to {}", DEFAULT_PPQ)),
        });
        DEFAULT_PPQ
    } else {
        performance.ppq
    };
    let score = rescale(score, ppq);

    let mut ids = RepetitionIds::new();
    let mut skipped = Vec::new();
    let mut jobs: Vec<PartJob> = Vec::new();

    let global_sequence = score
        .global
        .sequencing_map
        .as_deref()
        .filter(|_| options.expand_sequencing)
        .and_then(sequencing::resolve);

    let global = match global_sequence.as_ref() {
        Some(sequence) => {
            sequencing::log_sequence("the global maps", sequence);
            sequence.expand_global(&score.global, &mut ids)
        }
        None => score.global.clone(),
    };

    for part in score.parts.iter() {
        if let Err(failure) = check_part(part) {
            skipped.push(failure);
            continue;
        }

        let matched: Option<&PerformancePart> = performance.find_part(part);
        if matched.is_none() {
            warn!(
                "No performance part for '{}', rendering with the global maps..!",
                part.label()
            );
            warnings.push(RenderWarning {
                part: Some(part.label()),
                error: RenderError::missing("performance part", &performance.name, &part.label()),
            });
        }

        let sequence = sequencing::for_part(part, &score.global)
            .filter(|_| options.expand_sequencing)
            .and_then(sequencing::resolve);

        let job = match sequence {
            Some(sequence) => {
                sequencing::log_sequence(&part.label(), &sequence);
                let expanded = sequence.expand_part(part, &mut ids);
                PartJob {
                    part: expanded,
                    header: matched.map(|p| &p.header),
                    dated: matched.map(|p| Cow::Owned(sequence.expand_dated_maps(&p.dated, &ids))),
                }
            }
            None => PartJob {
                part: ScorePart {
                    sequencing_map: None,
                    ..part.clone()
                },
                header: matched.map(|p| &p.header),
                dated: matched.map(|p| Cow::Borrowed(&p.dated)),
            },
        };
        jobs.push(job);
    }

    let dated = match global_sequence.as_ref() {
        Some(sequence) => Cow::Owned(sequence.expand_dated_maps(&performance.global.dated, &ids)),
        None => Cow::Borrowed(&performance.global.dated),
    };

    let shared = Shared {
        ppq,
        header: &performance.global.header,
        dated,
        global,
        options,
    };

    let (rendered_global, global_warnings) = render_global(&shared);
    warnings.extend(global_warnings);

    let results: Vec<Result<(RenderedPart, Vec<RenderWarning>), PartFailure>> =
        if options.parallel_parts && jobs.len() > 1 {
            let shared = &shared;
            thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .iter()
                    .map(|job| (job, scope.spawn(move || render_part(job, shared))))
                    .collect();
                handles
                    .into_iter()
                    .map(|(job, handle)| {
                        handle.join().map_err(|_| PartFailure {
                            part: job.part.label(),
                            reason: "render thread panicked".into(),
                        })
                    })
                    .collect()
            })
        } else {
            jobs.iter().map(|job| Ok(render_part(job, &shared))).collect()
        };

    let mut parts = Vec::new();
    for result in results {
        match result {
            Ok((part, part_warnings)) => {
                parts.push(part);
                warnings.extend(part_warnings);
            }
            Err(failure) => skipped.push(failure),
        }
    }

    info!(
        "Rendered {} parts ({} skipped) with {} warnings..!",
        parts.len(),
        skipped.len(),
        warnings.len()
    );

    Performed {
        name: performance.name.clone(),
        ppq,
        global: rendered_global,
        parts,
        skipped,
        warnings,
        repetition_ids: ids,
    }
}
