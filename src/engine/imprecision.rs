//! Random deviations of timing, dynamics, tone duration and tuning.

use crate::engine::Timeline;
use crate::engine::articulation::guarded_change;
use crate::engine::random::{RandomNumberProvider, triangular_once};
use crate::error::{Diagnostics, RenderError};
use crate::model::performance::{Distribution, DistributionEntry, ImprecisionMap, MapKind};
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

/// Resolution in ms a series index stands for when nothing else defines it.
pub const DEFAULT_TIMING_BASIS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Timing,
    Dynamics,
    ToneDuration,
    Tuning,
}

impl Domain {
    pub const ALL: [Domain; 4] = [
        Domain::Timing,
        Domain::Dynamics,
        Domain::ToneDuration,
        Domain::Tuning,
    ];

    pub fn map_kind(&self) -> MapKind {
        match self {
            Domain::Timing => MapKind::ImprecisionTiming,
            Domain::Dynamics => MapKind::ImprecisionDynamics,
            Domain::ToneDuration => MapKind::ImprecisionToneDuration,
            Domain::Tuning => MapKind::ImprecisionTuning,
        }
    }

    fn salt(&self) -> u64 {
        match self {
            Domain::Timing => 1,
            Domain::Dynamics => 2,
            Domain::ToneDuration => 3,
            Domain::Tuning => 4,
        }
    }
}

/// Hands out provider seeds. With a base seed every render of the same input is identical,
/// without one each render draws fresh entropy.
#[derive(Debug, Clone, Copy)]
pub struct Seeder {
    base: Option<u64>,
    scope: u64,
}

fn splitmix(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

impl Seeder {
    /// `scope` separates the streams of different parts.
    pub fn new(base: Option<u64>, scope: u64) -> Self {
        Self { base, scope }
    }

    pub fn seed(&self, domain: Domain, index: u64) -> u64 {
        match self.base {
            Some(base) => splitmix(
                splitmix(base ^ splitmix(self.scope)) ^ (domain.salt() << 56) ^ index,
            ),
            None => rand::random(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Target {
    MsDate,
    MsEnd,
    Velocity,
    Tuning,
}

#[derive(Debug, Clone, Copy)]
struct Offset {
    position: usize,
    target: Target,
    value: f64,
}

/// Offsets grouped by the millisecond date they were drawn at.
type OffsetGroups = BTreeMap<u64, Vec<Offset>>;

fn group_key(ms: f64) -> u64 {
    // +0.0 and -0.0 land in one group
    (ms + 0.0).to_bits()
}

fn timing_basis(entry: &DistributionEntry, domain: Domain) -> f64 {
    if let Some(basis) = entry.milliseconds_timing_basis.filter(|b| *b > 0.0) {
        return basis;
    }
    if domain == Domain::Timing
        && let Some(range) = entry.distribution.value_range().filter(|r| *r > 0.0)
    {
        return range;
    }
    DEFAULT_TIMING_BASIS
}

/// Bounds a correlated series starts in when there is nothing to hand over.
fn limits(distribution: &Distribution) -> Option<(f64, f64)> {
    match distribution {
        Distribution::BrownianNoise {
            lower_limit,
            upper_limit,
            ..
        }
        | Distribution::CompensatingTriangle {
            lower_limit,
            upper_limit,
            ..
        } => Some((*lower_limit, *upper_limit)),
        _ => None,
    }
}

/// Moves an offset towards zero by at most half of it.
fn shake(rng: &mut ChaCha8Rng, offset: f64) -> f64 {
    let half = offset * 0.5;
    if offset < 0.0 {
        triangular_once(rng, offset, half, half)
    } else {
        triangular_once(rng, half, offset, offset)
    }
}

fn shake_groups(
    groups: &mut OffsetGroups,
    timeline: &Timeline,
    domain: Domain,
    rng: &mut ChaCha8Rng,
) {
    for offsets in groups.values_mut() {
        if offsets.len() < 2 {
            continue;
        }
        let keep = rng.gen_range(0..offsets.len());

        // in the timing domain equal pitches move together
        let mut by_pitch: Vec<(f64, f64)> = Vec::new();
        if domain == Domain::Timing
            && let Some(pitch) = timeline.slots[offsets[keep].position].pitch
        {
            by_pitch.push((pitch, offsets[keep].value));
        }

        for i in 0..offsets.len() {
            if i == keep {
                continue;
            }
            let pitch = match domain {
                Domain::Timing => timeline.slots[offsets[i].position].pitch,
                _ => None,
            };
            if let Some(pitch) = pitch
                && let Some((_, shared)) = by_pitch.iter().find(|(p, _)| *p == pitch)
            {
                offsets[i].value = *shared;
                continue;
            }

            offsets[i].value = shake(rng, offsets[i].value);
            if let Some(pitch) = pitch {
                by_pitch.push((pitch, offsets[i].value));
            }
        }
    }
}

/// Renders one imprecision map onto a timeline that already has its millisecond dates.
///
/// `ms_of` maps a symbolic date to milliseconds; it places the distribution entries, which is
/// where correlated series hand over from one entry to the next.
pub fn render(
    timeline: &mut Timeline,
    map: &ImprecisionMap,
    domain: Domain,
    ms_of: impl Fn(f64) -> f64,
    seeder: &Seeder,
    shake_polyphony: bool,
    diag: &mut Diagnostics,
) {
    let entries = map.entries.entries();
    if entries.is_empty() || timeline.is_empty() {
        return;
    }

    let mut groups = OffsetGroups::new();
    let mut pending: Vec<usize> = Vec::new();
    let mut previous: Option<(RandomNumberProvider, f64)> = None;
    let mut rng = ChaCha8Rng::seed_from_u64(seeder.seed(domain, u64::MAX));

    for (index, dated) in entries.iter().enumerate() {
        let entry = &dated.value;
        let start = dated.date;
        let end = entries.get(index + 1).map(|next| next.date);

        if let Distribution::List { values } = &entry.distribution
            && values.is_empty()
        {
            diag.report(RenderError::invalid(
                "imprecision distribution list",
                start,
                "empty list, offsets are 0",
            ));
        }

        let seed = entry
            .seed
            .unwrap_or_else(|| seeder.seed(domain, index as u64));
        let mut provider = RandomNumberProvider::new(entry.distribution.clone(), seed);
        let basis = timing_basis(entry, domain);

        if entry.distribution.is_correlated() {
            let handover = previous
                .as_mut()
                .map(|(prev, prev_basis)| prev.value_at(ms_of(start) / *prev_basis));
            match (handover, limits(&entry.distribution)) {
                (Some(value), _) => provider.set_initial_value(value),
                (None, Some((lower, upper))) => {
                    let quarter = (upper - lower) * 0.25;
                    let value = lower + quarter + rng.r#gen::<f64>() * 2.0 * quarter;
                    provider.set_initial_value(value);
                }
                (None, None) => {}
            }
        }

        for (position, slot) in timeline.slots.iter().enumerate() {
            if slot.onset < start || end.is_some_and(|e| slot.onset >= e) {
                continue;
            }
            let Some(ms_date) = slot.ms_date else {
                continue;
            };

            match domain {
                Domain::Timing => {
                    let value = provider.value_at(ms_date / basis);
                    groups.entry(group_key(ms_date)).or_default().push(Offset {
                        position,
                        target: Target::MsDate,
                        value,
                    });
                    if slot.ms_end.is_some() {
                        pending.push(position);
                    }
                }
                Domain::ToneDuration => {
                    let Some(ms_end) = slot.ms_end.filter(|_| slot.is_note) else {
                        continue;
                    };
                    let value = provider.value_at(ms_end / basis);
                    groups.entry(group_key(ms_end)).or_default().push(Offset {
                        position,
                        target: Target::MsEnd,
                        value,
                    });
                }
                Domain::Dynamics => {
                    if !slot.is_note || slot.velocity.is_none() {
                        continue;
                    }
                    let value = provider.value_at(ms_date / basis);
                    groups.entry(group_key(ms_date)).or_default().push(Offset {
                        position,
                        target: Target::Velocity,
                        value,
                    });
                }
                Domain::Tuning => {
                    if !slot.is_note {
                        continue;
                    }
                    let value = provider.value_at(ms_date / basis);
                    groups.entry(group_key(ms_date)).or_default().push(Offset {
                        position,
                        target: Target::Tuning,
                        value,
                    });
                }
            }
        }

        // note ends take the offset of the entry their symbolic end falls into
        let mut i = 0;
        while i < pending.len() {
            let slot = &timeline.slots[pending[i]];
            let tick_end = slot.end().unwrap_or(slot.onset);
            if end.is_some_and(|e| tick_end >= e) {
                i += 1;
                continue;
            }
            if let Some(ms_end) = slot.ms_end {
                let value = provider.value_at(ms_end / basis);
                groups.entry(group_key(ms_end)).or_default().push(Offset {
                    position: pending[i],
                    target: Target::MsEnd,
                    value,
                });
            }
            pending.swap_remove(i);
        }

        previous = Some((provider, basis));
    }

    if shake_polyphony {
        shake_groups(&mut groups, timeline, domain, &mut rng);
    }

    let mut applied = 0usize;
    for offset in groups.values().flatten() {
        let slot = &mut timeline.slots[offset.position];
        match offset.target {
            Target::MsDate => {
                if let Some(ms) = slot.ms_date.as_mut() {
                    *ms += offset.value;
                }
            }
            Target::MsEnd => {
                let (Some(ms_date), Some(ms_end)) = (slot.ms_date, slot.ms_end) else {
                    continue;
                };
                if domain == Domain::ToneDuration {
                    match guarded_change(ms_end, offset.value, ms_date) {
                        Some((end, _)) => slot.ms_end = Some(end),
                        None => continue,
                    }
                } else {
                    slot.ms_end = Some(ms_end + offset.value);
                }
            }
            Target::Velocity => {
                if let Some(velocity) = slot.velocity {
                    slot.set_velocity(velocity + offset.value);
                }
            }
            Target::Tuning => {
                slot.tuning_offset = Some(slot.tuning_offset.unwrap_or(0.0) + offset.value);
            }
        }
        applied += 1;
    }

    debug!(
        "Applied {} {} offsets..!",
        applied,
        domain.map_kind()
    );
}
