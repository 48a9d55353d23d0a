use crate::engine::{Context, Timeline};
use crate::error::{Diagnostics, RenderError};
use crate::model::performance::MetricalAccentuationMap;
use crate::model::score::{TimeSignature, TimeSignatureMap};
use crate::model::style::StyleKind;
use log::debug;

/// Where beats are counted from at a date: the time signature in effect and its start.
fn meter_at(map: Option<&TimeSignatureMap>, date: f64) -> (f64, TimeSignature) {
    map.and_then(|m| m.entry_at(date))
        .map(|e| (e.date, e.value))
        .unwrap_or((0.0, TimeSignature::default()))
}

/// Adds metrical accents to the velocity of every note in scope of an accentuation instruction.
///
/// Beats are counted per measure (`stick_to_measures`) or per pattern length, starting at the
/// time signature change in effect. Without `loop` only the first pattern length is accented.
pub fn render(
    timeline: &mut Timeline,
    map: &MetricalAccentuationMap,
    time_signatures: Option<&TimeSignatureMap>,
    ctx: &Context,
    diag: &mut Diagnostics,
) {
    let whole_note = 4.0 * ctx.ppq;
    let mut accented = 0usize;

    for scoped in map.scoped() {
        let entry = scoped.value;
        let style = scoped.style_name();
        let Some(pattern) = ctx.styles.accentuation_pattern(style, &entry.name_ref) else {
            diag.report(RenderError::missing(
                StyleKind::MetricalAccentuation.def_label(),
                style,
                &entry.name_ref,
            ));
            continue;
        };

        for slot in timeline.notes_mut() {
            let date = slot.date;
            if !scoped.contains(date) {
                continue;
            }
            let Some(velocity) = slot.velocity else {
                continue;
            };

            let (meter_date, meter) = meter_at(time_signatures, date);
            let denominator = meter.denominator.max(1) as f64;
            let ticks_per_beat = whole_note / denominator;
            let measure_length = ticks_per_beat * meter.numerator;
            let pattern_length = pattern.length * whole_note / denominator;

            if !entry.looped && date >= scoped.date + pattern_length {
                continue;
            }

            let period = if entry.stick_to_measures {
                measure_length
            } else {
                pattern_length
            };
            if !(period > 0.0) {
                continue;
            }

            let beat = 1.0 + ((date - meter_date) % period) / ticks_per_beat;
            let accent = pattern.accentuation_at(beat);
            slot.set_velocity(velocity + accent * entry.scale);
            accented += 1;
        }
    }

    debug!("Accented {} notes..!", accented);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::Slot;
    use crate::model::map::Dated;
    use crate::model::performance::AccentuationEntry;
    use crate::model::style::{Accentuation, AccentuationPatternDef, Header, Style, StylePools};

    fn header() -> Header {
        let mut header = Header::default();
        header.metrical_accentuation_styles.insert(
            "meter".into(),
            Style::default()
                .with(
                    "strong-weak",
                    AccentuationPatternDef::new(
                        4.0,
                        vec![
                            Accentuation::new(1.0, 1.0),
                            Accentuation::new(2.0, -1.0),
                            Accentuation::new(3.0, 0.5),
                            Accentuation::new(4.0, -1.0),
                        ],
                    ),
                )
                .with(
                    "waltz",
                    AccentuationPatternDef::new(3.0, vec![Accentuation::new(1.0, 1.0), Accentuation::new(2.0, 0.0)]),
                ),
        );
        header
    }

    fn quarters(count: usize) -> Timeline {
        Timeline {
            slots: (0..count)
                .map(|i| {
                    let mut slot = Slot::new(i, i as f64 * 720.0);
                    slot.is_note = true;
                    slot.duration = Some(720.0);
                    slot.velocity = Some(80.0);
                    slot
                })
                .collect(),
        }
    }

    fn entry(name: &str, looped: bool, stick_to_measures: bool) -> AccentuationEntry {
        AccentuationEntry {
            name_ref: name.into(),
            scale: 10.0,
            looped,
            stick_to_measures,
        }
    }

    #[test]
    fn looped_pattern_in_common_time() {
        env_logger::try_init().unwrap_or(());

        let header = header();
        let ctx = Context::new(720, StylePools::new(None, &header), true);
        let mut diag = Diagnostics::default();

        let mut map = MetricalAccentuationMap::new();
        map.push_style(0.0, "meter");
        map.push_entry(0.0, entry("strong-weak", true, true));

        let mut timeline = quarters(8);
        render(&mut timeline, &map, None, &ctx, &mut diag);
        let velocities: Vec<f64> = timeline.notes().filter_map(|s| s.velocity).collect();
        assert_eq!(velocities, vec![90.0, 70.0, 85.0, 70.0, 90.0, 70.0, 85.0, 70.0]);
        assert!(diag.errors().is_empty());
    }

    #[test]
    fn one_shot_pattern() {
        let header = header();
        let ctx = Context::new(720, StylePools::new(None, &header), true);
        let mut diag = Diagnostics::default();

        let mut map = MetricalAccentuationMap::new();
        map.push_style(0.0, "meter");
        map.push_entry(0.0, entry("strong-weak", false, true));

        let mut timeline = quarters(6);
        render(&mut timeline, &map, None, &ctx, &mut diag);
        let velocities: Vec<f64> = timeline.notes().filter_map(|s| s.velocity).collect();
        assert_eq!(velocities, vec![90.0, 70.0, 85.0, 70.0, 80.0, 80.0]);
    }

    #[test]
    fn measures_follow_time_signature() {
        let header = header();
        let ctx = Context::new(720, StylePools::new(None, &header), true);
        let mut diag = Diagnostics::default();

        let mut map = MetricalAccentuationMap::new();
        map.push_style(0.0, "meter");
        map.push_entry(0.0, entry("waltz", true, true));

        let time_signatures: TimeSignatureMap = vec![Dated::new(
            0.0,
            TimeSignature {
                numerator: 3.0,
                denominator: 4,
            },
        )]
        .into();

        let mut timeline = quarters(6);
        render(&mut timeline, &map, Some(&time_signatures), &ctx, &mut diag);
        let velocities: Vec<f64> = timeline.notes().filter_map(|s| s.velocity).collect();
        assert_eq!(velocities, vec![90.0, 80.0, 80.0, 90.0, 80.0, 80.0]);
    }

    #[test]
    fn pattern_periodicity_ignores_measures() {
        let header = header();
        let ctx = Context::new(720, StylePools::new(None, &header), true);
        let mut diag = Diagnostics::default();

        let mut map = MetricalAccentuationMap::new();
        map.push_style(0.0, "meter");
        map.push_entry(0.0, entry("waltz", true, false));

        // 3 beat pattern across 4/4 measures
        let mut timeline = quarters(6);
        render(&mut timeline, &map, None, &ctx, &mut diag);
        let velocities: Vec<f64> = timeline.notes().filter_map(|s| s.velocity).collect();
        assert_eq!(velocities, vec![90.0, 80.0, 80.0, 90.0, 80.0, 80.0]);
    }

    #[test]
    fn missing_pattern_is_skipped() {
        let header = header();
        let ctx = Context::new(720, StylePools::new(None, &header), true);
        let mut diag = Diagnostics::default();

        let mut map = MetricalAccentuationMap::new();
        map.push_style(0.0, "meter");
        map.push_entry(0.0, entry("polka", true, true));

        let mut timeline = quarters(2);
        render(&mut timeline, &map, None, &ctx, &mut diag);
        assert!(timeline.notes().all(|s| s.velocity == Some(80.0)));
        assert_eq!(diag.errors().len(), 1);
    }
}
