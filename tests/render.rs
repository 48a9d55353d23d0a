use CADENZA::{
    Distribution, DistributionEntry, Event, GenericMap, ImprecisionMap, Performance,
    PerformancePart, RenderError, RenderOptions, Score, ScorePart, TempoEntry, TempoMap,
    load_performance, load_score, performance_from_str, render, save_performance, save_score,
};
use assert_approx_eq::assert_approx_eq;
use std::fs;
use std::path::PathBuf;

const MINUET: &str = r#"{
    "title": "Minuet",
    "ppq": 720,
    "global": {
        "sequencingMap": [{"date": 1440, "targetDate": 0, "activity": "1"}]
    },
    "parts": [
        {
            "name": "Piano",
            "number": 1,
            "midiChannel": 0,
            "midiPort": 0,
            "score": [
                {"id": "n1", "date": 0, "duration": 720, "type": "note", "pitch": 60, "velocity": 70},
                {"id": "n2", "date": 720, "duration": 720, "type": "note", "pitch": 62, "velocity": 70}
            ]
        },
        {
            "name": "Strings",
            "number": 2,
            "midiChannel": 1,
            "score": [
                {"id": "s1", "date": 0, "duration": 1440, "type": "note", "pitch": 48}
            ]
        }
    ]
}"#;

const CONCERT: &str = r##"{
    "performances": [
        {"name": "dry"},
        {
            "name": "concert",
            "ppq": 720,
            "global": {
                "header": {
                    "articulationStyles": {
                        "basic": {"defs": {"clipped": {"relativeDuration": 0.5}}}
                    }
                },
                "dated": {
                    "tempoMap": [{"date": 0, "entry": {"bpm": 120, "beatLength": 0.25}}],
                    "articulationMap": [
                        {"date": 0, "style": {"nameRef": "basic"}},
                        {"date": 0, "entry": {"nameRef": "wobble", "noteId": "#n1"}},
                        {"date": 720, "entry": {"nameRef": "clipped", "noteId": "#n2"}}
                    ]
                }
            },
            "parts": [{"name": "Piano", "number": 1, "midiChannel": 0, "midiPort": 0}]
        }
    ]
}"##;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cadenza-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn tempo(bpm: f64) -> TempoMap {
    let mut map = TempoMap::new();
    map.push_entry(0.0, TempoEntry::constant(bpm, 0.25));
    map
}

#[test]
fn repeats_carry_articulations_to_their_copies() {
    env_logger::try_init().unwrap_or(());

    let score: Score = serde_json::from_str(MINUET).unwrap();
    let performance = performance_from_str(CONCERT, Some("concert")).unwrap();
    let performed = render(&score, &performance, &RenderOptions::seeded(1));

    assert_eq!(performed.parts.len(), 1);
    assert_eq!(performed.skipped.len(), 1);
    assert_eq!(performed.skipped[0].part, "Strings");

    let piano = performed.part("Piano").unwrap();
    let onsets: Vec<(String, f64)> = piano
        .notes()
        .map(|n| (n.id.clone().unwrap(), n.ms_date))
        .collect();
    let expected = [
        ("n1", 0.0),
        ("n2", 500.0),
        ("repetition_1_n1", 1000.0),
        ("repetition_1_n2", 1500.0),
    ];
    assert_eq!(onsets.len(), expected.len());
    for ((id, ms), (expected_id, expected_ms)) in onsets.iter().zip(expected) {
        assert_eq!(id, expected_id);
        assert_approx_eq!(*ms, expected_ms, 1e-9);
    }

    assert_eq!(performed.repetitions_of("n2"), vec!["n2", "repetition_1_n2"]);
    assert_approx_eq!(piano.find("n1").unwrap().ms_duration.unwrap(), 500.0, 1e-9);
    assert_approx_eq!(piano.find("n2").unwrap().ms_duration.unwrap(), 250.0, 1e-9);
    assert_approx_eq!(
        piano.find("repetition_1_n2").unwrap().ms_duration.unwrap(),
        250.0,
        1e-9
    );

    assert!(performed.warnings.iter().any(|w| matches!(
        &w.error,
        RenderError::MissingReference { name, .. } if name == "wobble"
    )));
}

#[test]
fn part_maps_shadow_global_maps() {
    env_logger::try_init().unwrap_or(());

    let mut score = Score::default();
    for (name, number) in [("Flute", 1), ("Oboe", 2)] {
        let mut part = ScorePart::new(name, number, number as u8 - 1, 0);
        part.score = vec![Event::note("a", 720.0, 720.0, 72.0, 80.0)];
        score.parts.push(part);
    }

    let mut performance = Performance::new("shadowed", 720);
    performance.global.dated.tempo = Some(tempo(60.0));
    let mut flute = PerformancePart::new("Flute", 1, 0, 0);
    flute.dated.tempo = Some(tempo(120.0));
    performance.parts.push(flute);
    // an empty local map does not shadow the global one
    let mut oboe = PerformancePart::new("Oboe", 2, 1, 0);
    oboe.dated.tempo = Some(TempoMap::new());
    performance.parts.push(oboe);

    let performed = render(&score, &performance, &RenderOptions::default());
    let flute = performed.part("Flute").unwrap().find("a").unwrap();
    let oboe = performed.part("Oboe").unwrap().find("a").unwrap();
    assert_approx_eq!(flute.ms_date, 500.0, 1e-9);
    assert_approx_eq!(oboe.ms_date, 1000.0, 1e-9);
}

#[test]
fn seeded_imprecision_repeats() {
    env_logger::try_init().unwrap_or(());

    let score: Score = serde_json::from_str(MINUET).unwrap();
    let mut performance = performance_from_str(CONCERT, Some("concert")).unwrap();

    let mut entries = GenericMap::new();
    entries.insert(
        0.0,
        DistributionEntry::new(Distribution::Uniform {
            lower_limit: -30.0,
            upper_limit: 30.0,
        }),
    );
    performance.global.dated.imprecision_timing = Some(ImprecisionMap {
        entries,
        ..Default::default()
    });

    let first = render(&score, &performance, &RenderOptions::seeded(11));
    let again = render(&score, &performance, &RenderOptions::seeded(11));
    let other = render(&score, &performance, &RenderOptions::seeded(12));

    assert_eq!(first.parts, again.parts);
    assert_ne!(first.parts, other.parts);
    for note in first.parts[0].notes() {
        let exact = match note.id.as_deref() {
            Some("n1") => 0.0,
            Some("n2") => 500.0,
            Some("repetition_1_n1") => 1000.0,
            _ => 1500.0,
        };
        assert!((note.ms_date - exact).abs() <= 30.0);
    }
}

#[test]
fn files_round_trip() {
    env_logger::try_init().unwrap_or(());

    let dir = scratch_dir("files");
    let score: Score = serde_json::from_str(MINUET).unwrap();
    let performance = performance_from_str(CONCERT, Some("concert")).unwrap();

    save_score(&score, dir.join("score.json")).unwrap();
    save_performance(&performance, dir.join("performance.json")).unwrap();
    let loaded_score = load_score(dir.join("score.json")).unwrap();
    let loaded_performance = load_performance(dir.join("performance.json"), None).unwrap();

    assert_eq!(loaded_score, score);
    assert_eq!(loaded_performance, performance);

    let options = RenderOptions::seeded(5);
    let performed = render(&loaded_score, &loaded_performance, &options);
    assert_eq!(performed, render(&score, &performance, &options));

    CADENZA::save_performed(&performed, dir.join("performed.json")).unwrap();
    let reloaded = CADENZA::load_performed(dir.join("performed.json")).unwrap();
    assert_eq!(reloaded.parts, performed.parts);
    assert_eq!(reloaded.repetition_ids, performed.repetition_ids);

    assert!(load_score(dir.join("missing.json")).is_err());
    fs::remove_dir_all(&dir).unwrap_or(());
}

#[cfg(feature = "midi")]
#[test]
fn midi_export_reimports() {
    env_logger::try_init().unwrap_or(());

    let dir = scratch_dir("midi");
    let score: Score = serde_json::from_str(MINUET).unwrap();
    let performance = performance_from_str(CONCERT, Some("concert")).unwrap();
    let performed = render(&score, &performance, &RenderOptions::seeded(3));

    let path = dir.join("minuet.mid");
    CADENZA::export_midi_file(&performed, &path).unwrap();
    let imported = CADENZA::import_midi_file(&path).unwrap();

    assert_eq!(imported.score.parts.len(), 1);
    assert_eq!(imported.score.note_count(), performed.note_count());
    fs::remove_dir_all(&dir).unwrap_or(());
}
