use crate::model::style::ArticulationDef;
use log::info;

pub const DEFAULT_BPM: f64 = 100.0;
pub const DEFAULT_VOLUME: f64 = 74.0;

/// Conventional bpm for a tempo word, matched by substring in this order.
pub fn default_tempo(descriptor: &str) -> Option<f64> {
    const TABLE: [(&str, f64); 17] = [
        ("grave", 42.0),
        ("largo", 50.0),
        ("lento", 51.0),
        ("adagio", 79.0),
        ("larghetto", 69.0),
        ("adagietto", 66.0),
        ("andante", 101.0),
        ("andantino", 80.0),
        ("maestoso", 88.0),
        ("moderato", 106.0),
        ("allegretto", 110.0),
        ("animato", 121.0),
        ("allegro", 147.0),
        ("assai", 145.0),
        ("vivace", 164.0),
        ("presto", 189.0),
        ("prestissimo", 206.0),
    ];

    let descriptor = descriptor.trim().to_lowercase();
    TABLE
        .iter()
        .find(|(word, _)| descriptor.contains(word))
        .map(|(_, bpm)| *bpm)
}

/// Conventional MIDI volume for a dynamics marking.
pub fn default_volume(marking: &str) -> Option<f64> {
    let volume = match marking.trim().to_lowercase().as_str() {
        "pppp" | "pianissimopianissimo" => 5.0,
        "ppp" | "pianopianissimo" => 12.0,
        "pp" | "pianissimo" => 36.0,
        "p" | "piano" => 48.0,
        "mp" | "mezzopiano" => 64.0,
        "mf" | "mezzoforte" => 83.0,
        "f" | "forte" => 97.0,
        "ff" | "fortissimo" => 111.0,
        "fff" | "fortefortissimo" => 120.0,
        "ffff" | "fortissimofortissimo" => 125.0,
        "sf" | "sfz" | "fz" | "sforzato" => 127.0,
        _ => return None,
    };
    Some(volume)
}

/// Standard modifiers for common articulation names.
pub fn default_articulation(name: &str) -> Option<ArticulationDef> {
    let base = ArticulationDef::default();
    let def = match name.trim().to_lowercase().as_str() {
        "accent" | "acc" => ArticulationDef {
            absolute_velocity_change: 25.0,
            ..base
        },
        "breath" | "cesura" | "caesura" => ArticulationDef {
            absolute_duration_change_ms: -400.0,
            absolute_velocity_change: -5.0,
            ..base
        },
        "down bow" | "dnbow" | "up bow" | "upbow" => base,
        "legatissimo" => ArticulationDef {
            absolute_duration_change_ms: 250.0,
            ..base
        },
        "legato" | "leg" => ArticulationDef {
            relative_duration: 1.0,
            ..base
        },
        "legatostop" => ArticulationDef {
            relative_duration: 0.8,
            relative_velocity: 0.7,
            ..base
        },
        "marcato" | "marc" => ArticulationDef {
            relative_duration: 0.8,
            absolute_velocity_change: 25.0,
            ..base
        },
        "nonlegato" => ArticulationDef {
            relative_duration: 0.95,
            ..base
        },
        "pizzicato" | "pizz" | "left-hand pizzicato" | "lhpizz" => ArticulationDef {
            absolute_duration: Some(1.0),
            ..base
        },
        "portato" | "port" => ArticulationDef {
            relative_duration: 0.8,
            ..base
        },
        "sf" | "sfz" | "fz" | "sforzato" => ArticulationDef {
            absolute_velocity: Some(127.0),
            relative_duration: 0.8,
            ..base
        },
        "snap" | "snap pizzicato" => ArticulationDef {
            absolute_duration: Some(1.0),
            absolute_velocity_change: 25.0,
            ..base
        },
        "spiccato" | "spicc" => ArticulationDef {
            absolute_duration_ms: Some(140.0),
            absolute_velocity_change: 25.0,
            ..base
        },
        "staccato" | "stacc" => ArticulationDef {
            absolute_duration_ms: Some(160.0),
            absolute_velocity_change: -5.0,
            ..base
        },
        "staccatissimo" | "stacciss" => ArticulationDef {
            absolute_duration_ms: Some(140.0),
            absolute_velocity_change: 5.0,
            ..base
        },
        "standardarticulation" => ArticulationDef {
            absolute_duration_change: -70.0,
            ..base
        },
        "tenuto" | "ten" => ArticulationDef {
            relative_duration: 0.9,
            absolute_velocity_change: 12.0,
            ..base
        },
        other => {
            info!("No default articulation for '{}'..!", other);
            return None;
        }
    };
    Some(def)
}

/// Parses a numeric literal, allowing surrounding whitespace.
pub fn parse_number(input: &str) -> Option<f64> {
    input.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn clamp_velocity(velocity: f64) -> f64 {
    velocity.clamp(0.0, 127.0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tempo_words() {
        assert_eq!(default_tempo("Allegro ma non troppo"), Some(147.0));
        assert_eq!(default_tempo("allegretto"), Some(110.0));
        assert_eq!(default_tempo("  Larghetto"), Some(69.0));
        assert_eq!(default_tempo("Prestissimo"), Some(206.0));
        assert_eq!(default_tempo("Tempo I"), None);
    }

    #[test]
    fn volume_markings() {
        assert_eq!(default_volume("mf"), Some(83.0));
        assert_eq!(default_volume("Pianissimo"), Some(36.0));
        assert_eq!(default_volume("sfz"), Some(127.0));
        assert_eq!(default_volume("loud-ish"), None);
    }

    #[test]
    fn articulation_table() {
        env_logger::try_init().unwrap_or(());

        let staccato = default_articulation("staccato").unwrap();
        assert_eq!(staccato.absolute_duration_ms, Some(160.0));
        assert_eq!(staccato.absolute_velocity_change, -5.0);

        let tenuto = default_articulation("ten").unwrap();
        assert_eq!(tenuto.relative_duration, 0.9);
        assert_eq!(tenuto.absolute_velocity_change, 12.0);

        let sforzato = default_articulation("sforzato").unwrap();
        assert_eq!(sforzato.absolute_velocity, Some(127.0));

        assert!(default_articulation("upbow").unwrap().is_neutral());
        assert!(default_articulation("wobble").is_none());
    }

    #[test]
    fn numbers_and_velocities() {
        assert_eq!(parse_number(" 96.5 "), Some(96.5));
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("fast"), None);
        assert_eq!(clamp_velocity(140.0), 127.0);
        assert_eq!(clamp_velocity(-3.0), 0.0);
    }
}
