// MIDI adapters around the engine.
//
// Reading: the first track that contains notes is taken as the melody.
// Absolute ticks are accumulated from the deltas; overlapping notes are made
// monophonic by keeping the higher pitch of notes that start together and
// cutting a sounding note off when the next one starts.
//
// Writing: SMF Format 1 with a tempo track (track 0) and one track per
// voice, choir aahs on channel = voice index. Times are copied from the
// notes as-is, so the melody's ticks survive a round trip exactly.
//
// Uses the `midly` crate. The engine itself never touches MIDI bytes.

use crate::error::{HarmonyError, Result};
use crate::grid::{Melody, Note, Voice};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use std::path::Path;
use tracing::debug;

/// Tempo assumed when a file carries no tempo event.
pub const DEFAULT_TEMPO_BPM: u16 = 120;

/// Largest tick a note may end on (deltas are 28-bit).
const MAX_TICK: u32 = 0x0FFF_FFFF;

/// General MIDI program for choir aahs.
const CHOIR_PROGRAM: u8 = 52;

/// A melody read from a file, with the tempo to write it back at.
#[derive(Debug, Clone, PartialEq)]
pub struct MelodyFile {
    pub melody: Melody,
    pub tempo_bpm: u16,
}

pub fn read_melody(path: &Path) -> Result<MelodyFile> {
    let data = std::fs::read(path)?;
    read_melody_bytes(&data)
}

pub fn read_melody_bytes(data: &[u8]) -> Result<MelodyFile> {
    let smf = Smf::parse(data)?;
    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(tpq) => tpq.as_int(),
        Timing::Timecode(..) => {
            return Err(HarmonyError::malformed("SMPTE timecode MIDI files are not supported"));
        }
    };

    let tempo_bpm = smf
        .tracks
        .iter()
        .flat_map(|t| t.iter())
        .find_map(|e| match e.kind {
            TrackEventKind::Meta(MetaMessage::Tempo(us)) if us.as_int() > 0 => {
                Some((60_000_000 / us.as_int()).clamp(1, u32::from(u16::MAX)) as u16)
            }
            _ => None,
        })
        .unwrap_or(DEFAULT_TEMPO_BPM);

    for (index, track) in smf.tracks.iter().enumerate() {
        let notes = track_notes(track);
        if !notes.is_empty() {
            debug!(track = index, notes = notes.len(), ticks_per_quarter, "melody track found");
            return Ok(MelodyFile {
                melody: Melody::new(notes, ticks_per_quarter)?,
                tempo_bpm,
            });
        }
    }
    Err(HarmonyError::malformed("MIDI file contains no notes"))
}

/// Monophonic note list from one track.
fn track_notes(track: &Track<'_>) -> Vec<Note> {
    let mut notes: Vec<Note> = Vec::new();
    // (pitch, start, velocity) of the sounding note.
    let mut sounding: Option<(u8, u32, u8)> = None;
    let mut tick: u32 = 0;

    for event in track.iter() {
        tick = tick.saturating_add(event.delta.as_int());
        let TrackEventKind::Midi { message, .. } = event.kind else {
            continue;
        };
        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                let (pitch, velocity) = (key.as_int(), vel.as_int());
                match sounding {
                    // Chord onset: keep the top note.
                    Some((p, start, _)) if start == tick => {
                        if pitch > p {
                            sounding = Some((pitch, tick, velocity));
                        }
                    }
                    Some(current) => {
                        finish(&mut notes, current, tick);
                        sounding = Some((pitch, tick, velocity));
                    }
                    None => sounding = Some((pitch, tick, velocity)),
                }
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                if let Some(current) = sounding.filter(|(p, _, _)| *p == key.as_int()) {
                    finish(&mut notes, current, tick);
                    sounding = None;
                }
            }
            _ => {}
        }
    }
    if let Some(current) = sounding {
        // Unterminated final note: give it a nominal length of one tick.
        finish(&mut notes, current, tick.saturating_add(1));
    }
    notes
}

fn finish(notes: &mut Vec<Note>, (pitch, start, velocity): (u8, u32, u8), end: u32) {
    if end > start {
        notes.push(Note {
            voice: 0,
            pitch,
            start,
            duration: end - start,
            velocity,
        });
    }
}

/// Write a harmonization to a Standard MIDI File.
pub fn write_harmonization(
    notes: &[Note],
    voices: &[Voice],
    ticks_per_quarter: u16,
    tempo_bpm: u16,
    path: &Path,
) -> Result<()> {
    let bytes = harmonization_to_bytes(notes, voices, ticks_per_quarter, tempo_bpm)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Encode a harmonization as SMF bytes.
pub fn harmonization_to_bytes(
    notes: &[Note],
    voices: &[Voice],
    ticks_per_quarter: u16,
    tempo_bpm: u16,
) -> Result<Vec<u8>> {
    let smf = harmonization_to_smf(notes, voices, ticks_per_quarter, tempo_bpm)?;
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

fn harmonization_to_smf(
    notes: &[Note],
    voices: &[Voice],
    ticks_per_quarter: u16,
    tempo_bpm: u16,
) -> Result<Smf<'static>> {
    if ticks_per_quarter == 0 || ticks_per_quarter > 0x7FFF {
        return Err(HarmonyError::malformed(format!(
            "ticks per quarter {ticks_per_quarter} must be in 1..=32767"
        )));
    }
    if tempo_bpm < 4 {
        return Err(HarmonyError::malformed(format!("tempo {tempo_bpm} BPM is too slow for MIDI")));
    }
    if voices.len() > 16 {
        return Err(HarmonyError::malformed("more voices than MIDI channels"));
    }
    for note in notes {
        if note.voice >= voices.len() {
            return Err(HarmonyError::malformed(format!(
                "note for voice {} but only {} voices",
                note.voice,
                voices.len()
            )));
        }
        if note.pitch > 127 || note.velocity > 127 {
            return Err(HarmonyError::malformed(format!(
                "note pitch {} / velocity {} outside MIDI range",
                note.pitch, note.velocity
            )));
        }
        if note.start.checked_add(note.duration).is_none_or(|end| end > MAX_TICK) {
            return Err(HarmonyError::malformed(format!(
                "note at tick {} ends past the MIDI delta range",
                note.start
            )));
        }
    }

    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(ticks_per_quarter)),
    ));

    let tempo_us = 60_000_000 / u32::from(tempo_bpm);
    smf.tracks.push(vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_us))),
        },
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ]);

    for (index, voice) in voices.iter().enumerate() {
        let channel = u4::new(index as u8);
        let mut track: Track<'static> = vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(voice.name().as_bytes())),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(CHOIR_PROGRAM),
                    },
                },
            },
        ];

        // (tick, is_on, pitch, velocity); offs sort before ons at the same
        // tick so repeated pitches re-attack cleanly.
        let mut events: Vec<(u32, bool, u8, u8)> = Vec::new();
        for note in notes.iter().filter(|n| n.voice == index) {
            events.push((note.start, true, note.pitch, note.velocity));
            events.push((note.end(), false, note.pitch, 0));
        }
        events.sort_by_key(|&(tick, on, pitch, _)| (tick, on, pitch));

        let mut last_tick = 0;
        for (tick, on, pitch, velocity) in events {
            let message = if on {
                MidiMessage::NoteOn {
                    key: u7::new(pitch),
                    vel: u7::new(velocity),
                }
            } else {
                MidiMessage::NoteOff {
                    key: u7::new(pitch),
                    vel: u7::new(0),
                }
            };
            track.push(TrackEvent {
                delta: u28::new(tick - last_tick),
                kind: TrackEventKind::Midi { channel, message },
            });
            last_tick = tick;
        }

        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    Ok(smf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn harmonization() -> (Vec<Note>, Vec<Voice>) {
        let mut notes = Vec::new();
        for (step, (&s, &b)) in [67u8, 65, 64].iter().zip(&[48u8, 50, 48]).enumerate() {
            let start = step as u32 * 480;
            notes.push(Note { voice: 0, pitch: s, start, duration: 360, velocity: 90 });
            notes.push(Note { voice: 1, pitch: b, start, duration: 360, velocity: 90 });
        }
        (notes, vec![Voice::Soprano, Voice::Bass])
    }

    #[test]
    fn test_smf_layout() {
        let (notes, voices) = harmonization();
        let smf = harmonization_to_smf(&notes, &voices, 480, 100).unwrap();
        // 1 tempo track + 2 voice tracks
        assert_eq!(smf.tracks.len(), 3);
        // name + program + 3 on + 3 off + end
        assert_eq!(smf.tracks[1].len(), 9);
    }

    #[test]
    fn test_melody_survives_write_then_read() {
        let (notes, voices) = harmonization();
        let bytes = harmonization_to_bytes(&notes, &voices, 480, 100).unwrap();
        let file = read_melody_bytes(&bytes).unwrap();
        assert_eq!(file.tempo_bpm, 100);
        assert_eq!(file.melody.ticks_per_quarter(), 480);
        let melody: Vec<Note> = notes.iter().filter(|n| n.voice == 0).copied().collect();
        assert_eq!(file.melody.notes(), &melody[..]);
    }

    #[test]
    fn test_rejects_bad_output() {
        let (notes, voices) = harmonization();
        assert!(harmonization_to_bytes(&notes, &voices[..1], 480, 100).is_err());
        assert!(harmonization_to_bytes(&notes, &voices, 0, 100).is_err());
        assert!(harmonization_to_bytes(&notes, &voices, 480, 0).is_err());
    }

    #[test]
    fn test_garbage_is_midi_error() {
        assert!(matches!(
            read_melody_bytes(b"not a midi file"),
            Err(HarmonyError::Midi(_))
        ));
    }
}
