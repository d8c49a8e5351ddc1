use std::sync::Arc;

use pulsegrid_core::apu::{self, ApuIo, NullApu};
use pulsegrid_core::data::{Module, OrderRow, Song};
use pulsegrid_core::engine::{Engine, RuntimeContext};
use pulsegrid_core::note::{
    lookup_tone_note, NOTE_C, NOTE_CUT, NOTE_E, NOTE_G, OCTAVE_4,
};
use pulsegrid_core::{ChType, EffectType, SPEED_MIN};

/// Records every register write for asserting on engine output.
#[derive(Default)]
struct RecordingApu {
    writes: Vec<(u8, u8)>,
}

impl ApuIo for RecordingApu {
    fn read_register(&self, _reg: u8) -> u8 {
        0
    }

    fn write_register(&mut self, reg: u8, value: u8) {
        self.writes.push((reg, value));
    }
}

fn step_frames(engine: &mut Engine, module: &Module, apu: &mut dyn ApuIo, frames: usize) -> Vec<pulsegrid_core::engine::Frame> {
    let mut result = Vec::new();
    for _ in 0..frames {
        let mut rc = RuntimeContext::new(apu, module.instrument_table(), module.waveform_table());
        result.push(engine.step(&mut rc));
    }
    result
}

fn song_arc(module: &Module) -> Arc<Song> {
    Arc::new(module.songs().get(0).unwrap().clone())
}

#[test]
fn q44_speed_row_timing() {
    let mut module = Module::new();
    module.songs_mut().get_mut(0).unwrap().set_speed(0x28); // 2.5 frames/row

    let mut engine = Engine::new();
    engine.play(song_arc(&module));

    let mut apu = NullApu::new();
    let frames = step_frames(&mut engine, &module, &mut apu, 10);
    let new_rows: Vec<usize> = frames
        .iter()
        .enumerate()
        .filter(|(_, f)| f.new_row)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(new_rows, vec![0, 3, 5, 8]);
    let rows: Vec<usize> = frames
        .iter()
        .filter(|f| f.new_row)
        .map(|f| f.row)
        .collect();
    assert_eq!(rows, vec![0, 1, 2, 3]);
}

#[test]
fn arpeggio_cycles_the_chord() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    track.set_effect(0, 0, EffectType::Arpeggio, 0x47);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));

    let mut apu = NullApu::new();
    let mut freqs = Vec::new();
    for _ in 0..6 {
        let mut rc =
            RuntimeContext::new(&mut apu, module.instrument_table(), module.waveform_table());
        engine.step(&mut rc);
        freqs.push(engine.channel_state(ChType::Ch1).frequency);
    }

    let c4 = lookup_tone_note(NOTE_C + OCTAVE_4);
    let e4 = lookup_tone_note(NOTE_E + OCTAVE_4);
    let g4 = lookup_tone_note(NOTE_G + OCTAVE_4);
    assert_eq!(freqs, vec![c4, e4, g4, c4, e4, g4]);
}

#[test]
fn halt_effect_stops_playback() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch2, 0);
    track.set_effect(2, 0, EffectType::PatternHalt, 0);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    assert!(engine.playing());

    let mut apu = NullApu::new();
    let frames = step_frames(&mut engine, &module, &mut apu, 4);
    assert!(!frames[0].halted);
    assert!(!frames[1].halted);
    assert!(frames[2].halted);
    assert!(!engine.playing());
    // once halted, stepping stays halted
    assert!(frames[3].halted);
}

#[test]
fn tempo_effect_changes_speed() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_effect(0, 0, EffectType::SetTempo, 0x45);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();
    let frames = step_frames(&mut engine, &module, &mut apu, 1);
    assert_eq!(engine.speed(), 0x45);
    assert_eq!(frames[0].speed, 0x45);
}

#[test]
fn tempo_effect_rejects_out_of_range_params() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(0x40);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_effect(0, 0, EffectType::SetTempo, 0x05);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();
    step_frames(&mut engine, &module, &mut apu, 1);
    assert_eq!(engine.speed(), 0x40);
}

#[test]
fn pattern_goto_jumps_order() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    song.patterns_mut().set_length(4);
    song.order_mut()
        .set_data(vec![OrderRow([0; 4]), OrderRow([1; 4]), OrderRow([2; 4])]);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_effect(0, 0, EffectType::PatternGoto, 2);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();
    let frames = step_frames(&mut engine, &module, &mut apu, 2);
    assert_eq!((frames[0].order, frames[0].row), (0, 0));
    assert_eq!((frames[1].order, frames[1].row), (2, 0));
}

#[test]
fn pattern_skip_starts_next_at_row() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    song.patterns_mut().set_length(8);
    song.order_mut()
        .set_data(vec![OrderRow([0; 4]), OrderRow([1; 4])]);
    let track = song.patterns_mut().track_mut(ChType::Ch3, 0);
    track.set_effect(0, 1, EffectType::PatternSkip, 5);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();
    let frames = step_frames(&mut engine, &module, &mut apu, 2);
    assert_eq!((frames[1].order, frames[1].row), (1, 5));
}

#[test]
fn order_wraps_to_start() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    song.patterns_mut().set_length(2);
    song.order_mut()
        .set_data(vec![OrderRow([0; 4]), OrderRow([1; 4])]);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();
    let frames = step_frames(&mut engine, &module, &mut apu, 5);
    let positions: Vec<(usize, usize)> = frames.iter().map(|f| (f.order, f.row)).collect();
    assert_eq!(positions, vec![(0, 0), (0, 1), (1, 0), (1, 1), (0, 0)]);
}

#[test]
fn delayed_note_defers_commit() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(0x40);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    track.set_effect(0, 0, EffectType::DelayedNote, 2);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();

    step_frames(&mut engine, &module, &mut apu, 1);
    assert!(!engine.channel_state(ChType::Ch1).playing);
    step_frames(&mut engine, &module, &mut apu, 1);
    assert!(!engine.channel_state(ChType::Ch1).playing);
    step_frames(&mut engine, &module, &mut apu, 1);
    assert!(engine.channel_state(ChType::Ch1).playing);
}

#[test]
fn delayed_cut_stops_after_duration() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(0x60);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    track.set_effect(0, 0, EffectType::DelayedCut, 3);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();

    for frame in 0..5 {
        step_frames(&mut engine, &module, &mut apu, 1);
        let playing = engine.channel_state(ChType::Ch1).playing;
        if frame < 3 {
            assert!(playing, "expected playing on frame {frame}");
        } else {
            assert!(!playing, "expected cut on frame {frame}");
        }
    }
}

#[test]
fn note_cut_sentinel_cuts_immediately() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    track.set_note(2, NOTE_CUT);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();

    step_frames(&mut engine, &module, &mut apu, 2);
    assert!(engine.channel_state(ChType::Ch1).playing);
    step_frames(&mut engine, &module, &mut apu, 1);
    assert!(!engine.channel_state(ChType::Ch1).playing);
}

#[test]
fn note_trigger_writes_registers() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = RecordingApu::default();
    step_frames(&mut engine, &module, &mut apu, 1);

    let freq = lookup_tone_note(NOTE_C + OCTAVE_4);
    assert!(apu.writes.contains(&(apu::REG_NR12, 0xF0)));
    assert!(apu.writes.contains(&(apu::REG_NR13, (freq & 0xFF) as u8)));
    assert!(apu
        .writes
        .contains(&(apu::REG_NR14, 0x80 | (freq >> 8) as u8)));
    // default timbre is duty 3, default panning routes CH1 to both sides
    assert!(apu.writes.contains(&(apu::REG_NR11, 0xC0)));
    assert!(apu.writes.contains(&(apu::REG_NR51, 0x11)));
}

#[test]
fn unused_channels_are_silenced() {
    let module = Module::new();
    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = RecordingApu::default();
    step_frames(&mut engine, &module, &mut apu, 1);

    assert!(apu.writes.contains(&(apu::REG_NR12, 0)));
    assert!(apu.writes.contains(&(apu::REG_NR22, 0)));
    assert!(apu.writes.contains(&(apu::REG_NR30, 0)));
    assert!(apu.writes.contains(&(apu::REG_NR42, 0)));
}

#[test]
fn global_volume_writes_nr50() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch2, 0);
    track.set_effect(0, 0, EffectType::SetGlobalVolume, 0x34);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = RecordingApu::default();
    step_frames(&mut engine, &module, &mut apu, 1);
    assert!(apu.writes.contains(&(apu::REG_NR50, 0x34)));
}

#[test]
fn noise_note_writes_nr43() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch4, 0);
    track.set_note(0, 30);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = RecordingApu::default();
    step_frames(&mut engine, &module, &mut apu, 1);

    // noise note 30 with the default 15-bit width
    assert!(apu.writes.contains(&(apu::REG_NR43, 0x65)));
    assert!(apu.writes.contains(&(apu::REG_NR44, 0x80)));
}

#[test]
fn instrument_timbre_sequence_changes_duty() {
    let mut module = Module::new();
    {
        let table = module.instrument_table_mut();
        let id = table.insert().unwrap();
        let inst = table.get_mut(id).unwrap();
        inst.set_envelope(Some(0xF0));
        inst.sequence_mut(pulsegrid_core::data::Instrument::SEQUENCE_TIMBRE)
            .data_mut()
            .extend_from_slice(&[1]);
    }
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    track.set_instrument(0, 0);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = RecordingApu::default();
    step_frames(&mut engine, &module, &mut apu, 1);

    assert_eq!(engine.channel_state(ChType::Ch1).timbre, 1);
    assert!(apu.writes.contains(&(apu::REG_NR11, 1 << 6)));
}

#[test]
fn missing_instrument_id_is_ignored() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    track.set_instrument(0, 42); // no such instrument

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();
    step_frames(&mut engine, &module, &mut apu, 1);
    assert!(engine.channel_state(ChType::Ch1).playing);
}

#[test]
fn vibrato_oscillates_frequency() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    track.set_effect(0, 0, EffectType::Vibrato, 0x23);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();

    let base = lookup_tone_note(NOTE_C + OCTAVE_4);
    let mut seen = Vec::new();
    for _ in 0..12 {
        step_frames(&mut engine, &module, &mut apu, 1);
        seen.push(engine.channel_state(ChType::Ch1).frequency as i32 - base as i32);
    }
    // extent 3 swings +-3 around the note
    assert!(seen.iter().any(|&d| d == 3));
    assert!(seen.iter().any(|&d| d == -3));
    assert!(seen.iter().all(|&d| d.abs() <= 3));
}

#[test]
fn portamento_slides_toward_new_note() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(0x20); // 2 frames per row
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    track.set_note(1, NOTE_E + OCTAVE_4);
    track.set_effect(1, 0, EffectType::AutoPortamento, 0x10);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();

    let c4 = lookup_tone_note(NOTE_C + OCTAVE_4) as i32;
    let e4 = lookup_tone_note(NOTE_E + OCTAVE_4) as i32;

    let mut last = c4;
    let mut reached = false;
    for _ in 0..32 {
        step_frames(&mut engine, &module, &mut apu, 1);
        let freq = engine.channel_state(ChType::Ch1).frequency as i32;
        assert!(freq >= last, "portamento should slide upward");
        assert!(freq <= e4);
        last = freq;
        if freq == e4 {
            reached = true;
        }
    }
    assert!(reached, "slide should reach the target note");
}

#[test]
fn note_slide_stops_at_target() {
    let mut module = Module::new();
    let song = module.songs_mut().get_mut(0).unwrap();
    song.set_speed(SPEED_MIN);
    let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
    track.set_note(0, NOTE_C + OCTAVE_4);
    // slide up 4 semitones at 1 + 2*15 = 31 units/frame
    track.set_effect(1, 0, EffectType::NoteSlideUp, 0x4F);

    let mut engine = Engine::new();
    engine.play(song_arc(&module));
    let mut apu = NullApu::new();

    let e4 = lookup_tone_note(NOTE_E + OCTAVE_4);
    step_frames(&mut engine, &module, &mut apu, 16);
    assert_eq!(engine.channel_state(ChType::Ch1).frequency, e4);
    // the slide parks there; the mode has returned to none
    step_frames(&mut engine, &module, &mut apu, 4);
    assert_eq!(engine.channel_state(ChType::Ch1).frequency, e4);
}

#[test]
fn row_advance_count_matches_q44_division() {
    for speed in [0x10u8, 0x28, 0x3C, 0x60, 0xF0] {
        let mut module = Module::new();
        module.songs_mut().get_mut(0).unwrap().set_speed(speed);
        // large pattern so wrap effects stay out of the count
        module
            .songs_mut()
            .get_mut(0)
            .unwrap()
            .patterns_mut()
            .set_length(256);

        let mut engine = Engine::new();
        engine.play(song_arc(&module));
        let mut apu = NullApu::new();
        // 65 steps: advances made in the first 64 frames surface as new_row
        // flags on frames 1..=64
        let frames = step_frames(&mut engine, &module, &mut apu, 65);
        let advances = frames.iter().skip(1).filter(|f| f.new_row).count();
        assert_eq!(advances, 64 * 16 / speed as usize, "speed {speed:#x}");
    }
}
