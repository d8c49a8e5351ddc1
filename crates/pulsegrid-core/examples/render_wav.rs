//! Builds a short demo song in code and renders it to a WAV file.
//!
//! Usage: render_wav <output wav> [--seconds=N]

use std::env;
use std::sync::Arc;

use pulsegrid_core::apu::{Apu, DefaultApu};
use pulsegrid_core::data::{Instrument, Module, OrderRow};
use pulsegrid_core::engine::{Engine, RuntimeContext};
use pulsegrid_core::note::{NOTE_A, NOTE_C, NOTE_E, NOTE_G, OCTAVE_3, OCTAVE_4, OCTAVE_5};
use pulsegrid_core::synth::Synth;
use pulsegrid_core::{ChType, EffectType};

const SAMPLERATE: u32 = 48_000;
const DEFAULT_SECONDS: f64 = 5.0;

fn build_module() -> Module {
    let mut module = Module::new();

    // instrument 00: pulse lead with a short duty sequence
    {
        let table = module.instrument_table_mut();
        let id = table.insert().expect("table is empty");
        let inst = table.get_mut(id).expect("item was just inserted");
        inst.set_name("lead");
        inst.set_envelope(Some(0xA7));
        inst.sequence_mut(Instrument::SEQUENCE_TIMBRE)
            .data_mut()
            .extend_from_slice(&[1, 1, 2]);
    }

    // instrument 01: echoing bass
    {
        let table = module.instrument_table_mut();
        let id = table.insert().expect("table has room");
        let inst = table.get_mut(id).expect("item was just inserted");
        inst.set_name("bass");
        inst.set_envelope(Some(0x77));
    }

    // waveform 00: triangle
    {
        let table = module.waveform_table_mut();
        let id = table.insert().expect("table is empty");
        let wave = table.get_mut(id).expect("item was just inserted");
        wave.set_name("triangle");
        wave.parse_hex("0123456789ABCDEFFEDCBA9876543210");
    }

    let song = module.songs_mut().get_mut(0).expect("modules have a song");
    song.set_name("demo");
    song.set_speed(0x40);
    song.patterns_mut().set_length(16);
    song.order_mut().set_data(vec![
        OrderRow([0, 0, 0, 0]),
        OrderRow([0, 1, 0, 0]),
    ]);

    {
        let lead = song.patterns_mut().track_mut(ChType::Ch1, 0);
        lead.set_instrument(0, 0);
        lead.set_note(0, NOTE_C + OCTAVE_4);
        lead.set_note(2, NOTE_E + OCTAVE_4);
        lead.set_note(4, NOTE_G + OCTAVE_4);
        lead.set_note(6, NOTE_C + OCTAVE_5);
        lead.set_note(8, NOTE_A + OCTAVE_4);
        lead.set_effect(8, 0, EffectType::Vibrato, 0x42);
        lead.set_note(12, NOTE_G + OCTAVE_4);
        lead.set_effect(12, 0, EffectType::Vibrato, 0x00);
    }

    {
        let harmony = song.patterns_mut().track_mut(ChType::Ch2, 1);
        harmony.set_instrument(0, 0);
        harmony.set_note(0, NOTE_E + OCTAVE_4);
        harmony.set_note(4, NOTE_C + OCTAVE_5);
        harmony.set_effect(4, 0, EffectType::Arpeggio, 0x47);
        harmony.set_note(12, NOTE_G + OCTAVE_4);
        harmony.set_effect(12, 0, EffectType::Arpeggio, 0x00);
    }

    {
        let bass = song.patterns_mut().track_mut(ChType::Ch3, 0);
        bass.set_instrument(0, 1);
        bass.set_note(0, NOTE_C + OCTAVE_3);
        bass.set_note(8, NOTE_G + OCTAVE_3);
    }

    module
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let out_path = args.next().ok_or("expected <output wav> [--seconds=N]")?;
    let mut seconds = DEFAULT_SECONDS;
    for arg in args {
        if let Some(value) = arg.strip_prefix("--seconds=") {
            seconds = value.parse()?;
        } else {
            return Err(format!("unrecognised flag: {arg}").into());
        }
    }
    if seconds <= 0.0 {
        return Err("seconds must be positive".into());
    }

    let module = build_module();
    let song = Arc::new(module.songs().get(0).expect("modules have a song").clone());

    let mut apu = DefaultApu::new();
    let mut synth = Synth::new(&mut apu, SAMPLERATE, module.framerate());
    synth.reset();

    let mut engine = Engine::new();
    engine.play(song);

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: SAMPLERATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&out_path, spec)?;

    let total_frames = (seconds * SAMPLERATE as f64).ceil() as usize;
    let mut written = 0usize;
    let mut buf = vec![0.0f32; synth.frame_size() * 2];

    while written < total_frames {
        {
            let apu = synth.apu();
            apu.begin_frame();
            let mut rc = RuntimeContext::new(
                apu,
                module.instrument_table(),
                module.waveform_table(),
            );
            engine.step(&mut rc);
        }
        synth.run();

        let apu = synth.apu();
        let available = apu.samples_available().min(total_frames - written);
        let read = apu.read_samples(&mut buf[..available * 2]);
        for frame in buf[..read * 2].chunks_exact(2) {
            writer.write_sample((frame[0].clamp(-1.0, 1.0) * 32767.0) as i16)?;
            writer.write_sample((frame[1].clamp(-1.0, 1.0) * 32767.0) as i16)?;
        }
        written += read;
    }

    writer.finalize()?;
    println!("wrote {written} frames to {out_path}");
    Ok(())
}
