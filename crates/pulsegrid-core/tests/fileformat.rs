use pulsegrid_core::data::{InfoStr, Instrument, Module, OrderRow, Version};
use pulsegrid_core::fileformat::{FormatError, REV_MAJOR, SIGNATURE};
use pulsegrid_core::note::{NOTE_C, NOTE_CUT, OCTAVE_4};
use pulsegrid_core::{ChType, EffectType, System};

fn sample_module() -> Module {
    let mut module = Module::new();
    module.set_title(InfoStr::new("demo module"));
    module.set_artist(InfoStr::new("someone"));
    module.set_copyright(InfoStr::new("2024"));
    module.set_comments("made for the round trip test\nsecond line");
    module.set_system(System::Custom(120));
    module.set_version(Version::current());

    {
        let table = module.instrument_table_mut();
        let id = table.insert().unwrap();
        let inst = table.get_mut(id).unwrap();
        inst.set_name("lead");
        inst.set_channel(ChType::Ch2);
        inst.set_envelope(Some(0xB7));
        inst.sequence_mut(Instrument::SEQUENCE_ARP)
            .data_mut()
            .extend_from_slice(&[0, 4, 7]);
        inst.sequence_mut(Instrument::SEQUENCE_ARP).set_loop(1);
        inst.sequence_mut(Instrument::SEQUENCE_PITCH)
            .data_mut()
            .extend_from_slice(&[0xFF, 0xFF, 2]);

        let id = table.insert_with_id(9).unwrap();
        let inst = table.get_mut(id).unwrap();
        inst.set_name("noise hat");
        inst.set_channel(ChType::Ch4);
    }

    {
        let table = module.waveform_table_mut();
        let id = table.insert().unwrap();
        let wave = table.get_mut(id).unwrap();
        wave.set_name("triangle");
        wave.parse_hex("0123456789ABCDEFFEDCBA9876543210");
    }

    {
        let song = module.songs_mut().get_mut(0).unwrap();
        song.set_name("first song");
        song.set_speed(0x35);
        song.set_rows_per_beat(4);
        song.set_rows_per_measure(16);
        song.patterns_mut().set_length(32);
        song.order_mut()
            .set_data(vec![OrderRow([0, 0, 0, 0]), OrderRow([1, 0, 0, 2])]);

        let track = song.patterns_mut().track_mut(ChType::Ch1, 0);
        track.set_note(0, NOTE_C + OCTAVE_4);
        track.set_instrument(0, 0);
        track.set_effect(0, 0, EffectType::Vibrato, 0x42);
        track.set_note(4, NOTE_CUT);
        track.set_effect(31, 2, EffectType::PatternGoto, 0);

        let track = song.patterns_mut().track_mut(ChType::Ch4, 2);
        track.set_note(0, 30);
        track.set_instrument(0, 9);
    }

    {
        let index = module.songs_mut().add().unwrap();
        let song = module.songs_mut().get_mut(index).unwrap();
        song.set_name("second song");
        song.set_speed(0x60);
    }

    module
}

fn to_bytes(module: &Module) -> Vec<u8> {
    let mut bytes = Vec::new();
    module.serialize(&mut bytes).expect("serialization failed");
    bytes
}

#[test]
fn round_trip_preserves_everything() {
    let module = sample_module();
    let bytes = to_bytes(&module);

    let mut restored = Module::new();
    restored
        .deserialize(&mut bytes.as_slice())
        .expect("deserialization failed");
    assert_eq!(module, restored);
}

#[test]
fn round_trip_of_empty_module() {
    let module = Module::new();
    let bytes = to_bytes(&module);
    let mut restored = Module::new();
    restored.deserialize(&mut bytes.as_slice()).unwrap();
    assert_eq!(module, restored);
}

#[test]
fn signature_is_checked() {
    let mut bytes = to_bytes(&sample_module());
    bytes[0] = b'X';
    let mut module = Module::new();
    let err = module.deserialize(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, FormatError::InvalidSignature));
}

#[test]
fn newer_major_revision_is_rejected() {
    let mut bytes = to_bytes(&sample_module());
    bytes[SIGNATURE.len()] = REV_MAJOR + 1;
    let mut module = Module::new();
    let err = module.deserialize(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, FormatError::InvalidRevision));
}

#[test]
fn older_major_revision_cannot_upgrade() {
    let mut bytes = to_bytes(&sample_module());
    bytes[SIGNATURE.len()] = REV_MAJOR - 1;
    let mut module = Module::new();
    let err = module.deserialize(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, FormatError::CannotUpgrade));
}

#[test]
fn newer_minor_revision_is_accepted() {
    let mut bytes = to_bytes(&sample_module());
    bytes[SIGNATURE.len() + 1] = 99;
    let mut module = Module::new();
    assert!(module.deserialize(&mut bytes.as_slice()).is_ok());
}

#[test]
fn duplicate_instrument_id_is_detected() {
    let mut module = Module::new();
    {
        let table = module.instrument_table_mut();
        table.insert().unwrap(); // id 0
        let id = table.insert().unwrap(); // id 1
        table.get_mut(id).unwrap().set_name("b");
        table.get_mut(0).unwrap().set_name("a");
    }
    let mut bytes = to_bytes(&module);

    // rewrite the second instrument's id (the byte before its name) to 0
    let needle = [0x01u8, 0x01, 0x00, b'b'];
    let pos = bytes
        .windows(needle.len())
        .position(|window| window == needle)
        .expect("second instrument item not found");
    bytes[pos] = 0;

    let mut restored = Module::new();
    let err = restored.deserialize(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, FormatError::DuplicateId));
}

#[test]
fn truncated_file_is_a_read_error() {
    let bytes = to_bytes(&sample_module());
    let mut truncated = bytes.clone();
    truncated.truncate(bytes.len() / 2);
    let mut module = Module::new();
    let err = module.deserialize(&mut truncated.as_slice()).unwrap_err();
    assert!(matches!(err, FormatError::Read(_)));
}

#[test]
fn bad_system_byte_is_invalid() {
    let mut bytes = to_bytes(&sample_module());
    // system byte follows signature, revision, info strings, comment block
    // and version triple
    let comments_len = sample_module().comments().len();
    let offset = 4 + 2 + 96 + 4 + comments_len + 12;
    bytes[offset] = 0xFF;
    let mut module = Module::new();
    let err = module.deserialize(&mut bytes.as_slice()).unwrap_err();
    assert!(matches!(err, FormatError::Invalid));
}

#[test]
fn unknown_effects_become_no_ops() {
    let module = sample_module();
    let mut bytes = to_bytes(&module);

    // a vibrato effect (type 17, param 0x42) written by a newer revision
    // variant: patch its type byte to an unknown value
    let needle = [17u8, 0x42];
    let pos = bytes
        .windows(needle.len())
        .position(|window| window == needle)
        .expect("effect bytes not found");
    bytes[pos] = 200;

    let mut restored = Module::new();
    restored.deserialize(&mut bytes.as_slice()).unwrap();
    let song = restored.songs().get(0).unwrap();
    let row = song.patterns().track(ChType::Ch1, 0).unwrap().row(0);
    assert_eq!(row.effects[0].effect_type, EffectType::NoEffect);
}

#[test]
fn deserialize_replaces_previous_contents() {
    let module = sample_module();
    let bytes = to_bytes(&module);

    let mut target = Module::new();
    target.set_comments("stale");
    for _ in 0..5 {
        target.instrument_table_mut().insert();
    }
    target.deserialize(&mut bytes.as_slice()).unwrap();
    assert_eq!(module, target);
}
