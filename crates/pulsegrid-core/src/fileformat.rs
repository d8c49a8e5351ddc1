//! Module file (de)serialization.
//!
//! Layout: a signature header (magic + revision), the 3 x 32 byte info
//! strings, length-prefixed comments, the writing library's version, the
//! target system, then three typed blocks (`INST`, `WAVE`, `SONG`), each a
//! 4-byte id plus a u32 payload length. All integers are little-endian.
//!
//! Deserialization stops at the first error; the target module may be
//! partially populated afterwards and should be discarded by the caller.

use std::io::{self, Read, Write};

use log::debug;
use thiserror::Error;

use crate::data::{InfoStr, Instrument, Module, OrderRow, Sequence, Song, TrackRow, Version};
use crate::note::NOTE_CUT;
use crate::{ChType, EffectType, System, GB_WAVERAM_SIZE, MAX_PATTERNS};

/// File magic, the first four bytes of every module file.
pub const SIGNATURE: [u8; 4] = *b"\x00PGM";

/// Current file format major revision. Files with a newer major revision
/// cannot be read.
pub const REV_MAJOR: u8 = 1;

/// Current file format minor revision. Minor revisions are forward
/// compatible.
pub const REV_MINOR: u8 = 0;

const BLOCK_INST: [u8; 4] = *b"INST";
const BLOCK_WAVE: [u8; 4] = *b"WAVE";
const BLOCK_SONG: [u8; 4] = *b"SONG";

/// Errors produced when reading or writing module files.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("file signature does not match")]
    InvalidSignature,
    #[error("unsupported file revision")]
    InvalidRevision,
    #[error("module from a previous revision cannot be upgraded")]
    CannotUpgrade,
    #[error("two instruments or waveforms share an id")]
    DuplicateId,
    #[error("data format is invalid")]
    Invalid,
    #[error("unknown channel id in track data")]
    UnknownChannel,
    #[error("read error")]
    Read(#[source] io::Error),
    #[error("write error")]
    Write(#[source] io::Error),
}

impl Module {
    /// Writes the module to a stream in the current file format revision.
    pub fn serialize<W: Write>(&self, stream: &mut W) -> Result<(), FormatError> {
        serialize(self, stream)
    }

    /// Replaces this module's contents with data read from a stream.
    /// On error the module is left partially populated; discard it.
    pub fn deserialize<R: Read>(&mut self, stream: &mut R) -> Result<(), FormatError> {
        deserialize(self, stream)
    }
}

// ---------------------------------------------------------------- writing

fn write_all<W: Write>(stream: &mut W, bytes: &[u8]) -> Result<(), FormatError> {
    stream.write_all(bytes).map_err(FormatError::Write)
}

fn write_u8<W: Write>(stream: &mut W, value: u8) -> Result<(), FormatError> {
    write_all(stream, &[value])
}

fn write_u16<W: Write>(stream: &mut W, value: u16) -> Result<(), FormatError> {
    write_all(stream, &value.to_le_bytes())
}

fn write_u32<W: Write>(stream: &mut W, value: u32) -> Result<(), FormatError> {
    write_all(stream, &value.to_le_bytes())
}

fn write_string<W: Write>(stream: &mut W, text: &str) -> Result<(), FormatError> {
    let bytes = text.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    write_u16(stream, len as u16)?;
    write_all(stream, &bytes[..len])
}

fn effect_type_to_byte(effect_type: EffectType) -> u8 {
    match effect_type {
        EffectType::NoEffect => 0,
        EffectType::PatternGoto => 1,
        EffectType::PatternHalt => 2,
        EffectType::PatternSkip => 3,
        EffectType::SetTempo => 4,
        EffectType::Sfx => 5,
        EffectType::SetEnvelope => 6,
        EffectType::SetTimbre => 7,
        EffectType::SetPanning => 8,
        EffectType::SetSweep => 9,
        EffectType::DelayedCut => 10,
        EffectType::DelayedNote => 11,
        EffectType::Lock => 12,
        EffectType::Arpeggio => 13,
        EffectType::PitchUp => 14,
        EffectType::PitchDown => 15,
        EffectType::AutoPortamento => 16,
        EffectType::Vibrato => 17,
        EffectType::VibratoDelay => 18,
        EffectType::Tuning => 19,
        EffectType::NoteSlideUp => 20,
        EffectType::NoteSlideDown => 21,
        EffectType::SetGlobalVolume => 22,
    }
}

fn effect_type_from_byte(byte: u8) -> EffectType {
    match byte {
        1 => EffectType::PatternGoto,
        2 => EffectType::PatternHalt,
        3 => EffectType::PatternSkip,
        4 => EffectType::SetTempo,
        5 => EffectType::Sfx,
        6 => EffectType::SetEnvelope,
        7 => EffectType::SetTimbre,
        8 => EffectType::SetPanning,
        9 => EffectType::SetSweep,
        10 => EffectType::DelayedCut,
        11 => EffectType::DelayedNote,
        12 => EffectType::Lock,
        13 => EffectType::Arpeggio,
        14 => EffectType::PitchUp,
        15 => EffectType::PitchDown,
        16 => EffectType::AutoPortamento,
        17 => EffectType::Vibrato,
        18 => EffectType::VibratoDelay,
        19 => EffectType::Tuning,
        20 => EffectType::NoteSlideUp,
        21 => EffectType::NoteSlideDown,
        22 => EffectType::SetGlobalVolume,
        // effects from newer minor revisions play as no-ops
        _ => EffectType::NoEffect,
    }
}

fn write_sequence<W: Write>(stream: &mut W, seq: &Sequence) -> Result<(), FormatError> {
    write_u16(stream, seq.data().len() as u16)?;
    match seq.loop_index() {
        Some(index) => {
            write_u8(stream, 1)?;
            write_u8(stream, index)?;
        }
        None => {
            write_u8(stream, 0)?;
            write_u8(stream, 0)?;
        }
    }
    write_all(stream, seq.data())
}

fn write_row<W: Write>(stream: &mut W, index: usize, row: &TrackRow) -> Result<(), FormatError> {
    write_u8(stream, index as u8)?;
    write_u8(stream, row.note.map_or(0, |n| n + 1))?;
    write_u8(stream, row.instrument.map_or(0, |i| i + 1))?;
    for effect in &row.effects {
        write_u8(stream, effect_type_to_byte(effect.effect_type))?;
        write_u8(stream, effect.param)?;
    }
    Ok(())
}

fn serialize_instruments(buf: &mut Vec<u8>, module: &Module) -> Result<(), FormatError> {
    let table = module.instrument_table();
    write_u16(buf, table.len() as u16)?;
    for (id, instrument) in table.iter() {
        write_u8(buf, id)?;
        write_string(buf, instrument.name())?;
        write_u8(buf, instrument.channel() as u8)?;
        match instrument.envelope() {
            Some(envelope) => {
                write_u8(buf, 1)?;
                write_u8(buf, envelope)?;
            }
            None => {
                write_u8(buf, 0)?;
                write_u8(buf, 0)?;
            }
        }
        for parameter in 0..Instrument::SEQUENCE_COUNT {
            write_sequence(buf, instrument.sequence(parameter))?;
        }
    }
    Ok(())
}

fn serialize_waveforms(buf: &mut Vec<u8>, module: &Module) -> Result<(), FormatError> {
    let table = module.waveform_table();
    write_u16(buf, table.len() as u16)?;
    for (id, waveform) in table.iter() {
        write_u8(buf, id)?;
        write_string(buf, waveform.name())?;
        write_all(buf, waveform.data())?;
    }
    Ok(())
}

fn serialize_songs(buf: &mut Vec<u8>, module: &Module) -> Result<(), FormatError> {
    let songs = module.songs();
    write_u16(buf, songs.len() as u16)?;
    for song in songs.iter() {
        write_string(buf, song.name())?;
        write_u8(buf, song.speed())?;
        write_u8(buf, song.rows_per_beat())?;
        write_u8(buf, song.rows_per_measure())?;
        write_u8(buf, (song.patterns().length() - 1) as u8)?;

        let order = song.order();
        write_u16(buf, order.len() as u16)?;
        for row in order.rows() {
            write_all(buf, &row.0)?;
        }

        write_u16(buf, song.patterns().track_count() as u16)?;
        for ch in ChType::ALL {
            for (id, track) in song.patterns().tracks(ch) {
                write_u8(buf, ch as u8)?;
                write_u8(buf, id)?;
                write_u16(buf, track.row_count() as u16)?;
                for (index, row) in track.rows().iter().enumerate() {
                    if !row.is_empty() {
                        write_row(buf, index, row)?;
                    }
                }
            }
        }
    }
    Ok(())
}

fn write_block<W: Write>(
    stream: &mut W,
    id: [u8; 4],
    payload: &[u8],
) -> Result<(), FormatError> {
    write_all(stream, &id)?;
    write_u32(stream, payload.len() as u32)?;
    write_all(stream, payload)
}

/// Writes a module to a stream.
pub fn serialize<W: Write>(module: &Module, stream: &mut W) -> Result<(), FormatError> {
    write_all(stream, &SIGNATURE)?;
    write_u8(stream, REV_MAJOR)?;
    write_u8(stream, REV_MINOR)?;

    write_all(stream, module.title().as_bytes())?;
    write_all(stream, module.artist().as_bytes())?;
    write_all(stream, module.copyright().as_bytes())?;

    let comments = module.comments().as_bytes();
    write_u32(stream, comments.len() as u32)?;
    write_all(stream, comments)?;

    let version = module.version();
    write_u32(stream, version.major)?;
    write_u32(stream, version.minor)?;
    write_u32(stream, version.patch)?;

    let (system, framerate) = match module.system() {
        System::Dmg => (0u8, 0u16),
        System::Sgb => (1, 0),
        System::Custom(rate) => (2, rate),
    };
    write_u8(stream, system)?;
    write_u16(stream, framerate)?;

    let mut payload = Vec::new();
    serialize_instruments(&mut payload, module)?;
    write_block(stream, BLOCK_INST, &payload)?;

    payload.clear();
    serialize_waveforms(&mut payload, module)?;
    write_block(stream, BLOCK_WAVE, &payload)?;

    payload.clear();
    serialize_songs(&mut payload, module)?;
    write_block(stream, BLOCK_SONG, &payload)?;

    Ok(())
}

// ---------------------------------------------------------------- reading

fn read_exact<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<(), FormatError> {
    stream.read_exact(buf).map_err(FormatError::Read)
}

fn read_u8<R: Read>(stream: &mut R) -> Result<u8, FormatError> {
    let mut buf = [0u8; 1];
    read_exact(stream, &mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(stream: &mut R) -> Result<u16, FormatError> {
    let mut buf = [0u8; 2];
    read_exact(stream, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(stream: &mut R) -> Result<u32, FormatError> {
    let mut buf = [0u8; 4];
    read_exact(stream, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_string<R: Read>(stream: &mut R) -> Result<String, FormatError> {
    let len = read_u16(stream)? as usize;
    let mut bytes = vec![0u8; len];
    read_exact(stream, &mut bytes)?;
    String::from_utf8(bytes).map_err(|_| FormatError::Invalid)
}

fn read_sequence<R: Read>(stream: &mut R) -> Result<Sequence, FormatError> {
    let len = read_u16(stream)? as usize;
    if len > Sequence::MAX_LEN {
        return Err(FormatError::Invalid);
    }
    let has_loop = read_u8(stream)?;
    let loop_index = read_u8(stream)?;
    let mut data = vec![0u8; len];
    read_exact(stream, &mut data)?;
    let loop_index = match has_loop {
        0 => None,
        1 => {
            if loop_index as usize >= len {
                return Err(FormatError::Invalid);
            }
            Some(loop_index)
        }
        _ => return Err(FormatError::Invalid),
    };
    Ok(Sequence::new(data, loop_index))
}

/// Reads a block header, checks the id, and returns the payload bytes.
fn read_block<R: Read>(stream: &mut R, expected: [u8; 4]) -> Result<Vec<u8>, FormatError> {
    let mut id = [0u8; 4];
    read_exact(stream, &mut id)?;
    if id != expected {
        debug!(
            "expected block {:?}, found {:?}",
            String::from_utf8_lossy(&expected),
            String::from_utf8_lossy(&id)
        );
        return Err(FormatError::Invalid);
    }
    let len = read_u32(stream)? as usize;
    let mut payload = vec![0u8; len];
    read_exact(stream, &mut payload)?;
    Ok(payload)
}

fn deserialize_instruments(payload: &[u8], module: &mut Module) -> Result<(), FormatError> {
    let stream = &mut &payload[..];
    let count = read_u16(stream)?;
    for _ in 0..count {
        let id = read_u8(stream)?;
        let name = read_string(stream)?;
        let channel = read_u8(stream)?;
        let has_envelope = read_u8(stream)?;
        let envelope = read_u8(stream)?;
        let mut sequences = Vec::with_capacity(Instrument::SEQUENCE_COUNT);
        for _ in 0..Instrument::SEQUENCE_COUNT {
            sequences.push(read_sequence(stream)?);
        }

        let table = module.instrument_table_mut();
        if id as usize >= crate::data::InstrumentTable::MAX_SIZE {
            return Err(FormatError::Invalid);
        }
        if table.insert_with_id(id).is_none() {
            return Err(FormatError::DuplicateId);
        }
        let instrument = table.get_mut(id).expect("item was just inserted");
        instrument.set_name(name);
        instrument.set_channel(ChType::from_index(channel as usize).unwrap_or(ChType::Ch1));
        instrument.set_envelope(match has_envelope {
            0 => None,
            1 => Some(envelope),
            _ => return Err(FormatError::Invalid),
        });
        for (parameter, seq) in sequences.into_iter().enumerate() {
            *instrument.sequence_mut(parameter) = seq;
        }
    }
    if !stream.is_empty() {
        return Err(FormatError::Invalid);
    }
    Ok(())
}

fn deserialize_waveforms(payload: &[u8], module: &mut Module) -> Result<(), FormatError> {
    let stream = &mut &payload[..];
    let count = read_u16(stream)?;
    for _ in 0..count {
        let id = read_u8(stream)?;
        let name = read_string(stream)?;
        let mut data = [0u8; GB_WAVERAM_SIZE];
        read_exact(stream, &mut data)?;

        let table = module.waveform_table_mut();
        if id as usize >= crate::data::WaveformTable::MAX_SIZE {
            return Err(FormatError::Invalid);
        }
        if table.insert_with_id(id).is_none() {
            return Err(FormatError::DuplicateId);
        }
        let waveform = table.get_mut(id).expect("item was just inserted");
        waveform.set_name(name);
        *waveform.data_mut() = data;
    }
    if !stream.is_empty() {
        return Err(FormatError::Invalid);
    }
    Ok(())
}

fn deserialize_song(stream: &mut &[u8], song: &mut Song) -> Result<(), FormatError> {
    song.set_name(read_string(stream)?);
    song.set_speed(read_u8(stream)?);
    song.set_rows_per_beat(read_u8(stream)?);
    song.set_rows_per_measure(read_u8(stream)?);
    let pattern_length = read_u8(stream)? as usize + 1;
    song.patterns_mut().set_length(pattern_length);

    let order_count = read_u16(stream)? as usize;
    if order_count == 0 || order_count > MAX_PATTERNS {
        return Err(FormatError::Invalid);
    }
    let mut order_rows = Vec::with_capacity(order_count);
    for _ in 0..order_count {
        let mut ids = [0u8; 4];
        read_exact(stream, &mut ids)?;
        order_rows.push(OrderRow(ids));
    }
    song.order_mut().set_data(order_rows);

    let track_count = read_u16(stream)?;
    for _ in 0..track_count {
        let channel = read_u8(stream)?;
        let Some(ch) = ChType::from_index(channel as usize) else {
            return Err(FormatError::UnknownChannel);
        };
        let track_id = read_u8(stream)?;
        let row_count = read_u16(stream)?;

        let track = song.patterns_mut().track_mut(ch, track_id);
        for _ in 0..row_count {
            let index = read_u8(stream)? as usize;
            if index >= pattern_length {
                return Err(FormatError::Invalid);
            }
            let note = read_u8(stream)?;
            let instrument = read_u8(stream)?;
            let row = track.row_mut(index);
            row.note = match note {
                0 => None,
                n if n - 1 <= NOTE_CUT => Some(n - 1),
                _ => return Err(FormatError::Invalid),
            };
            row.instrument = match instrument {
                0 => None,
                n if (n - 1) < 64 => Some(n - 1),
                _ => return Err(FormatError::Invalid),
            };
            for effect in &mut row.effects {
                effect.effect_type = effect_type_from_byte(read_u8(stream)?);
                effect.param = read_u8(stream)?;
            }
        }
    }
    Ok(())
}

fn deserialize_songs(payload: &[u8], module: &mut Module) -> Result<(), FormatError> {
    let stream = &mut &payload[..];
    let count = read_u16(stream)? as usize;
    if count == 0 || count > crate::data::SongList::MAX_SIZE {
        return Err(FormatError::Invalid);
    }
    for index in 0..count {
        if index > 0 && module.songs_mut().add().is_none() {
            return Err(FormatError::Invalid);
        }
        let song = module.songs_mut().get_mut(index).expect("song was added");
        deserialize_song(stream, song)?;
    }
    if !stream.is_empty() {
        return Err(FormatError::Invalid);
    }
    Ok(())
}

/// Reads a module from a stream, replacing `module`'s contents.
pub fn deserialize<R: Read>(module: &mut Module, stream: &mut R) -> Result<(), FormatError> {
    let mut signature = [0u8; 4];
    read_exact(stream, &mut signature)?;
    if signature != SIGNATURE {
        return Err(FormatError::InvalidSignature);
    }

    let major = read_u8(stream)?;
    let minor = read_u8(stream)?;
    if major > REV_MAJOR {
        return Err(FormatError::InvalidRevision);
    }
    if major < REV_MAJOR {
        // revision 1 is the first; nothing older exists to upgrade
        return Err(FormatError::CannotUpgrade);
    }
    let _ = minor; // minor revisions are forward compatible

    module.clear();

    let mut info = [0u8; InfoStr::LEN];
    read_exact(stream, &mut info)?;
    module.set_title(InfoStr::from_bytes(info));
    read_exact(stream, &mut info)?;
    module.set_artist(InfoStr::from_bytes(info));
    read_exact(stream, &mut info)?;
    module.set_copyright(InfoStr::from_bytes(info));

    let comments_len = read_u32(stream)? as usize;
    let mut comments = vec![0u8; comments_len];
    read_exact(stream, &mut comments)?;
    module.set_comments(String::from_utf8(comments).map_err(|_| FormatError::Invalid)?);

    let version = Version {
        major: read_u32(stream)?,
        minor: read_u32(stream)?,
        patch: read_u32(stream)?,
    };
    module.set_version(version);

    let system = read_u8(stream)?;
    let framerate = read_u16(stream)?;
    module.set_system(match system {
        0 => System::Dmg,
        1 => System::Sgb,
        2 => {
            if framerate == 0 {
                return Err(FormatError::Invalid);
            }
            System::Custom(framerate)
        }
        _ => return Err(FormatError::Invalid),
    });

    let payload = read_block(stream, BLOCK_INST)?;
    deserialize_instruments(&payload, module)?;

    let payload = read_block(stream, BLOCK_WAVE)?;
    deserialize_waveforms(&payload, module)?;

    let payload = read_block(stream, BLOCK_SONG)?;
    deserialize_songs(&payload, module)?;

    Ok(())
}
