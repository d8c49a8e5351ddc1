//! Pattern playback engine.
//!
//! The engine interprets one frame of music per [`Engine::step`] call. Each
//! frame it may read a new row per channel (gated by the Q4.4 [`Timer`]),
//! converts rows to [`Operation`]s, runs the four [`TrackControl`]s, and
//! emits the resulting channel state changes as APU register writes.

use std::sync::Arc;

use log::trace;

use crate::apu::{self, ApuIo};
use crate::data::{Instrument, InstrumentTable, Song, TrackRow, WaveformTable};
use crate::note::{lookup_noise_note, lookup_tone_note, NOTE_CUT, NOTE_LAST, NOTE_NOISE_LAST};
use crate::{ChType, EffectType, Speed, GB_MAX_FREQUENCY, SPEED_MAX, SPEED_MIN};

/// Pattern flow command from a Bxx or Dxx effect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatternCommand {
    #[default]
    None,
    /// Dxx: go to the next order row, starting at the given row.
    Next(u8),
    /// Bxx: jump to the given order row.
    Jump(u8),
}

/// Frequency modulation selected by a row's effects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrequencyMod {
    #[default]
    None,
    Portamento,
    PitchSlideUp,
    PitchSlideDown,
    NoteSlideUp,
    NoteSlideDown,
    Arpeggio,
}

/// A parsed row, ready to be executed.
///
/// Converting a [`TrackRow`] resolves effect precedence up front: later
/// effect columns override earlier ones of the same kind, unknown effects
/// are ignored, and a NOTE_CUT note becomes a zero-frame delayed cut.
#[derive(Clone, Debug, Default)]
pub struct Operation {
    pattern_command: PatternCommand,
    speed: u8,
    halt: bool,
    volume: Option<u8>,
    note: Option<u8>,
    instrument: Option<u8>,
    delay: u8,
    duration: Option<u8>,
    envelope: Option<u8>,
    timbre: Option<u8>,
    panning: Option<u8>,
    sweep: Option<u8>,
    modulation_type: FrequencyMod,
    modulation_param: u8,
    vibrato: Option<u8>,
    vibrato_delay: Option<u8>,
    tune: Option<u8>,
}

impl Operation {
    /// An operation with only a note column, as used for previewing.
    pub fn from_note(note: u8) -> Operation {
        let mut op = Operation::default();
        if note == NOTE_CUT {
            op.duration = Some(1);
        } else {
            op.note = Some(note);
        }
        op
    }

    pub fn pattern_command(&self) -> PatternCommand {
        self.pattern_command
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn halt(&self) -> bool {
        self.halt
    }

    pub fn volume(&self) -> Option<u8> {
        self.volume
    }

    pub fn note(&self) -> Option<u8> {
        self.note
    }

    pub fn instrument(&self) -> Option<u8> {
        self.instrument
    }

    pub fn delay(&self) -> u8 {
        self.delay
    }

    pub fn duration(&self) -> Option<u8> {
        self.duration
    }

    pub fn envelope(&self) -> Option<u8> {
        self.envelope
    }

    pub fn timbre(&self) -> Option<u8> {
        self.timbre
    }

    pub fn panning(&self) -> Option<u8> {
        self.panning
    }

    pub fn sweep(&self) -> Option<u8> {
        self.sweep
    }

    pub fn modulation_type(&self) -> FrequencyMod {
        self.modulation_type
    }

    pub fn modulation_param(&self) -> u8 {
        self.modulation_param
    }

    pub fn vibrato(&self) -> Option<u8> {
        self.vibrato
    }

    pub fn vibrato_delay(&self) -> Option<u8> {
        self.vibrato_delay
    }

    pub fn tune(&self) -> Option<u8> {
        self.tune
    }
}

impl From<&TrackRow> for Operation {
    fn from(row: &TrackRow) -> Operation {
        let mut op = Operation::default();

        // note column
        op.note = row.note;
        if op.note == Some(NOTE_CUT) {
            // NOTE_CUT behaves exactly the same as the S00 effect, which
            // also gives Sxx priority over the cut sentinel
            op.note = None;
            op.duration = Some(0);
        }

        op.instrument = row.instrument;

        for effect in &row.effects {
            let param = effect.param;
            match effect.effect_type {
                EffectType::NoEffect => {}
                EffectType::PatternGoto => op.pattern_command = PatternCommand::Jump(param),
                EffectType::PatternHalt => op.halt = true,
                EffectType::PatternSkip => op.pattern_command = PatternCommand::Next(param),
                EffectType::SetTempo => {
                    if (SPEED_MIN..=SPEED_MAX).contains(&param) {
                        op.speed = param;
                    }
                }
                EffectType::Sfx => {
                    // reserved
                }
                EffectType::SetEnvelope => op.envelope = Some(param),
                EffectType::SetTimbre => op.timbre = Some(param.min(3)),
                EffectType::SetPanning => op.panning = Some(param.min(3)),
                EffectType::SetSweep => op.sweep = Some(param),
                EffectType::DelayedCut => op.duration = Some(param),
                EffectType::DelayedNote => op.delay = param,
                EffectType::Lock => {
                    // reserved
                }
                EffectType::Arpeggio => {
                    op.modulation_type = FrequencyMod::Arpeggio;
                    op.modulation_param = param;
                }
                EffectType::PitchUp => {
                    op.modulation_type = FrequencyMod::PitchSlideUp;
                    op.modulation_param = param;
                }
                EffectType::PitchDown => {
                    op.modulation_type = FrequencyMod::PitchSlideDown;
                    op.modulation_param = param;
                }
                EffectType::AutoPortamento => {
                    op.modulation_type = FrequencyMod::Portamento;
                    op.modulation_param = param;
                }
                EffectType::Vibrato => op.vibrato = Some(param),
                EffectType::VibratoDelay => op.vibrato_delay = Some(param),
                EffectType::Tuning => op.tune = Some(param),
                EffectType::NoteSlideUp => {
                    op.modulation_type = FrequencyMod::NoteSlideUp;
                    op.modulation_param = param;
                }
                EffectType::NoteSlideDown => {
                    op.modulation_type = FrequencyMod::NoteSlideDown;
                    op.modulation_param = param;
                }
                EffectType::SetGlobalVolume => op.volume = Some(param),
            }
        }

        op
    }
}

/// Song-wide state written by any channel's effects.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalState {
    pub pattern_command: PatternCommand,
    /// New speed from Fxx, 0 when unchanged.
    pub speed: Speed,
    /// New global volume from Jxy.
    pub volume: Option<u8>,
    pub halt: bool,
}

/// Register-visible state of one channel, updated by its [`TrackControl`]
/// and diffed into APU writes each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelState {
    pub playing: bool,
    /// The channel must be retriggered this frame (new note or instrument).
    pub retrigger: bool,
    /// Envelope register value; a waveform id on CH3.
    pub envelope: u8,
    /// Duty (CH1/CH2), wave volume (CH3) or LFSR width (CH4), 0-3.
    pub timbre: u8,
    /// Panning setting, 0-3 (mute/right/left/middle).
    pub panning: u8,
    /// Frequency register value; for CH4 this is a noise note index.
    pub frequency: u16,
    /// One-shot NR10 write from the Hxx effect.
    pub sweep: Option<u8>,
}

impl ChannelState {
    pub fn new(ch: ChType) -> ChannelState {
        ChannelState {
            playing: false,
            retrigger: false,
            envelope: ChannelState::default_envelope(ch),
            timbre: ChannelState::default_timbre(ch),
            panning: ChannelState::default_panning(ch),
            frequency: 0,
            sweep: None,
        }
    }

    /// Default envelope: full volume. For CH3 this is waveform id 0.
    pub fn default_envelope(ch: ChType) -> u8 {
        match ch {
            ChType::Ch3 => 0,
            _ => 0xF0,
        }
    }

    /// Default timbre: 75% duty / 100% wave volume / 15-bit LFSR.
    pub fn default_timbre(ch: ChType) -> u8 {
        match ch {
            ChType::Ch4 => 0,
            _ => 3,
        }
    }

    /// Default panning: middle.
    pub fn default_panning(_ch: ChType) -> u8 {
        3
    }
}

/// Counts frames in Q4.4, gating row reads.
///
/// Period = 2.5 (0010.1000):
///   A   O | A   O   | A
///   0 1 2 | 0.5 1.5 | 0
///
/// At frame 0 the timer is active (counter < 1.0) and a new row is read; at
/// frame 2 it overflows and the row index advances. Every second row gets an
/// extra frame.
#[derive(Clone, Copy, Debug)]
pub struct Timer {
    period: u8,
    counter: u8,
}

impl Timer {
    const UNIT: u8 = 1 << crate::SPEED_FRACTION_BITS;

    pub fn new() -> Timer {
        Timer {
            period: 0x60,
            counter: 0,
        }
    }

    /// True when the current frame is the first of a row.
    pub fn active(&self) -> bool {
        self.counter < Timer::UNIT
    }

    pub fn period(&self) -> Speed {
        self.period
    }

    pub fn set_period(&mut self, period: Speed) {
        self.period = period.clamp(SPEED_MIN, SPEED_MAX);
    }

    pub fn reset(&mut self) {
        self.counter = 0;
    }

    /// Advances one frame. Returns true on overflow: a new row begins.
    pub fn step(&mut self) -> bool {
        self.counter += Timer::UNIT;
        if self.counter >= self.period {
            self.counter -= self.period;
            true
        } else {
            false
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Timer::new()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum ModType {
    #[default]
    None,
    Portamento,
    PitchSlide,
    NoteSlide,
    Arpeggio,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrequencyKind {
    Tone,
    Noise,
}

/// Per-channel frequency modulation: slides, arpeggio, vibrato, tuning and
/// instrument pitch/arpeggio sequences.
///
/// Tone channels work in frequency register units (0-2047); the noise
/// channel works in noise note units (0-59) so slides move in semitones,
/// and the engine converts to NR43 bytes when writing.
pub struct FrequencyControl {
    kind: FrequencyKind,
    max_frequency: i32,
    max_note: u8,

    mod_type: ModType,
    note: u8,
    tune: i8,
    frequency: i32,
    slide_amount: u8,
    slide_target: i32,
    instrument_pitch: i16,

    chord_offset1: u8,
    chord_offset2: u8,
    chord_index: usize,
    chord: [u16; 3],

    vibrato_enabled: bool,
    vibrato_delay_counter: u8,
    vibrato_counter: u8,
    vibrato_value: i8,
    vibrato_delay: u8,
    vibrato_param: u8,

    arp_sequence: Option<crate::data::SequenceEnumerator>,
    pitch_sequence: Option<crate::data::SequenceEnumerator>,
}

impl FrequencyControl {
    pub fn tone() -> FrequencyControl {
        FrequencyControl::new(FrequencyKind::Tone, GB_MAX_FREQUENCY as i32, NOTE_LAST)
    }

    pub fn noise() -> FrequencyControl {
        FrequencyControl::new(
            FrequencyKind::Noise,
            NOTE_NOISE_LAST as i32,
            NOTE_NOISE_LAST,
        )
    }

    fn new(kind: FrequencyKind, max_frequency: i32, max_note: u8) -> FrequencyControl {
        FrequencyControl {
            kind,
            max_frequency,
            max_note,
            mod_type: ModType::None,
            note: 0,
            tune: 0,
            frequency: 0,
            slide_amount: 0,
            slide_target: 0,
            instrument_pitch: 0,
            chord_offset1: 0,
            chord_offset2: 0,
            chord_index: 0,
            chord: [0; 3],
            vibrato_enabled: false,
            vibrato_delay_counter: 0,
            vibrato_counter: 0,
            vibrato_value: 0,
            vibrato_delay: 0,
            vibrato_param: 0,
            arp_sequence: None,
            pitch_sequence: None,
        }
    }

    fn note_lookup(&self, note: u8) -> u16 {
        match self.kind {
            FrequencyKind::Tone => lookup_tone_note(note),
            FrequencyKind::Noise => note.min(self.max_note) as u16,
        }
    }

    /// The effective frequency this frame: base plus tune, instrument pitch
    /// and vibrato, clamped to the channel's range.
    pub fn frequency(&self) -> u16 {
        let mut freq = self.frequency + self.tune as i32 + self.instrument_pitch as i32;
        if self.vibrato_enabled && self.vibrato_delay_counter == 0 {
            freq += self.vibrato_value as i32;
        }
        freq.clamp(0, self.max_frequency) as u16
    }

    /// Installs the instrument's arpeggio and pitch sequences, restarting
    /// them from the top.
    pub fn use_instrument(&mut self, instrument: Option<&Instrument>) {
        match instrument {
            Some(inst) => {
                self.arp_sequence = Some(inst.enumerate_sequence(Instrument::SEQUENCE_ARP));
                self.pitch_sequence = Some(inst.enumerate_sequence(Instrument::SEQUENCE_PITCH));
            }
            None => {
                self.arp_sequence = None;
                self.pitch_sequence = None;
            }
        }
    }

    pub fn reset(&mut self) {
        let kind = self.kind;
        let max_frequency = self.max_frequency;
        let max_note = self.max_note;
        *self = FrequencyControl::new(kind, max_frequency, max_note);
    }

    /// Applies a row operation. Order matters: the note sets the base,
    /// modulation effects reconfigure mode and targets, and a new note then
    /// resolves against the (possibly updated) mode.
    pub fn apply(&mut self, op: &Operation) {
        // the arpeggio chord is recalculated when a new note triggers while
        // arpeggio is active, or when the arpeggio effect is (re)activated
        let mut update_chord = false;

        let new_note = if let Some(note) = op.note() {
            if self.mod_type == ModType::NoteSlide {
                // a new note cancels a note slide
                self.mod_type = ModType::None;
            }
            self.note = note.min(self.max_note);
            true
        } else {
            false
        };
        let curr_note = self.note;

        let mod_param = op.modulation_param();
        match op.modulation_type() {
            FrequencyMod::Arpeggio => {
                if mod_param == 0 {
                    self.mod_type = ModType::None;
                } else {
                    self.mod_type = ModType::Arpeggio;
                    self.chord_offset1 = mod_param >> 4;
                    self.chord_offset2 = mod_param & 0xF;
                    update_chord = true;
                }
            }
            FrequencyMod::PitchSlideUp | FrequencyMod::PitchSlideDown => {
                if mod_param == 0 {
                    self.mod_type = ModType::None;
                } else {
                    self.mod_type = ModType::PitchSlide;
                    self.slide_target = if op.modulation_type() == FrequencyMod::PitchSlideUp {
                        self.max_frequency
                    } else {
                        0
                    };
                    self.slide_amount = mod_param;
                }
            }
            FrequencyMod::NoteSlideUp | FrequencyMod::NoteSlideDown => {
                // slide speed is 1 + 2x pitch units/frame, upper nibble is
                // the number of semitones to traverse
                self.slide_amount = 1 + 2 * (mod_param & 0xF);
                let semitones = mod_param >> 4;
                let target_note = if op.modulation_type() == FrequencyMod::NoteSlideUp {
                    self.note.saturating_add(semitones).min(self.max_note)
                } else {
                    self.note.saturating_sub(semitones)
                };
                self.mod_type = ModType::NoteSlide;
                self.slide_target = self.note_lookup(target_note) as i32;
                // the current note becomes the target even before reaching
                // it, allowing bigger slides by chaining the effect
                self.note = target_note;
            }
            FrequencyMod::Portamento => {
                if mod_param == 0 {
                    self.mod_type = ModType::None;
                } else {
                    if self.mod_type != ModType::Portamento {
                        self.slide_target = self.frequency;
                        self.mod_type = ModType::Portamento;
                    }
                    self.slide_amount = mod_param;
                }
            }
            FrequencyMod::None => {}
        }

        if let Some(param) = op.vibrato() {
            self.vibrato_param = param;
            if param & 0x0F == 0 {
                // extent is zero, disable vibrato
                self.vibrato_enabled = false;
                self.vibrato_value = 0;
            } else {
                self.vibrato_enabled = true;
                let extent = (param & 0xF) as i8;
                self.vibrato_value = if self.vibrato_value < 0 {
                    -extent
                } else {
                    extent
                };
            }
        }

        if let Some(delay) = op.vibrato_delay() {
            self.vibrato_delay = delay;
        }

        if let Some(tune) = op.tune() {
            // tune values are biased at 0x80: 0x81 is +1, 0x7F is -1
            self.tune = tune.wrapping_sub(0x80) as i8;
        }

        if new_note {
            let freq = self.note_lookup(curr_note);
            if self.mod_type == ModType::Portamento {
                // automatic portamento, slide to the new note
                self.slide_target = freq as i32;
            } else {
                if self.mod_type == ModType::Arpeggio {
                    update_chord = true;
                }
                self.frequency = freq as i32;
            }

            if self.vibrato_enabled {
                self.vibrato_delay_counter = self.vibrato_delay;
                self.vibrato_counter = 0;
                self.vibrato_value = (self.vibrato_param & 0xF) as i8;
            }

            self.instrument_pitch = 0;
        }

        if update_chord {
            self.update_chord();
        }
    }

    /// Runs one frame of modulation.
    pub fn step(&mut self) {
        if self.vibrato_enabled {
            if self.vibrato_delay_counter > 0 {
                self.vibrato_delay_counter -= 1;
            } else if self.vibrato_counter == 0 {
                self.vibrato_value = -self.vibrato_value;
                self.vibrato_counter = self.vibrato_param >> 4;
            } else {
                self.vibrato_counter -= 1;
            }
        }

        if let Some(seq) = self.pitch_sequence.as_mut() {
            if let Some(pitch) = seq.next() {
                // relative: deltas accumulate
                self.instrument_pitch += pitch as i8 as i16;
            }
        }

        let arp = self.arp_sequence.as_mut().and_then(|seq| seq.next());
        if let Some(arp) = arp {
            // absolute semitone offset from the base note
            let offset = arp as i8;
            let note = (self.note as i32 + offset as i32).clamp(0, self.max_note as i32);
            self.frequency = self.note_lookup(note as u8) as i32;
        } else {
            match self.mod_type {
                ModType::None => {}
                ModType::Portamento | ModType::PitchSlide | ModType::NoteSlide => {
                    if self.frequency != self.slide_target {
                        if self.frequency < self.slide_target {
                            self.frequency += self.slide_amount as i32;
                            if self.frequency > self.slide_target {
                                self.finish_slide();
                            }
                        } else {
                            self.frequency -= self.slide_amount as i32;
                            if self.frequency < self.slide_target {
                                self.finish_slide();
                            }
                        }
                    }
                }
                ModType::Arpeggio => {
                    self.frequency = self.chord[self.chord_index] as i32;
                    self.chord_index += 1;
                    if self.chord_index == self.chord.len() {
                        self.chord_index = 0;
                    }
                }
            }
        }
    }

    fn finish_slide(&mut self) {
        self.frequency = self.slide_target;
        if self.mod_type == ModType::NoteSlide {
            // stop sliding once the target note is reached
            self.mod_type = ModType::None;
        }
    }

    fn update_chord(&mut self) {
        // first note in the chord is always the current note, the others
        // are offset by the effect nibbles, clamped to the highest note
        self.chord[0] = self.note_lookup(self.note);
        self.chord[1] = self.note_lookup(
            self.note
                .saturating_add(self.chord_offset1)
                .min(self.max_note),
        );
        self.chord[2] = self.note_lookup(
            self.note
                .saturating_add(self.chord_offset2)
                .min(self.max_note),
        );
    }
}

/// Plays an instrument's panning and timbre sequences into channel state.
/// Arpeggio and pitch sequences are consumed by [`FrequencyControl`].
pub struct InstrumentRuntime {
    panning: crate::data::SequenceEnumerator,
    timbre: crate::data::SequenceEnumerator,
}

impl InstrumentRuntime {
    pub fn new(instrument: &Instrument) -> InstrumentRuntime {
        InstrumentRuntime {
            panning: instrument.enumerate_sequence(Instrument::SEQUENCE_PANNING),
            timbre: instrument.enumerate_sequence(Instrument::SEQUENCE_TIMBRE),
        }
    }

    pub fn step(&mut self, state: &mut ChannelState) {
        if let Some(timbre) = self.timbre.next() {
            state.timbre = timbre.min(3);
        }
        if let Some(panning) = self.panning.next() {
            state.panning = panning.min(3);
        }
    }
}

/// Per-channel row executor.
///
/// Caches the row's [`Operation`] and commits it after its Gxx delay, then
/// steps modulation and instrument playback every frame while the note
/// plays.
pub struct TrackControl {
    op: Operation,
    instrument: Option<Arc<Instrument>>,
    fc: FrequencyControl,
    ir: Option<InstrumentRuntime>,
    delay_counter: Option<u8>,
    cut_counter: Option<u8>,
    playing: bool,
    envelope: u8,
    panning: u8,
    timbre: u8,
}

impl TrackControl {
    pub fn new(ch: ChType) -> TrackControl {
        TrackControl {
            op: Operation::default(),
            instrument: None,
            fc: match ch {
                ChType::Ch4 => FrequencyControl::noise(),
                _ => FrequencyControl::tone(),
            },
            ir: None,
            delay_counter: None,
            cut_counter: None,
            playing: false,
            envelope: ChannelState::default_envelope(ch),
            panning: ChannelState::default_panning(ch),
            timbre: ChannelState::default_timbre(ch),
        }
    }

    /// Latches a row for execution. Empty rows are ignored.
    pub fn set_row(&mut self, row: &TrackRow) {
        if row.is_empty() {
            return;
        }
        self.op = Operation::from(row);
        self.delay_counter = Some(self.op.delay());
    }

    pub fn step(
        &mut self,
        instruments: &InstrumentTable,
        state: &mut ChannelState,
        global: &mut GlobalState,
    ) {
        if let Some(delay) = self.delay_counter {
            if delay == 0 {
                self.commit(instruments, state, global);
                self.delay_counter = None;
            } else {
                self.delay_counter = Some(delay - 1);
            }
        }

        if self.playing {
            if let Some(cut) = self.cut_counter {
                if cut == 0 {
                    self.playing = false;
                    self.cut_counter = None;
                } else {
                    self.cut_counter = Some(cut - 1);
                }
            }

            if let Some(ir) = self.ir.as_mut() {
                ir.step(state);
            }

            self.fc.step();
            state.frequency = self.fc.frequency();
        }

        state.playing = self.playing;
    }

    fn commit(
        &mut self,
        instruments: &InstrumentTable,
        state: &mut ChannelState,
        global: &mut GlobalState,
    ) {
        // global effects propagate to the engine
        let pcmd = self.op.pattern_command();
        if pcmd != PatternCommand::None {
            global.pattern_command = pcmd;
        }
        if self.op.speed() != 0 {
            global.speed = self.op.speed();
        }
        if let Some(volume) = self.op.volume() {
            global.volume = Some(volume);
        }
        if self.op.halt() {
            global.halt = true;
        }

        let mut restart_ir = false;

        if let Some(id) = self.op.instrument() {
            // an id with no table entry keeps the previous instrument
            if let Some(inst) = instruments.get_shared(id) {
                // the instrument's initial envelope applies on trigger; an
                // explicit Exx on the same row overrides it below
                if let Some(envelope) = inst.envelope() {
                    self.envelope = envelope;
                    state.envelope = envelope;
                }
                self.instrument = Some(inst);
                restart_ir = true;
            }
        }

        if let Some(envelope) = self.op.envelope() {
            self.envelope = envelope;
            state.envelope = envelope;
        }
        if let Some(timbre) = self.op.timbre() {
            self.timbre = timbre;
            state.timbre = timbre;
        }
        if let Some(panning) = self.op.panning() {
            self.panning = panning;
            state.panning = panning;
        }
        if let Some(sweep) = self.op.sweep() {
            state.sweep = Some(sweep);
        }

        if self.op.note().is_some() {
            restart_ir = true;
            self.playing = true;
            state.envelope = self.envelope;
            state.timbre = self.timbre;
            state.panning = self.panning;
            self.cut_counter = None;
        }
        // the channel retriggers when a note or instrument is set
        state.retrigger = restart_ir;

        self.cut_counter = self.op.duration();

        if restart_ir {
            if let Some(inst) = self.instrument.as_deref() {
                self.ir = Some(InstrumentRuntime::new(inst));
                self.fc.use_instrument(Some(inst));
            }
        }

        self.fc.apply(&self.op);
    }

    pub fn reset(&mut self, ch: ChType) {
        *self = TrackControl::new(ch);
    }
}

/// Everything outside the engine that a frame step needs: the APU's
/// register file and the module's shared tables.
pub struct RuntimeContext<'a> {
    pub apu: &'a mut dyn ApuIo,
    pub instruments: &'a InstrumentTable,
    pub waveforms: &'a WaveformTable,
}

impl<'a> RuntimeContext<'a> {
    pub fn new(
        apu: &'a mut dyn ApuIo,
        instruments: &'a InstrumentTable,
        waveforms: &'a WaveformTable,
    ) -> RuntimeContext<'a> {
        RuntimeContext {
            apu,
            instruments,
            waveforms,
        }
    }
}

/// Result of stepping the engine one frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct Frame {
    /// Playback has stopped (C00 or never started).
    pub halted: bool,
    /// This frame started a new row.
    pub new_row: bool,
    pub order: usize,
    pub row: usize,
    pub speed: Speed,
}

/// Per-channel register shadow for diffing state into APU writes.
#[derive(Clone, Copy)]
struct ChannelShadow {
    state: ChannelState,
    /// Nothing has been written yet; the first diff writes everything.
    initialized: bool,
}

/// Drives a song through the APU, one frame at a time.
pub struct Engine {
    song: Option<Arc<Song>>,
    timer: Timer,
    order_index: usize,
    row_index: usize,
    playing: bool,

    track_controls: [TrackControl; 4],
    states: [ChannelState; 4],
    shadows: [ChannelShadow; 4],
    global: GlobalState,
    /// Engine-owned copy of NR51 panning bits.
    nr51: u8,
}

impl Engine {
    pub fn new() -> Engine {
        Engine {
            song: None,
            timer: Timer::new(),
            order_index: 0,
            row_index: 0,
            playing: false,
            track_controls: [
                TrackControl::new(ChType::Ch1),
                TrackControl::new(ChType::Ch2),
                TrackControl::new(ChType::Ch3),
                TrackControl::new(ChType::Ch4),
            ],
            states: [
                ChannelState::new(ChType::Ch1),
                ChannelState::new(ChType::Ch2),
                ChannelState::new(ChType::Ch3),
                ChannelState::new(ChType::Ch4),
            ],
            shadows: [
                ChannelShadow {
                    state: ChannelState::new(ChType::Ch1),
                    initialized: false,
                },
                ChannelShadow {
                    state: ChannelState::new(ChType::Ch2),
                    initialized: false,
                },
                ChannelShadow {
                    state: ChannelState::new(ChType::Ch3),
                    initialized: false,
                },
                ChannelShadow {
                    state: ChannelState::new(ChType::Ch4),
                    initialized: false,
                },
            ],
            global: GlobalState::default(),
            nr51: 0,
        }
    }

    /// Starts playing a song from the top.
    pub fn play(&mut self, song: Arc<Song>) {
        self.play_at(song, 0, 0);
    }

    /// Starts playing a song at the given order row and pattern row.
    /// Out-of-range positions clamp to the song's bounds.
    pub fn play_at(&mut self, song: Arc<Song>, order: usize, row: usize) {
        self.order_index = order.min(song.order().len() - 1);
        self.row_index = row.min(song.patterns().length() - 1);
        self.timer.set_period(song.speed());
        self.timer.reset();
        for (i, ch) in ChType::ALL.iter().enumerate() {
            self.track_controls[i].reset(*ch);
            self.states[i] = ChannelState::new(*ch);
            self.shadows[i] = ChannelShadow {
                state: ChannelState::new(*ch),
                initialized: false,
            };
        }
        self.global = GlobalState::default();
        self.nr51 = 0;
        self.song = Some(song);
        self.playing = true;
    }

    /// Stops playback. Channels are silenced on the next step.
    pub fn halt(&mut self) {
        self.playing = false;
    }

    pub fn playing(&self) -> bool {
        self.playing
    }

    /// Current position as (order index, row index) while playing.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.playing.then_some((self.order_index, self.row_index))
    }

    pub fn speed(&self) -> Speed {
        self.timer.period()
    }

    /// The register-visible state of a channel, for tests and visualizers.
    pub fn channel_state(&self, ch: ChType) -> &ChannelState {
        &self.states[ch.index()]
    }

    /// Runs one frame of the song, emitting register writes to the APU.
    /// Call once per frame, before stepping the APU to the frame's end.
    pub fn step(&mut self, rc: &mut RuntimeContext<'_>) -> Frame {
        let mut frame = Frame {
            halted: !self.playing,
            new_row: false,
            order: self.order_index,
            row: self.row_index,
            speed: self.timer.period(),
        };

        let Some(song) = self.song.clone() else {
            return frame;
        };
        if !self.playing {
            return frame;
        }

        if self.timer.active() {
            frame.new_row = true;
            let order_row = song.order().row(self.order_index);
            for (i, ch) in ChType::ALL.iter().enumerate() {
                // a track id with no track data is equivalent to an empty
                // track
                if let Some(track) = song.patterns().track(*ch, order_row.track(*ch)) {
                    self.track_controls[i].set_row(track.row(self.row_index));
                }
            }
        }

        for i in 0..4 {
            self.track_controls[i].step(rc.instruments, &mut self.states[i], &mut self.global);
        }

        if self.global.halt {
            trace!("halt at order {} row {}", self.order_index, self.row_index);
            self.playing = false;
            self.silence(rc);
            frame.halted = true;
            return frame;
        }

        if self.global.speed != 0 {
            self.timer.set_period(self.global.speed);
            self.global.speed = 0;
            frame.speed = self.timer.period();
        }

        if let Some(volume) = self.global.volume.take() {
            let left = (volume >> 4).min(7);
            let right = (volume & 0xF).min(7);
            rc.apu.write_register(apu::REG_NR50, (left << 4) | right);
        }

        for i in 0..4 {
            self.write_channel(rc, i);
        }

        if self.timer.step() {
            self.advance_row(&song);
        }

        frame
    }

    fn advance_row(&mut self, song: &Song) {
        let order_len = song.order().len();
        let pattern_len = song.patterns().length();
        match std::mem::take(&mut self.global.pattern_command) {
            PatternCommand::None => {
                self.row_index += 1;
                if self.row_index == pattern_len {
                    self.row_index = 0;
                    self.order_index += 1;
                    if self.order_index == order_len {
                        self.order_index = 0;
                    }
                }
            }
            PatternCommand::Next(row) => {
                self.order_index += 1;
                if self.order_index == order_len {
                    self.order_index = 0;
                }
                self.row_index = (row as usize).min(pattern_len - 1);
            }
            PatternCommand::Jump(order) => {
                self.order_index = (order as usize).min(order_len - 1);
                self.row_index = 0;
            }
        }
    }

    /// Silences every channel by turning its DAC off.
    fn silence(&mut self, rc: &mut RuntimeContext<'_>) {
        rc.apu.write_register(apu::REG_NR12, 0);
        rc.apu.write_register(apu::REG_NR22, 0);
        rc.apu.write_register(apu::REG_NR30, 0);
        rc.apu.write_register(apu::REG_NR42, 0);
        for shadow in &mut self.shadows {
            shadow.state.playing = false;
        }
    }

    /// Diffs one channel's state against what the APU last saw and writes
    /// the changed registers.
    fn write_channel(&mut self, rc: &mut RuntimeContext<'_>, index: usize) {
        let ch = ChType::ALL[index];
        let state = &mut self.states[index];
        let shadow = &mut self.shadows[index];
        let force = !shadow.initialized;

        if !state.playing {
            if shadow.state.playing || force {
                // silence by disabling the DAC
                match ch {
                    ChType::Ch1 => rc.apu.write_register(apu::REG_NR12, 0),
                    ChType::Ch2 => rc.apu.write_register(apu::REG_NR22, 0),
                    ChType::Ch3 => rc.apu.write_register(apu::REG_NR30, 0),
                    ChType::Ch4 => rc.apu.write_register(apu::REG_NR42, 0),
                }
            }
            state.retrigger = false;
            shadow.state = *state;
            shadow.initialized = true;
            return;
        }

        let was_playing = shadow.state.playing;
        let mut retrigger = state.retrigger;

        // envelope: NRx2 for envelope channels, a waveform swap for CH3
        if state.envelope != shadow.state.envelope || !was_playing || force {
            match ch {
                ChType::Ch3 => {
                    if let Some(waveform) = rc.waveforms.get(state.envelope) {
                        // wave RAM is only writable with the DAC off
                        rc.apu.write_register(apu::REG_NR30, 0);
                        for (i, &byte) in waveform.data().iter().enumerate() {
                            rc.apu.write_register(apu::REG_WAVERAM + i as u8, byte);
                        }
                        rc.apu.write_register(apu::REG_NR30, 0x80);
                        retrigger = true;
                    }
                }
                ChType::Ch1 => {
                    rc.apu.write_register(apu::REG_NR12, state.envelope);
                    retrigger = true;
                }
                ChType::Ch2 => {
                    rc.apu.write_register(apu::REG_NR22, state.envelope);
                    retrigger = true;
                }
                ChType::Ch4 => {
                    rc.apu.write_register(apu::REG_NR42, state.envelope);
                    retrigger = true;
                }
            }
        }

        let mut noise_dirty = false;
        if state.timbre != shadow.state.timbre || !was_playing || force {
            match ch {
                ChType::Ch1 => rc.apu.write_register(apu::REG_NR11, state.timbre << 6),
                ChType::Ch2 => rc.apu.write_register(apu::REG_NR21, state.timbre << 6),
                ChType::Ch3 => {
                    // timbre 0-3 maps to mute/25%/50%/100%
                    const NR32_VOLUMES: [u8; 4] = [0x00, 0x60, 0x40, 0x20];
                    rc.apu
                        .write_register(apu::REG_NR32, NR32_VOLUMES[(state.timbre & 3) as usize]);
                }
                ChType::Ch4 => {
                    // the width bit lives in NR43, written with the frequency
                    noise_dirty = true;
                }
            }
        }

        if state.panning != shadow.state.panning || force {
            let shift = index as u8;
            let mask = !(0x11 << shift);
            let bits = match state.panning & 3 {
                0 => 0x00,
                1 => 0x01,
                2 => 0x10,
                _ => 0x11,
            };
            let nr51 = (self.nr51 & mask) | (bits << shift);
            if nr51 != self.nr51 || force {
                self.nr51 = nr51;
                rc.apu.write_register(apu::REG_NR51, nr51);
            }
        }

        if let Some(sweep) = state.sweep.take() {
            rc.apu.write_register(apu::REG_NR10, sweep);
            retrigger = true;
        }

        // frequency, with the trigger bit on retrigger
        let freq_changed = state.frequency != shadow.state.frequency;
        match ch {
            ChType::Ch4 => {
                if freq_changed || noise_dirty || retrigger || force {
                    let nr43 = (lookup_noise_note(state.frequency as u8) & !0x08)
                        | ((state.timbre & 1) << 3);
                    rc.apu.write_register(apu::REG_NR43, nr43);
                }
                if retrigger {
                    rc.apu.write_register(apu::REG_NR44, 0x80);
                }
            }
            _ => {
                if freq_changed || retrigger || force {
                    let (lsb_reg, msb_reg) = match ch {
                        ChType::Ch1 => (apu::REG_NR13, apu::REG_NR14),
                        ChType::Ch2 => (apu::REG_NR23, apu::REG_NR24),
                        _ => (apu::REG_NR33, apu::REG_NR34),
                    };
                    let freq = state.frequency.min(GB_MAX_FREQUENCY);
                    rc.apu.write_register(lsb_reg, (freq & 0xFF) as u8);
                    let msb = ((freq >> 8) & 0x7) as u8;
                    rc.apu
                        .write_register(msb_reg, if retrigger { 0x80 | msb } else { msb });
                }
            }
        }

        state.retrigger = false;
        shadow.state = *state;
        shadow.initialized = true;
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}
