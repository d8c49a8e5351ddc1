//! Song data containers.
//!
//! A [`Module`] owns everything a piece of music needs: a list of [`Song`]s,
//! an instrument table and a waveform table. Instruments and waveforms are
//! shared between all songs and are handed out as [`Arc`] handles so that an
//! engine holding one is unaffected by table edits mid-playback.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::{ChType, EffectType, Speed, System, GB_CHANNELS, GB_WAVERAM_SIZE, MAX_PATTERNS};
use crate::{SPEED_MAX, SPEED_MIN};

/// Version of the library that created a module.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    /// Version of this crate, stamped into serialized modules.
    pub fn current() -> Version {
        Version {
            major: 0,
            minor: 1,
            patch: 0,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Fixed 32-byte informational string (title, artist, copyright).
///
/// Same format as GBS metadata: NUL padded, truncated on overflow.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InfoStr {
    bytes: [u8; 32],
}

impl InfoStr {
    pub const LEN: usize = 32;

    pub fn new(text: &str) -> InfoStr {
        let mut bytes = [0u8; InfoStr::LEN];
        let src = text.as_bytes();
        let n = src.len().min(InfoStr::LEN);
        bytes[..n].copy_from_slice(&src[..n]);
        InfoStr { bytes }
    }

    pub fn from_bytes(bytes: [u8; InfoStr::LEN]) -> InfoStr {
        InfoStr { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; InfoStr::LEN] {
        &self.bytes
    }

    /// The string content up to the first NUL, lossily decoded.
    pub fn to_string_lossy(&self) -> String {
        let end = self
            .bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(InfoStr::LEN);
        String::from_utf8_lossy(&self.bytes[..end]).into_owned()
    }
}

impl Default for InfoStr {
    fn default() -> Self {
        InfoStr {
            bytes: [0; InfoStr::LEN],
        }
    }
}

impl fmt::Debug for InfoStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoStr({:?})", self.to_string_lossy())
    }
}

/// A parameter sequence: an ordered byte list with an optional loop index.
///
/// Enumerating past the end either jumps back to the loop index or stops
/// yielding values for the rest of the note.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sequence {
    data: Vec<u8>,
    loop_index: Option<u8>,
}

impl Sequence {
    /// Maximum sequence length.
    pub const MAX_LEN: usize = 256;

    pub fn new(data: Vec<u8>, loop_index: Option<u8>) -> Sequence {
        let mut seq = Sequence { data, loop_index };
        seq.data.truncate(Sequence::MAX_LEN);
        seq.validate_loop();
        seq
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut self.data
    }

    pub fn loop_index(&self) -> Option<u8> {
        self.loop_index
    }

    pub fn set_loop(&mut self, index: u8) {
        self.loop_index = Some(index);
        self.validate_loop();
    }

    pub fn remove_loop(&mut self) {
        self.loop_index = None;
    }

    pub fn resize(&mut self, len: usize) {
        self.data.resize(len.min(Sequence::MAX_LEN), 0);
        self.validate_loop();
    }

    pub fn enumerator(&self) -> SequenceEnumerator {
        SequenceEnumerator {
            seq: self.clone(),
            index: 0,
        }
    }

    fn validate_loop(&mut self) {
        if let Some(lp) = self.loop_index {
            if lp as usize >= self.data.len() {
                self.loop_index = None;
            }
        }
    }
}

/// Iterates a [`Sequence`] one value per frame.
///
/// Holds a snapshot of the sequence taken when the enumerator was created,
/// so concurrent table edits do not affect a note in flight.
#[derive(Clone, Debug)]
pub struct SequenceEnumerator {
    seq: Sequence,
    index: usize,
}

impl SequenceEnumerator {
    pub fn next(&mut self) -> Option<u8> {
        let len = self.seq.data.len();
        if self.index >= len {
            match self.seq.loop_index {
                Some(lp) if len != 0 => self.index = lp as usize,
                _ => return None,
            }
        }
        let value = self.seq.data[self.index];
        self.index += 1;
        Some(value)
    }
}

/// An instrument: an optional initial envelope plus four parameter
/// sequences played back every frame while a note is held.
///
/// The default channel is informational only; any instrument can be used on
/// any channel. For CH3 the envelope byte is a waveform id instead.
#[derive(Clone, Debug, PartialEq)]
pub struct Instrument {
    name: String,
    channel: ChType,
    envelope: Option<u8>,
    sequences: [Sequence; 4],
}

impl Instrument {
    pub const SEQUENCE_ARP: usize = 0;
    pub const SEQUENCE_PANNING: usize = 1;
    pub const SEQUENCE_PITCH: usize = 2;
    pub const SEQUENCE_TIMBRE: usize = 3;
    pub const SEQUENCE_COUNT: usize = 4;

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn channel(&self) -> ChType {
        self.channel
    }

    pub fn set_channel(&mut self, ch: ChType) {
        self.channel = ch;
    }

    pub fn envelope(&self) -> Option<u8> {
        self.envelope
    }

    pub fn set_envelope(&mut self, envelope: Option<u8>) {
        self.envelope = envelope;
    }

    pub fn sequence(&self, parameter: usize) -> &Sequence {
        &self.sequences[parameter]
    }

    pub fn sequence_mut(&mut self, parameter: usize) -> &mut Sequence {
        &mut self.sequences[parameter]
    }

    pub fn enumerate_sequence(&self, parameter: usize) -> SequenceEnumerator {
        self.sequences[parameter].enumerator()
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Instrument {
            name: String::new(),
            channel: ChType::Ch1,
            envelope: None,
            sequences: Default::default(),
        }
    }
}

/// A CH3 waveform: 32 4-bit samples packed into 16 bytes of wave RAM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Waveform {
    name: String,
    data: [u8; GB_WAVERAM_SIZE],
}

impl Waveform {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn data(&self) -> &[u8; GB_WAVERAM_SIZE] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8; GB_WAVERAM_SIZE] {
        &mut self.data
    }

    /// Fills the waveform from a string of up to 32 hex digits, one per
    /// sample, most significant nibble first. Invalid digits read as 0.
    pub fn parse_hex(&mut self, text: &str) {
        self.data = [0; GB_WAVERAM_SIZE];
        for (i, ch) in text.chars().take(GB_WAVERAM_SIZE * 2).enumerate() {
            let nibble = ch.to_digit(16).unwrap_or(0) as u8;
            let byte = &mut self.data[i / 2];
            if i % 2 == 0 {
                *byte |= nibble << 4;
            } else {
                *byte |= nibble;
            }
        }
    }
}

impl Default for Waveform {
    fn default() -> Self {
        Waveform {
            name: String::new(),
            data: [0; GB_WAVERAM_SIZE],
        }
    }
}

/// Id-keyed table of shared items (instruments or waveforms).
///
/// Ids range 0-63. Insertion without an explicit id always takes the lowest
/// unused id, so the first item inserted into an empty table has id 0.
/// Items are stored behind [`Arc`]; mutating an item that an engine still
/// references makes a private copy, and the engine keeps its snapshot until
/// the next instrument reload.
#[derive(Clone, Debug, Default)]
pub struct Table<T> {
    items: BTreeMap<u8, Arc<T>>,
    next_id: u8,
}

pub type InstrumentTable = Table<Instrument>;
pub type WaveformTable = Table<Waveform>;

impl<T: Clone + Default> Table<T> {
    pub const MAX_SIZE: usize = 64;

    pub fn new() -> Table<T> {
        Table {
            items: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The id the next call to [`Table::insert`] will use.
    pub fn next_available_id(&self) -> u8 {
        self.next_id
    }

    /// Inserts a default item at the lowest unused id, returning the id.
    /// Returns `None` when the table is full.
    pub fn insert(&mut self) -> Option<u8> {
        if self.items.len() == Self::MAX_SIZE {
            return None;
        }
        let id = self.next_id;
        self.items.insert(id, Arc::new(T::default()));
        self.update_next_id();
        Some(id)
    }

    /// Inserts a default item with the given id. Returns `None` when the id
    /// is out of range or already taken.
    pub fn insert_with_id(&mut self, id: u8) -> Option<u8> {
        if id as usize >= Self::MAX_SIZE || self.items.contains_key(&id) {
            return None;
        }
        self.items.insert(id, Arc::new(T::default()));
        if id == self.next_id {
            self.update_next_id();
        }
        Some(id)
    }

    /// Copies the item at `id` into the lowest unused id.
    pub fn duplicate(&mut self, id: u8) -> Option<u8> {
        if self.items.len() == Self::MAX_SIZE {
            return None;
        }
        let copy = T::clone(self.items.get(&id)?);
        let new_id = self.next_id;
        self.items.insert(new_id, Arc::new(copy));
        self.update_next_id();
        Some(new_id)
    }

    pub fn get(&self, id: u8) -> Option<&T> {
        self.items.get(&id).map(Arc::as_ref)
    }

    /// Mutable access to an item. If an engine holds a handle to it, the
    /// item is copied first so the in-flight handle stays consistent.
    pub fn get_mut(&mut self, id: u8) -> Option<&mut T> {
        self.items.get_mut(&id).map(Arc::make_mut)
    }

    /// A shared handle to an item, for keeping it alive across table edits.
    pub fn get_shared(&self, id: u8) -> Option<Arc<T>> {
        self.items.get(&id).cloned()
    }

    pub fn remove(&mut self, id: u8) {
        if self.items.remove(&id).is_some() && self.next_id > id {
            // always reuse the lowest available id first
            self.next_id = id;
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.next_id = 0;
    }

    /// Iterates items in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &T)> {
        self.items.iter().map(|(&id, item)| (id, item.as_ref()))
    }

    /// Ids currently in use, ascending.
    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.items.keys().copied()
    }

    fn update_next_id(&mut self) {
        if self.items.len() < Self::MAX_SIZE {
            while self.items.contains_key(&self.next_id) {
                self.next_id += 1;
            }
        }
    }
}

impl<T: PartialEq> PartialEq for Table<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|((ida, a), (idb, b))| ida == idb && a == b)
    }
}

/// One effect column entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Effect {
    pub effect_type: EffectType,
    pub param: u8,
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:02X}", self.effect_type.letter(), self.param)
    }
}

/// One row of a track: optional note, optional instrument, three effects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackRow {
    pub note: Option<u8>,
    pub instrument: Option<u8>,
    pub effects: [Effect; 3],
}

impl TrackRow {
    pub const MAX_EFFECTS: usize = 3;

    pub fn is_empty(&self) -> bool {
        self.note.is_none()
            && self.instrument.is_none()
            && self
                .effects
                .iter()
                .all(|e| e.effect_type == EffectType::NoEffect)
    }
}

/// A fixed-length column of rows for one channel.
///
/// Tracks always hold exactly the song's pattern length in rows; resizing
/// keeps the overlapping rows and zero-fills the remainder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    rows: Vec<TrackRow>,
}

impl Track {
    pub fn new(rows: usize) -> Track {
        assert!(rows >= 1 && rows <= MAX_PATTERNS, "invalid track size");
        Track {
            rows: vec![TrackRow::default(); rows],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn row(&self, index: usize) -> &TrackRow {
        &self.rows[index]
    }

    pub fn row_mut(&mut self, index: usize) -> &mut TrackRow {
        &mut self.rows[index]
    }

    pub fn rows(&self) -> &[TrackRow] {
        &self.rows
    }

    pub fn set_note(&mut self, row: usize, note: u8) {
        self.rows[row].note = Some(note);
    }

    pub fn clear_note(&mut self, row: usize) {
        self.rows[row].note = None;
    }

    pub fn set_instrument(&mut self, row: usize, id: u8) {
        self.rows[row].instrument = Some(id);
    }

    pub fn clear_instrument(&mut self, row: usize) {
        self.rows[row].instrument = None;
    }

    pub fn set_effect(&mut self, row: usize, slot: usize, effect_type: EffectType, param: u8) {
        self.rows[row].effects[slot] = Effect { effect_type, param };
    }

    pub fn clear_effect(&mut self, row: usize, slot: usize) {
        self.rows[row].effects[slot] = Effect::default();
    }

    pub fn clear(&mut self, start: usize, end: usize) {
        for row in &mut self.rows[start..end] {
            *row = TrackRow::default();
        }
    }

    pub fn resize(&mut self, rows: usize) {
        assert!(rows >= 1 && rows <= MAX_PATTERNS, "invalid track size");
        self.rows.resize(rows, TrackRow::default());
    }

    /// The number of non-empty rows, for editors and size estimates.
    pub fn row_count(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_empty()).count()
    }
}

/// One entry in a song's order: a track id for each of the four channels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrderRow(pub [u8; GB_CHANNELS]);

impl OrderRow {
    pub fn track(&self, ch: ChType) -> u8 {
        self.0[ch.index()]
    }
}

/// The sequence of order rows a song plays through.
///
/// An order always has at least one row and at most [`MAX_PATTERNS`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    rows: Vec<OrderRow>,
}

impl Order {
    pub fn new() -> Order {
        Order {
            rows: vec![OrderRow::default()],
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn row(&self, index: usize) -> OrderRow {
        self.rows[index]
    }

    pub fn rows(&self) -> &[OrderRow] {
        &self.rows
    }

    /// Replaces the whole order. Empty input leaves a single default row;
    /// excess rows are dropped.
    pub fn set_data(&mut self, mut rows: Vec<OrderRow>) {
        rows.truncate(MAX_PATTERNS);
        if rows.is_empty() {
            rows.push(OrderRow::default());
        }
        self.rows = rows;
    }

    pub fn set_row(&mut self, index: usize, row: OrderRow) {
        self.rows[index] = row;
    }

    pub fn push(&mut self, row: OrderRow) {
        assert!(self.rows.len() < MAX_PATTERNS, "order is full");
        self.rows.push(row);
    }

    pub fn insert(&mut self, index: usize, row: OrderRow) {
        assert!(self.rows.len() < MAX_PATTERNS, "order is full");
        self.rows.insert(index, row);
    }

    pub fn remove(&mut self, index: usize) {
        assert!(self.rows.len() > 1, "cannot remove the last order row");
        self.rows.remove(index);
    }

    pub fn swap(&mut self, a: usize, b: usize) {
        self.rows.swap(a, b);
    }
}

impl Default for Order {
    fn default() -> Self {
        Order::new()
    }
}

/// Owns the shared tracks of a song, keyed by channel and track id.
///
/// Multiple order rows referencing the same track id share the same track.
/// All tracks have the master's pattern length.
#[derive(Clone, Debug, PartialEq)]
pub struct PatternMaster {
    length: usize,
    tracks: [BTreeMap<u8, Track>; GB_CHANNELS],
}

impl PatternMaster {
    pub const DEFAULT_LENGTH: usize = 64;

    pub fn new(length: usize) -> PatternMaster {
        assert!(length >= 1 && length <= MAX_PATTERNS, "invalid pattern length");
        PatternMaster {
            length,
            tracks: Default::default(),
        }
    }

    /// Pattern length in rows, 1-256.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Changes the pattern length, resizing every existing track.
    pub fn set_length(&mut self, length: usize) {
        assert!(length >= 1 && length <= MAX_PATTERNS, "invalid pattern length");
        self.length = length;
        for channel in &mut self.tracks {
            for track in channel.values_mut() {
                track.resize(length);
            }
        }
    }

    /// The track for this channel and id, if it has ever been written.
    /// A missing track behaves like an empty one during playback.
    pub fn track(&self, ch: ChType, id: u8) -> Option<&Track> {
        self.tracks[ch.index()].get(&id)
    }

    /// The track for this channel and id, created empty on first access.
    pub fn track_mut(&mut self, ch: ChType, id: u8) -> &mut Track {
        let length = self.length;
        self.tracks[ch.index()]
            .entry(id)
            .or_insert_with(|| Track::new(length))
    }

    /// Iterates existing tracks of one channel in id order.
    pub fn tracks(&self, ch: ChType) -> impl Iterator<Item = (u8, &Track)> {
        self.tracks[ch.index()].iter().map(|(&id, t)| (id, t))
    }

    /// Total number of stored tracks across all channels.
    pub fn track_count(&self) -> usize {
        self.tracks.iter().map(|m| m.len()).sum()
    }
}

/// A single piece of music: tempo settings, an order and its patterns.
#[derive(Clone, Debug, PartialEq)]
pub struct Song {
    name: String,
    speed: Speed,
    rows_per_beat: u8,
    rows_per_measure: u8,
    order: Order,
    patterns: PatternMaster,
}

impl Song {
    /// Default speed, 6.0 frames per row (150 BPM at 4 rows/beat, DMG rate).
    pub const DEFAULT_SPEED: Speed = 0x60;

    pub fn new() -> Song {
        Song {
            name: String::new(),
            speed: Song::DEFAULT_SPEED,
            rows_per_beat: 4,
            rows_per_measure: 16,
            order: Order::new(),
            patterns: PatternMaster::new(PatternMaster::DEFAULT_LENGTH),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Sets the playback speed, clamped to the valid Q4.4 range.
    pub fn set_speed(&mut self, speed: Speed) {
        self.speed = speed.clamp(SPEED_MIN, SPEED_MAX);
    }

    pub fn rows_per_beat(&self) -> u8 {
        self.rows_per_beat
    }

    pub fn set_rows_per_beat(&mut self, rows: u8) {
        self.rows_per_beat = rows.max(1);
    }

    pub fn rows_per_measure(&self) -> u8 {
        self.rows_per_measure
    }

    pub fn set_rows_per_measure(&mut self, rows: u8) {
        self.rows_per_measure = rows.max(1);
    }

    pub fn order(&self) -> &Order {
        &self.order
    }

    pub fn order_mut(&mut self) -> &mut Order {
        &mut self.order
    }

    pub fn patterns(&self) -> &PatternMaster {
        &self.patterns
    }

    pub fn patterns_mut(&mut self) -> &mut PatternMaster {
        &mut self.patterns
    }
}

impl Default for Song {
    fn default() -> Self {
        Song::new()
    }
}

/// List of a module's songs. Always holds at least one song.
#[derive(Clone, Debug, PartialEq)]
pub struct SongList {
    songs: Vec<Song>,
}

impl SongList {
    pub const MAX_SIZE: usize = 256;

    pub fn new() -> SongList {
        SongList {
            songs: vec![Song::new()],
        }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn get(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Song> {
        self.songs.get_mut(index)
    }

    /// Appends a new empty song, returning its index, or `None` if full.
    pub fn add(&mut self) -> Option<usize> {
        if self.songs.len() == SongList::MAX_SIZE {
            return None;
        }
        self.songs.push(Song::new());
        Some(self.songs.len() - 1)
    }

    pub fn push(&mut self, song: Song) -> Option<usize> {
        if self.songs.len() == SongList::MAX_SIZE {
            return None;
        }
        self.songs.push(song);
        Some(self.songs.len() - 1)
    }

    pub fn remove(&mut self, index: usize) {
        assert!(self.songs.len() > 1, "cannot remove the last song");
        self.songs.remove(index);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter()
    }
}

impl Default for SongList {
    fn default() -> Self {
        SongList::new()
    }
}

/// Top-level container: songs, shared tables and header information.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Module {
    songs: SongList,
    instruments: InstrumentTable,
    waveforms: WaveformTable,

    title: InfoStr,
    artist: InfoStr,
    copyright: InfoStr,
    comments: String,

    system: System,
    version: Version,
}

impl Module {
    pub fn new() -> Module {
        Module::default()
    }

    /// Removes all data, leaving one empty song and default settings.
    pub fn clear(&mut self) {
        *self = Module::default();
    }

    pub fn songs(&self) -> &SongList {
        &self.songs
    }

    pub fn songs_mut(&mut self) -> &mut SongList {
        &mut self.songs
    }

    pub fn instrument_table(&self) -> &InstrumentTable {
        &self.instruments
    }

    pub fn instrument_table_mut(&mut self) -> &mut InstrumentTable {
        &mut self.instruments
    }

    pub fn waveform_table(&self) -> &WaveformTable {
        &self.waveforms
    }

    pub fn waveform_table_mut(&mut self) -> &mut WaveformTable {
        &mut self.waveforms
    }

    pub fn title(&self) -> &InfoStr {
        &self.title
    }

    pub fn set_title(&mut self, title: InfoStr) {
        self.title = title;
    }

    pub fn artist(&self) -> &InfoStr {
        &self.artist
    }

    pub fn set_artist(&mut self, artist: InfoStr) {
        self.artist = artist;
    }

    pub fn copyright(&self) -> &InfoStr {
        &self.copyright
    }

    pub fn set_copyright(&mut self, copyright: InfoStr) {
        self.copyright = copyright;
    }

    pub fn comments(&self) -> &str {
        &self.comments
    }

    pub fn set_comments(&mut self, comments: impl Into<String>) {
        self.comments = comments.into();
    }

    pub fn system(&self) -> System {
        self.system
    }

    pub fn set_system(&mut self, system: System) {
        self.system = system;
    }

    /// The framerate songs in this module should be played at.
    pub fn framerate(&self) -> f32 {
        self.system.framerate()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}
