//! Frame pacing.
//!
//! A [`Synth`] owns the samplerate/framerate bookkeeping: it knows how many
//! clock cycles one engine frame spans (including the fractional remainder
//! carried between frames) and drives the APU to each frame boundary.

use crate::apu::{self, Apu};
use crate::GB_CLOCK_SPEED;

pub struct Synth<'a, A: Apu> {
    apu: &'a mut A,
    samplerate: u32,
    framerate: f32,
    cycles_per_frame: f32,
    cycle_offset: f32,
    frame_size: usize,
    resize_required: bool,
}

impl<'a, A: Apu> Synth<'a, A> {
    pub fn new(apu: &'a mut A, samplerate: u32, framerate: f32) -> Synth<'a, A> {
        let mut synth = Synth {
            apu,
            samplerate,
            framerate,
            cycles_per_frame: GB_CLOCK_SPEED as f32 / framerate,
            cycle_offset: 0.0,
            frame_size: 0,
            resize_required: true,
        };
        synth.setup_buffers();
        synth
    }

    /// Samples generated per frame, an upper bound for read buffers.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn samplerate(&self) -> u32 {
        self.samplerate
    }

    pub fn set_samplerate(&mut self, samplerate: u32) {
        if self.samplerate != samplerate {
            self.samplerate = samplerate;
            self.resize_required = true;
        }
    }

    pub fn framerate(&self) -> f32 {
        self.framerate
    }

    pub fn set_framerate(&mut self, framerate: f32) {
        if self.framerate != framerate {
            self.framerate = framerate;
            self.resize_required = true;
        }
    }

    pub fn apu(&mut self) -> &mut A {
        self.apu
    }

    /// Runs the APU to the end of the current frame. The fractional cycle
    /// remainder carries into the next frame so long runs stay on rate.
    ///
    /// The frame must have been opened with [`Apu::begin_frame`] before any
    /// engine register writes.
    pub fn run(&mut self) {
        let cycles = self.cycles_per_frame + self.cycle_offset;
        let whole = cycles.floor();
        self.cycle_offset = cycles - whole;
        self.apu.end_frame_at(whole as u32);
    }

    /// Resets the APU and powers it on with both terminals at max volume.
    pub fn reset(&mut self) {
        self.apu.reset();
        self.cycle_offset = 0.0;
        self.apu.write_register(apu::REG_NR52, 0x80);
        self.apu.write_register(apu::REG_NR50, 0x77);
    }

    /// Applies pending samplerate/framerate changes, resizing the APU's
    /// buffer and resetting it.
    pub fn setup_buffers(&mut self) {
        if self.resize_required {
            self.cycles_per_frame = GB_CLOCK_SPEED as f32 / self.framerate;
            self.frame_size = (self.samplerate as f32 / self.framerate) as usize + 1;
            self.apu.set_samplerate(self.samplerate);
            self.apu.set_buffer(self.frame_size);
            self.reset();
            self.resize_required = false;
        }
    }
}
