//! Order reachability analysis.
//!
//! A [`PatternRun`] walks a song's order the way the engine would, following
//! Bxx jumps and cutting visits short at Bxx/C00/Dxx rows, and records every
//! order row visited until the song halts, runs off the end of the order, or
//! revisits an order row (a loop). Compilers and exporters use the result to
//! lay out pattern data and report song length.

use crate::data::{Song, Track};
use crate::{ChType, EffectType};

/// One visited order row and how many rows of it actually play.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Visit {
    /// Index into the song's order.
    pub pattern: usize,
    /// Rows played before the pattern ends or a pattern effect cuts it off.
    pub row_count: usize,
}

/// Result of analyzing a song's pattern flow.
#[derive(Clone, Debug)]
pub struct PatternRun {
    halts: bool,
    loop_index: usize,
    visits: Vec<Visit>,
}

struct VisitScan {
    rows: usize,
    last_effect: Option<(EffectType, u8)>,
    halted: bool,
}

// Scans one track for the first Bxx/C00/Dxx, shrinking the scan window so a
// later channel can only win with an effect on a strictly earlier row. Ties
// on the same row therefore go to the earliest channel, then the earliest
// effect column.
fn visit_track(track: Option<&Track>, scan: &mut VisitScan) {
    // a missing track plays like an empty one
    let Some(track) = track else {
        return;
    };

    let limit = if scan.last_effect.is_some() {
        scan.rows - 1
    } else {
        scan.rows
    };
    for (index, row) in track.rows().iter().take(limit).enumerate() {
        for effect in &row.effects {
            match effect.effect_type {
                EffectType::PatternHalt => {
                    scan.halted = true;
                    scan.last_effect = Some((effect.effect_type, effect.param));
                    scan.rows = index + 1;
                    return;
                }
                EffectType::PatternGoto | EffectType::PatternSkip => {
                    scan.halted = false;
                    scan.last_effect = Some((effect.effect_type, effect.param));
                    scan.rows = index + 1;
                    return;
                }
                _ => {}
            }
        }
    }
}

impl PatternRun {
    pub fn new(song: &Song) -> PatternRun {
        let order = song.order();
        let patterns = song.patterns();

        let mut visits: Vec<Visit> = Vec::new();
        let mut halts = false;
        let mut loop_index = 0;

        let mut order_counter = 0usize;
        loop {
            let order_row = order.row(order_counter);

            let mut scan = VisitScan {
                rows: patterns.length(),
                last_effect: None,
                halted: false,
            };
            for ch in ChType::ALL {
                visit_track(patterns.track(ch, order_row.track(ch)), &mut scan);
            }

            visits.push(Visit {
                pattern: order_counter,
                row_count: scan.rows,
            });

            if scan.halted {
                halts = true;
                break;
            }

            let next = match scan.last_effect {
                Some((EffectType::PatternGoto, param)) => (param as usize).min(order.len() - 1),
                _ => order_counter + 1,
            };
            if next == order.len() {
                // ran off the end of the order; playback wraps to the start,
                // which is always visit 0
                break;
            }

            if let Some(found) = visits.iter().position(|visit| visit.pattern == next) {
                loop_index = found;
                break;
            }
            order_counter = next;
        }

        PatternRun {
            halts,
            loop_index,
            visits,
        }
    }

    /// True when the song stops on its own via C00.
    pub fn halts(&self) -> bool {
        self.halts
    }

    /// The visit index playback loops back to. Meaningless when the song
    /// halts.
    pub fn loop_index(&self) -> usize {
        self.loop_index
    }

    /// Every order row visited, in playback order. Each appears at most
    /// once.
    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }
}
