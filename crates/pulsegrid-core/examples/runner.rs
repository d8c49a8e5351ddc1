//! Prints the pattern run of a song in a module file.
//!
//! Usage: runner <module> [songIndex]

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::process::ExitCode;

use pulsegrid_core::data::Module;
use pulsegrid_core::pattern_run::PatternRun;

const EXIT_BAD_ARGS: u8 = 1;
const EXIT_FILE: u8 = 2;
const EXIT_BAD_MODULE: u8 = 3;

fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: runner <module> [songIndex]");
        return ExitCode::from(EXIT_BAD_ARGS);
    };
    let song_index = match args.next() {
        Some(arg) => match arg.parse::<usize>() {
            Ok(index) if index < 256 => index,
            _ => {
                eprintln!("invalid song index");
                return ExitCode::from(EXIT_BAD_ARGS);
            }
        },
        None => 0,
    };

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("file error: {err}");
            return ExitCode::from(EXIT_FILE);
        }
    };

    let mut module = Module::new();
    if let Err(err) = module.deserialize(&mut BufReader::new(file)) {
        eprintln!("module is invalid: {err}");
        return ExitCode::from(EXIT_BAD_MODULE);
    }

    let Some(song) = module.songs().get(song_index) else {
        eprintln!("module does not have song #{song_index}");
        return ExitCode::from(EXIT_BAD_ARGS);
    };

    println!(
        "\nRun information for song #{song_index} - '{}'",
        song.name()
    );
    println!("Pattern size: {} rows.\n", song.patterns().length());

    let run = PatternRun::new(song);
    let visits = run.visits();

    for (index, visit) in visits.iter().enumerate() {
        println!(
            "Visit #{index:<3}: Pattern #{:<3} Rows: {:<3}",
            visit.pattern, visit.row_count
        );
    }
    println!();

    let total_rows: usize = visits.iter().map(|v| v.row_count).sum();
    if run.halts() {
        println!("The song will halt after playing {total_rows} rows.");
    } else {
        let loop_index = run.loop_index();
        println!(
            "The song will loop at visit #{loop_index} (Pattern #{}).",
            visits[loop_index].pattern
        );
        let skipped: usize = visits[..loop_index].iter().map(|v| v.row_count).sum();
        let loop_rows = total_rows - skipped;
        if loop_rows == total_rows {
            println!("Each run will play {total_rows} rows.");
        } else {
            println!(
                "The first run will play {total_rows} rows. (following runs will play {loop_rows} rows)."
            );
        }
    }
    println!();

    ExitCode::SUCCESS
}
