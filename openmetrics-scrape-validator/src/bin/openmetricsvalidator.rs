//! Reads one exposition from stdin and validates it once.

use std::env;
use std::io::Read;
use std::process;

use getopts::Options;
use openmetrics_validator::{ErrorLevel, Validator};
use tracing::{error, info};

fn main() {
    tracing_subscriber::fmt().with_ansi(true).with_level(true).init();

    let args: Vec<String> = env::args().collect();
    let mut opts = Options::new();
    opts.optopt(
        "",
        "error-level",
        "lowest rule category reported as a failure, `should` or `must` (default must)",
        "LEVEL",
    );
    opts.optflag("h", "help", "print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(failure) => {
            eprintln!("failed to parse command line args: {}", failure);
            process::exit(2);
        }
    };
    if matches.opt_present("help") {
        let brief = format!("Usage: {} [options] < exposition.txt", args[0]);
        print!("{}", opts.usage(&brief));
        return;
    }
    let level = match matches.opt_str("error-level") {
        None => ErrorLevel::Must,
        Some(raw) => match raw.parse::<ErrorLevel>() {
            Ok(level) => level,
            Err(err) => {
                eprintln!("{}", err);
                process::exit(2);
            }
        },
    };

    let mut input = Vec::new();
    if let Err(err) = std::io::stdin().read_to_end(&mut input) {
        error!(error = %err, "could not read stdin");
        process::exit(1);
    }

    let mut validator = Validator::new(level);
    match validator.validate(&input) {
        Ok(()) => info!("successfully validated input"),
        Err(errors) => {
            error!(error = %errors, "failed to validate input");
            process::exit(1);
        }
    }
}
