use std::env;
use std::process;
use std::time::Duration;

use getopts::Options;
use hyper::Uri;
use openmetrics_scrape_validator::ScrapeLoopBuilder;
use openmetrics_validator::ErrorLevel;

const EXIT_VALIDATION_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    tracing_subscriber::fmt().with_ansi(true).with_level(true).init();

    let args: Vec<String> = env::args().collect();
    let program = &args[0];
    let opts = opts();

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(failure) => {
            eprintln!("failed to parse command line args: {}", failure);
            print_usage(program, &opts);
            process::exit(EXIT_USAGE);
        }
    };

    if matches.opt_present("help") {
        print_usage(program, &opts);
        return;
    }

    let Some(endpoint) = matches.opt_str("endpoint") else {
        print_usage(program, &opts);
        process::exit(EXIT_USAGE);
    };
    let endpoint = match endpoint.parse::<Uri>() {
        Ok(endpoint) => endpoint,
        Err(err) => usage_error(&format!("invalid endpoint {:?}: {}", endpoint, err)),
    };

    let interval = opt_duration(&matches, "scrape-interval", Duration::from_secs(10));
    let timeout = opt_duration(&matches, "scrape-timeout", Duration::from_secs(8));
    let level = match matches.opt_str("error-level") {
        None => ErrorLevel::Should,
        Some(raw) => match raw.parse::<ErrorLevel>() {
            Ok(level) => level,
            Err(err) => usage_error(&err.to_string()),
        },
    };

    let mut builder = ScrapeLoopBuilder::new()
        .with_scrape_interval(interval)
        .with_scrape_timeout(timeout)
        .with_error_level(level);
    if let Some(raw) = matches.opt_str("kill-after") {
        match parse_duration(&raw) {
            Ok(kill_after) => builder = builder.with_kill_after(kill_after),
            Err(err) => usage_error(&err),
        }
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to create runtime: {}", err);
            process::exit(EXIT_VALIDATION_FAILURE);
        }
    };

    let clean = runtime.block_on(async move {
        let mut scrape_loop = builder.build(endpoint);
        scrape_loop.run().await
    });

    if !clean {
        process::exit(EXIT_VALIDATION_FAILURE);
    }
}

fn opts() -> Options {
    let mut opts = Options::new();
    opts.optopt("", "endpoint", "endpoint to scrape and validate, required", "URL");
    opts.optopt("", "scrape-interval", "time between scrapes (default 10s)", "DUR");
    opts.optopt("", "scrape-timeout", "timeout for each scrape (default 8s)", "DUR");
    opts.optopt(
        "",
        "error-level",
        "lowest rule category reported as a failure, `should` or `must` (default should)",
        "LEVEL",
    );
    opts.optopt("", "kill-after", "stop scraping and exit after this long", "DUR");
    opts.optflag("h", "help", "print this help menu");
    opts
}

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {} --endpoint URL [options]", program);
    print!("{}", opts.usage(&brief));
}

fn usage_error(message: &str) -> ! {
    eprintln!("{}", message);
    process::exit(EXIT_USAGE);
}

fn opt_duration(matches: &getopts::Matches, name: &str, default: Duration) -> Duration {
    match matches.opt_str(name) {
        None => default,
        Some(raw) => match parse_duration(&raw) {
            Ok(duration) => duration,
            Err(err) => usage_error(&format!("invalid --{}: {}", name, err)),
        },
    }
}

/// Parses durations like `500ms`, `10s`, `2m`, or `1h`; a bare number is
/// taken as seconds.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    let (digits, multiplier_ms) = if let Some(rest) = raw.strip_suffix("ms") {
        (rest, 1u64)
    } else if let Some(rest) = raw.strip_suffix('s') {
        (rest, 1_000)
    } else if let Some(rest) = raw.strip_suffix('m') {
        (rest, 60_000)
    } else if let Some(rest) = raw.strip_suffix('h') {
        (rest, 3_600_000)
    } else {
        (raw, 1_000)
    };
    digits
        .parse::<u64>()
        .map(|n| Duration::from_millis(n * multiplier_ms))
        .map_err(|_| format!("invalid duration {:?}", raw))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::parse_duration;

    #[test]
    fn test_parse_duration_known_cases() {
        let cases = &[
            ("500ms", Duration::from_millis(500)),
            ("8s", Duration::from_secs(8)),
            ("10", Duration::from_secs(10)),
            ("2m", Duration::from_secs(120)),
            ("1h", Duration::from_secs(3600)),
        ];
        for (input, expected) in cases {
            assert_eq!(parse_duration(input).as_ref(), Ok(expected), "input {:?}", input);
        }

        for input in &["", "s", "ten", "1.5s", "-1s"] {
            assert!(parse_duration(input).is_err(), "expected {:?} to be rejected", input);
        }
    }
}
