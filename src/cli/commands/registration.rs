use clap::{Arg, Command};

use crate::verifier::{
    DEFAULT_CODE_LENGTH, DEFAULT_CODE_TTL_SECONDS, DEFAULT_SWEEP_INTERVAL_SECONDS,
    MAX_CODE_LENGTH, MIN_CODE_LENGTH,
};

pub const ARG_CODE_TTL_SECONDS: &str = "code-ttl-seconds";
pub const ARG_CODE_LENGTH: &str = "code-length";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";
pub const ARG_NOTIFY_URL: &str = "notify-url";

#[derive(Debug, Clone)]
pub struct Options {
    pub code_ttl_seconds: u64,
    pub code_length: usize,
    pub sweep_interval_seconds: u64,
    pub notify_url: Option<String>,
}

impl Options {
    /// Read registration options from matches, falling back to defaults.
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        Self {
            code_ttl_seconds: matches
                .get_one::<u64>(ARG_CODE_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_CODE_TTL_SECONDS),
            code_length: matches
                .get_one::<usize>(ARG_CODE_LENGTH)
                .copied()
                .unwrap_or(DEFAULT_CODE_LENGTH),
            sweep_interval_seconds: matches
                .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECONDS),
            notify_url: matches.get_one::<String>(ARG_NOTIFY_URL).cloned(),
        }
    }
}

fn code_length_parser(value: &str) -> Result<usize, String> {
    let length = value
        .parse::<usize>()
        .map_err(|_| format!("invalid code length: {value}"))?;
    if (MIN_CODE_LENGTH..=MAX_CODE_LENGTH).contains(&length) {
        Ok(length)
    } else {
        Err(format!(
            "code length must be between {MIN_CODE_LENGTH} and {MAX_CODE_LENGTH}"
        ))
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CODE_TTL_SECONDS)
                .long(ARG_CODE_TTL_SECONDS)
                .help("Verification code lifetime in seconds")
                .env("VOUCH_CODE_TTL_SECONDS")
                .default_value("180")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_CODE_LENGTH)
                .long(ARG_CODE_LENGTH)
                .help("Number of digits in a verification code")
                .env("VOUCH_CODE_LENGTH")
                .default_value("6")
                .value_parser(code_length_parser),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between purges of expired pending registrations")
                .env("VOUCH_SWEEP_INTERVAL_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_NOTIFY_URL)
                .long(ARG_NOTIFY_URL)
                .help("Webhook that delivers verification emails")
                .long_help(
                    "Webhook that delivers verification emails. When unset, codes are only written to the log.",
                )
                .env("VOUCH_NOTIFY_URL"),
        )
}
