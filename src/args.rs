/// Startup argument checks: `<processName> <killMinutes> <checkMinutes>`.
///
/// `validate_args` decides whether the raw triple is actionable; `parse_args`
/// turns it into a `MonitorConfig`. Both are pure apart from the process-table
/// lookup in validation.
use crate::config::{MonitorConfig, MonitorDefaults};
use crate::process::ProcessTable;

/// Number of positional arguments the watchdog takes.
pub const EXPECTED_ARGS: usize = 3;

/// Validation and parse failures. All are fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgsError {
    /// At least one argument is an empty string.
    NullOrEmpty,
    /// Not exactly three arguments.
    WrongArgumentCount { found: usize },
    /// No running process carries the requested name.
    NoSuchProcess { name: String },
    /// A time argument contains something other than ASCII digits, or does not fit in u32.
    NotNumeric { value: String },
    /// The kill threshold is smaller than the check interval.
    ThresholdOrdering { kill_minutes: u32, check_minutes: u32 },
    /// Neither time argument parses as an integer.
    Format,
}

impl ArgsError {
    /// Process exit code for this failure. Each kind gets its own code,
    /// clear of clap's usage-error code 2.
    pub fn exit_code(&self) -> u8 {
        match self {
            ArgsError::NullOrEmpty => 10,
            ArgsError::WrongArgumentCount { .. } => 11,
            ArgsError::NoSuchProcess { .. } => 12,
            ArgsError::NotNumeric { .. } => 13,
            ArgsError::ThresholdOrdering { .. } => 14,
            ArgsError::Format => 15,
        }
    }
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgsError::NullOrEmpty => write!(f, "some arguments are empty"),
            ArgsError::WrongArgumentCount { found } => write!(
                f,
                "expected {} arguments (processName killMinutes checkMinutes), got {}",
                EXPECTED_ARGS, found
            ),
            ArgsError::NoSuchProcess { name } => {
                write!(f, "no running process named \"{}\"", name)
            }
            ArgsError::NotNumeric { value } => {
                write!(f, "\"{}\" is not a valid number of minutes", value)
            }
            ArgsError::ThresholdOrdering {
                kill_minutes,
                check_minutes,
            } => write!(
                f,
                "kill threshold ({} min) is smaller than the check interval ({} min)",
                kill_minutes, check_minutes
            ),
            ArgsError::Format => write!(f, "neither time argument is an integer"),
        }
    }
}

impl std::error::Error for ArgsError {}

/// Which time argument fell back to its default during parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeField {
    Kill,
    Check,
}

impl std::fmt::Display for TimeField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeField::Kill => write!(f, "killMinutes"),
            TimeField::Check => write!(f, "checkMinutes"),
        }
    }
}

/// Result of `parse_args`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedArgs {
    /// Both time arguments parsed.
    Complete(MonitorConfig),
    /// One time argument did not parse; `defaulted` kept its default value.
    Partial {
        config: MonitorConfig,
        defaulted: TimeField,
    },
}

impl ParsedArgs {
    pub fn into_config(self) -> MonitorConfig {
        match self {
            ParsedArgs::Complete(config) => config,
            ParsedArgs::Partial { config, .. } => config,
        }
    }
}

fn is_digits_only(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

fn minutes(value: &str) -> Result<u32, ArgsError> {
    if !is_digits_only(value) {
        return Err(ArgsError::NotNumeric {
            value: value.to_string(),
        });
    }
    value.parse().map_err(|_| ArgsError::NotNumeric {
        value: value.to_string(),
    })
}

/// Check that `args` is a usable `processName killMinutes checkMinutes` triple.
///
/// Checks run in a fixed order and the first failure is returned:
/// empty argument, argument count, process existence, digits-only time values,
/// then `kill >= check`.
pub fn validate_args<S: AsRef<str>>(args: &[S], table: &dyn ProcessTable) -> Result<(), ArgsError> {
    if args.iter().any(|a| a.as_ref().is_empty()) {
        return Err(ArgsError::NullOrEmpty);
    }
    if args.len() != EXPECTED_ARGS {
        return Err(ArgsError::WrongArgumentCount { found: args.len() });
    }

    let name = args[0].as_ref();
    let running = match table.processes_named(name) {
        Ok(found) => !found.is_empty(),
        Err(e) => {
            tracing::warn!(error = %e, name, "process enumeration failed during validation");
            false
        }
    };
    if !running {
        return Err(ArgsError::NoSuchProcess {
            name: name.to_string(),
        });
    }

    let kill_minutes = minutes(args[1].as_ref())?;
    let check_minutes = minutes(args[2].as_ref())?;
    if kill_minutes < check_minutes {
        return Err(ArgsError::ThresholdOrdering {
            kill_minutes,
            check_minutes,
        });
    }

    Ok(())
}

/// Parse the time arguments of a triple into a `MonitorConfig`.
///
/// Only fails when *both* time values are unparsable. If exactly one fails,
/// the result is `ParsedArgs::Partial` and that field keeps its value from
/// `defaults`.
pub fn parse_args<S: AsRef<str>>(args: &[S], defaults: &MonitorDefaults) -> Result<ParsedArgs, ArgsError> {
    if args.len() < EXPECTED_ARGS {
        return Err(ArgsError::WrongArgumentCount { found: args.len() });
    }

    let fallback = defaults.fallback_for(args[0].as_ref());
    let kill = args[1].as_ref().parse::<u32>().ok();
    let check = args[2].as_ref().parse::<u32>().ok();

    match (kill, check) {
        (Some(kill), Some(check)) => Ok(ParsedArgs::Complete(
            fallback.with_kill_minutes(kill).with_check_minutes(check),
        )),
        (Some(kill), None) => Ok(ParsedArgs::Partial {
            config: fallback.with_kill_minutes(kill),
            defaulted: TimeField::Check,
        }),
        (None, Some(check)) => Ok(ParsedArgs::Partial {
            config: fallback.with_check_minutes(check),
            defaulted: TimeField::Kill,
        }),
        (None, None) => Err(ArgsError::Format),
    }
}
