//! Actuator commands and their wire tokens.
//!
//! The motor controller understands three short text tokens written to a
//! single characteristic:
//!
//! | Command | Token |
//! |---------|-------|
//! | forward | `FORWARD:<seconds>` |
//! | reverse | `REVERSE:<seconds>` |
//! | stop    | `STOP` |
//!
//! The controller stops by itself once a timed motion elapses.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest motion the controller accepts in one command.
pub const MAX_MOTION_SECS: f64 = 30.0;

/// One motion intent, queued once and consumed once by the relay worker.
///
/// The variants are public; [`forward`](Self::forward) and
/// [`reverse`](Self::reverse) validate on construction, and
/// [`to_payload`](Self::to_payload) validates again before encoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuatorCommand {
    /// Drive forward for the given number of seconds.
    Forward(f64),
    /// Drive backward for the given number of seconds.
    Reverse(f64),
    /// Stop immediately.
    Stop,
}

/// Error parsing or building an [`ActuatorCommand`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandParseError {
    /// Keyword is not FORWARD, REVERSE or STOP.
    #[error("unknown actuator command: {0:?}")]
    UnknownCommand(String),

    /// FORWARD/REVERSE without a `:<seconds>` suffix.
    #[error("missing duration for {0}")]
    MissingDuration(&'static str),

    /// Duration is not a number.
    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    /// Duration is not in (0, MAX_MOTION_SECS].
    #[error("duration {0} out of range (0, {MAX_MOTION_SECS}]")]
    DurationOutOfRange(f64),
}

impl ActuatorCommand {
    /// Build a validated forward command.
    pub fn forward(secs: f64) -> Result<Self, CommandParseError> {
        check_duration(secs).map(Self::Forward)
    }

    /// Build a validated reverse command.
    pub fn reverse(secs: f64) -> Result<Self, CommandParseError> {
        check_duration(secs).map(Self::Reverse)
    }

    /// Check the duration of a motion built directly from a variant.
    pub fn validate(&self) -> Result<(), CommandParseError> {
        match self {
            Self::Forward(secs) | Self::Reverse(secs) => check_duration(*secs).map(|_| ()),
            Self::Stop => Ok(()),
        }
    }

    /// Encoded payload written to the peripheral.
    ///
    /// Fails for an out-of-range duration so it never reaches the wire.
    pub fn to_payload(&self) -> Result<Vec<u8>, CommandParseError> {
        self.validate()?;
        Ok(self.to_string().into_bytes())
    }

    /// Whether this is the STOP command.
    #[inline]
    pub const fn is_stop(&self) -> bool {
        matches!(self, Self::Stop)
    }
}

fn check_duration(secs: f64) -> Result<f64, CommandParseError> {
    if secs.is_finite() && secs > 0.0 && secs <= MAX_MOTION_SECS {
        Ok(secs)
    } else {
        Err(CommandParseError::DurationOutOfRange(secs))
    }
}

fn write_secs(f: &mut fmt::Formatter<'_>, secs: f64) -> fmt::Result {
    // Whole seconds keep one decimal ("2.0"), matching the firmware's parser.
    if secs.fract() == 0.0 {
        write!(f, "{secs:.1}")
    } else {
        write!(f, "{secs}")
    }
}

impl fmt::Display for ActuatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward(secs) => {
                f.write_str("FORWARD:")?;
                write_secs(f, *secs)
            }
            Self::Reverse(secs) => {
                f.write_str("REVERSE:")?;
                write_secs(f, *secs)
            }
            Self::Stop => f.write_str("STOP"),
        }
    }
}

impl FromStr for ActuatorCommand {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        let (keyword, arg) = match token.split_once(':') {
            Some((k, a)) => (k, Some(a)),
            None => (token, None),
        };

        let parse_secs = |name: &'static str| -> Result<f64, CommandParseError> {
            let raw = arg.ok_or(CommandParseError::MissingDuration(name))?;
            raw.trim()
                .parse::<f64>()
                .map_err(|_| CommandParseError::InvalidDuration(raw.to_string()))
        };

        match keyword {
            "FORWARD" => Self::forward(parse_secs("FORWARD")?),
            "REVERSE" => Self::reverse(parse_secs("REVERSE")?),
            "STOP" if arg.is_none() => Ok(Self::Stop),
            _ => Err(CommandParseError::UnknownCommand(token.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_match_firmware_format() {
        assert_eq!(ActuatorCommand::Forward(1.5).to_string(), "FORWARD:1.5");
        assert_eq!(ActuatorCommand::Reverse(2.0).to_string(), "REVERSE:2.0");
        assert_eq!(ActuatorCommand::Stop.to_string(), "STOP");
        assert_eq!(ActuatorCommand::Stop.to_payload().unwrap(), b"STOP".to_vec());
    }

    #[test]
    fn parses_known_tokens() {
        assert_eq!(
            "FORWARD:1.5".parse::<ActuatorCommand>().unwrap(),
            ActuatorCommand::Forward(1.5)
        );
        assert_eq!(
            " REVERSE:2 \n".parse::<ActuatorCommand>().unwrap(),
            ActuatorCommand::Reverse(2.0)
        );
        assert_eq!("STOP".parse::<ActuatorCommand>().unwrap(), ActuatorCommand::Stop);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(
            "forward:1".parse::<ActuatorCommand>(),
            Err(CommandParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            "FORWARD".parse::<ActuatorCommand>(),
            Err(CommandParseError::MissingDuration("FORWARD"))
        ));
        assert!(matches!(
            "REVERSE:abc".parse::<ActuatorCommand>(),
            Err(CommandParseError::InvalidDuration(_))
        ));
        assert!(matches!(
            "FORWARD:-1".parse::<ActuatorCommand>(),
            Err(CommandParseError::DurationOutOfRange(_))
        ));
        assert!(matches!(
            "STOP:1".parse::<ActuatorCommand>(),
            Err(CommandParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn constructors_validate_range() {
        assert!(ActuatorCommand::forward(0.0).is_err());
        assert!(ActuatorCommand::forward(f64::NAN).is_err());
        assert!(ActuatorCommand::reverse(MAX_MOTION_SECS + 1.0).is_err());
        assert!(ActuatorCommand::forward(MAX_MOTION_SECS).is_ok());
    }

    #[test]
    fn raw_variants_are_checked_before_encoding() {
        assert!(matches!(
            ActuatorCommand::Forward(f64::NAN).to_payload(),
            Err(CommandParseError::DurationOutOfRange(_))
        ));
        assert!(ActuatorCommand::Reverse(f64::INFINITY).to_payload().is_err());
        assert!(ActuatorCommand::Forward(-2.0).validate().is_err());
        assert_eq!(
            ActuatorCommand::Reverse(0.5).to_payload().unwrap(),
            b"REVERSE:0.5".to_vec()
        );
        assert!(ActuatorCommand::Stop.is_stop());
        assert!(!ActuatorCommand::Forward(1.0).is_stop());
    }
}
