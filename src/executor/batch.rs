//! Host fan-out sizing: worker counts and serial batches.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Number of hosts a task may run at once.
///
/// `parallel` runs every host at once. A `concurrency` ratio `c` runs
/// `max(1, round(c * hosts))`, where a ratio outside `(0, 1]` counts as `1.0`.
/// With neither, hosts run one at a time.
///
/// ```
/// use herdsman::executor::batch::worker_count;
///
/// assert_eq!(worker_count(false, Some(0.5), 3), 2);
/// assert_eq!(worker_count(false, Some(0.4), 3), 1);
/// assert_eq!(worker_count(true, None, 7), 7);
/// assert_eq!(worker_count(false, None, 7), 1);
/// ```
pub fn worker_count(parallel: bool, concurrency: Option<f64>, hosts: usize) -> usize {
    if parallel {
        return hosts.max(1);
    }
    match concurrency {
        Some(ratio) => {
            let ratio = if ratio > 0.0 && ratio <= 1.0 { ratio } else { 1.0 };
            ((ratio * hosts as f64).round() as usize).max(1)
        }
        None => 1,
    }
}

/// Serial batch size: run hosts in consecutive batches of this size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Serial {
    /// Fixed number of hosts per batch
    Count(usize),
    /// Percentage of the task's hosts per batch
    Percent(f64),
}

impl Serial {
    /// Hosts per batch for a task with `hosts` hosts (at least 1)
    pub fn batch_size(&self, hosts: usize) -> usize {
        let size = match *self {
            Serial::Count(n) => n,
            Serial::Percent(p) => (hosts as f64 * p / 100.0).ceil() as usize,
        };
        size.max(1)
    }
}

impl FromStr for Serial {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || Error::Config(format!("invalid serial value '{}'", s));
        match s.strip_suffix('%') {
            Some(pct) => {
                let p: f64 = pct.trim().parse().map_err(|_| invalid())?;
                if p <= 0.0 || p > 100.0 {
                    return Err(invalid());
                }
                Ok(Serial::Percent(p))
            }
            None => match s.parse::<usize>() {
                Ok(0) | Err(_) => Err(invalid()),
                Ok(n) => Ok(Serial::Count(n)),
            },
        }
    }
}

impl TryFrom<String> for Serial {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Serial> for String {
    fn from(value: Serial) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Serial::Count(n) => write!(f, "{}", n),
            Serial::Percent(p) => write!(f, "{}%", p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_fixtures() {
        let cases = [
            (0.5, 3, 2),
            (0.5, 4, 2),
            (0.4, 3, 1),
            (0.4, 4, 2),
            (0.1, 4, 1),
            (0.2222222, 4, 1),
            (1.0, 4, 4),
        ];
        for (ratio, hosts, expected) in cases {
            assert_eq!(
                worker_count(false, Some(ratio), hosts),
                expected,
                "concurrency {} over {} hosts",
                ratio,
                hosts
            );
        }
    }

    #[test]
    fn test_out_of_range_ratio_is_full() {
        assert_eq!(worker_count(false, Some(0.0), 5), 5);
        assert_eq!(worker_count(false, Some(-1.0), 5), 5);
        assert_eq!(worker_count(false, Some(1.5), 5), 5);
    }

    #[test]
    fn test_parallel_wins() {
        assert_eq!(worker_count(true, Some(0.1), 10), 10);
    }

    #[test]
    fn test_serial_parse_and_size() {
        assert_eq!("2".parse::<Serial>().unwrap(), Serial::Count(2));
        assert_eq!("30%".parse::<Serial>().unwrap(), Serial::Percent(30.0));
        assert!("0".parse::<Serial>().is_err());
        assert!("150%".parse::<Serial>().is_err());
        assert!("two".parse::<Serial>().is_err());

        assert_eq!(Serial::Count(2).batch_size(5), 2);
        assert_eq!(Serial::Percent(30.0).batch_size(10), 3);
        assert_eq!(Serial::Percent(30.0).batch_size(5), 2);
        assert_eq!(Serial::Percent(1.0).batch_size(3), 1);
    }
}
