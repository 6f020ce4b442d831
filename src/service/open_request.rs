/// Argument validation for the Open command
use crate::service::error::{CommandError, CommandOutcome};
use crate::uart::{DataBits, LineSettings, Parity, StopBits};

/// A validated Open request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenRequest {
    pub device: usize,
    pub settings: LineSettings,
}

/// Limits the request is validated against
#[derive(Debug, Clone, Copy)]
pub struct OpenLimits {
    pub device_count: usize,
    pub max_baud: u32,
}

/// Parse an unsigned integer in decimal or `0x` hexadecimal
pub fn parse_uint(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse::<u64>().ok(),
    }
}

impl OpenRequest {
    /// Validate `<device> <baud> <bits> <parity> <stop>`.
    ///
    /// Arguments are checked in order and the first bad one is reported,
    /// so nothing is claimed or configured for a malformed request.
    pub fn parse(args: &[&str], limits: OpenLimits) -> CommandOutcome<Self> {
        let arg = |index: usize| args.get(index).copied().unwrap_or("");

        let device = parse_uint(arg(0))
            .and_then(|device| usize::try_from(device).ok())
            .filter(|device| *device < limits.device_count)
            .ok_or_else(|| CommandError::argument(1, "device", arg(0)))?;

        let baud = parse_uint(arg(1))
            .filter(|baud| *baud > 0 && *baud <= u64::from(limits.max_baud))
            .and_then(|baud| u32::try_from(baud).ok())
            .ok_or_else(|| CommandError::argument(2, "baud", arg(1)))?;

        let data_bits = parse_uint(arg(2))
            .and_then(|bits| u32::try_from(bits).ok())
            .and_then(DataBits::new)
            .ok_or_else(|| CommandError::argument(3, "bits", arg(2)))?;

        let parity = arg(3)
            .parse::<Parity>()
            .map_err(|_| CommandError::argument(4, "parity", arg(3)))?;

        let stop_bits = parse_uint(arg(4))
            .and_then(|stop| u32::try_from(stop).ok())
            .and_then(StopBits::from_count)
            .ok_or_else(|| CommandError::argument(5, "stop", arg(4)))?;

        Ok(OpenRequest {
            device,
            settings: LineSettings {
                baud,
                data_bits,
                parity,
                stop_bits,
            },
        })
    }
}
