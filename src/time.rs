use chrono::prelude::*;
use chrono::TimeDelta;

use crate::error::{IpfixError, Result};

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch.
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

//dateTimeMicroseconds ignores the low 11 bits of the fraction (RFC 7011 6.1.9)
const MICRO_FRACTION_MASK: u64 = !0x7ff;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NtpResolution {
    Micro,
    Nano,
}

pub fn from_epoch_seconds(secs: u32) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs as i64, 0)
        .ok_or_else(|| IpfixError::InvalidValue(format!("epoch seconds {secs} out of range")))
}

pub fn to_epoch_seconds(dt: &DateTime<Utc>) -> Result<u32> {
    u32::try_from(dt.timestamp())
        .map_err(|_| IpfixError::Encoding(format!("{dt} not representable as dateTimeSeconds")))
}

pub fn from_epoch_millis(ms: u64) -> Result<DateTime<Utc>> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| IpfixError::InvalidValue(format!("epoch milliseconds {ms} out of range")))
}

pub fn to_epoch_millis(dt: &DateTime<Utc>) -> Result<u64> {
    u64::try_from(dt.timestamp_millis())
        .map_err(|_| IpfixError::Encoding(format!("{dt} not representable as dateTimeMilliseconds")))
}

/// Decodes a 64-bit NTP timestamp (32 bits seconds since 1900, 32 bits
/// binary fraction).
pub fn from_ntp(ntp: u64, resolution: NtpResolution) -> Result<DateTime<Utc>> {
    let ntp_secs = (ntp >> 32) as i64;
    let fraction = ntp & 0xffff_ffff;
    let base = DateTime::from_timestamp(ntp_secs - NTP_UNIX_OFFSET, 0)
        .ok_or_else(|| IpfixError::InvalidValue(format!("NTP seconds {ntp_secs} out of range")))?;

    let sub_second = match resolution {
        NtpResolution::Nano => {
            let nanos = (fraction * 1_000_000_000) >> 32;
            TimeDelta::nanoseconds(nanos as i64)
        }
        NtpResolution::Micro => {
            //round to nearest so the masked bits don't cost a microsecond
            let micros = ((fraction & MICRO_FRACTION_MASK) * 1_000_000 + (1 << 31)) >> 32;
            //rounding near the top of the second must not carry into the next one
            TimeDelta::microseconds(micros.min(999_999) as i64)
        }
    };
    Ok(base + sub_second)
}

pub fn to_ntp(dt: &DateTime<Utc>, resolution: NtpResolution) -> Result<u64> {
    let ntp_secs = u32::try_from(dt.timestamp() + NTP_UNIX_OFFSET)
        .map_err(|_| IpfixError::Encoding(format!("{dt} outside NTP era 0")))?;
    //leap seconds show up as nanos >= 1e9
    let nanos = (dt.timestamp_subsec_nanos() as u64).min(999_999_999);

    let fraction = match resolution {
        //ceiling, so decoding with floor recovers the exact nanosecond
        NtpResolution::Nano => ((nanos << 32) + 999_999_999) / 1_000_000_000,
        NtpResolution::Micro => {
            let micros = nanos / 1000;
            (((micros << 32) + 500_000) / 1_000_000) & MICRO_FRACTION_MASK
        }
    };
    Ok(((ntp_secs as u64) << 32) | fraction)
}

pub fn now_epoch_seconds() -> u32 {
    u32::try_from(Utc::now().timestamp()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64, nanos: u32) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, nanos).unwrap()
    }

    #[test]
    fn test_seconds_and_millis() {
        let dt = from_epoch_seconds(1_234_567_890).unwrap();
        assert_eq!(to_epoch_seconds(&dt).unwrap(), 1_234_567_890);

        let dt = from_epoch_millis(1_234_567_890_123).unwrap();
        assert_eq!(dt.timestamp_subsec_millis(), 123);
        assert_eq!(to_epoch_millis(&dt).unwrap(), 1_234_567_890_123);

        assert!(to_epoch_seconds(&at(-1, 0)).is_err());
        assert!(to_epoch_millis(&at(-1, 0)).is_err());
    }

    #[test]
    fn test_ntp_epoch_offset() {
        //unix epoch is NTP second 2208988800 with zero fraction
        let ntp = to_ntp(&at(0, 0), NtpResolution::Nano).unwrap();
        assert_eq!(ntp, (NTP_UNIX_OFFSET as u64) << 32);
        assert_eq!(from_ntp(ntp, NtpResolution::Nano).unwrap(), at(0, 0));
    }

    #[test]
    fn test_ntp_half_second() {
        let ntp = ((NTP_UNIX_OFFSET as u64 + 10) << 32) | 0x8000_0000;
        assert_eq!(from_ntp(ntp, NtpResolution::Nano).unwrap(), at(10, 500_000_000));
        assert_eq!(from_ntp(ntp, NtpResolution::Micro).unwrap(), at(10, 500_000_000));
    }

    #[test]
    fn test_ntp_nanosecond_precision() {
        for nanos in [1, 999, 123_456_789, 999_999_999] {
            let dt = at(1_700_000_000, nanos);
            let ntp = to_ntp(&dt, NtpResolution::Nano).unwrap();
            assert_eq!(from_ntp(ntp, NtpResolution::Nano).unwrap(), dt);
        }
    }

    #[test]
    fn test_ntp_microsecond_precision() {
        for micros in [0u32, 1, 500_000, 999_999] {
            let dt = at(1_700_000_000, micros * 1000);
            let ntp = to_ntp(&dt, NtpResolution::Micro).unwrap();
            assert_eq!(ntp & 0x7ff, 0);
            assert_eq!(from_ntp(ntp, NtpResolution::Micro).unwrap(), dt);
        }
        //largest fraction still lands inside the same second
        let ntp = ((NTP_UNIX_OFFSET as u64 + 5) << 32) | 0xffff_f800;
        assert_eq!(from_ntp(ntp, NtpResolution::Micro).unwrap(), at(5, 999_999_000));
        //sub-microsecond part is dropped
        let ntp = to_ntp(&at(5, 1_999), NtpResolution::Micro).unwrap();
        assert_eq!(from_ntp(ntp, NtpResolution::Micro).unwrap(), at(5, 1_000));
    }
}
