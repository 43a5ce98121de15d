use std::convert::TryInto;

use log::LevelFilter;
use simplelog::{Config, SimpleLogger};

use crate::error::{IpfixError, Result};

//all wire integers are network byte order

pub fn take(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let have = buf.len().saturating_sub(offset);
    if have < len {
        return Err(IpfixError::truncated(len, have));
    }
    Ok(&buf[offset..offset + len])
}

pub fn read_u8(buf: &[u8], offset: usize) -> Result<u8> {
    Ok(take(buf, offset, 1)?[0])
}

pub fn read_u16(buf: &[u8], offset: usize) -> Result<u16> {
    let field_slice = take(buf, offset, 2)?;
    let field_array: [u8; 2] = field_slice
        .try_into()
        .map_err(|_| IpfixError::truncated(2, field_slice.len()))?;
    Ok(u16::from_be_bytes(field_array))
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32> {
    let field_slice = take(buf, offset, 4)?;
    let field_array: [u8; 4] = field_slice
        .try_into()
        .map_err(|_| IpfixError::truncated(4, field_slice.len()))?;
    Ok(u32::from_be_bytes(field_array))
}

pub fn write_u16_at(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn write_u32_at(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Checks that a configured maximum message size can carry at least a header
/// and one set header.
pub fn check_message_size(byte_count: usize) -> Result<()> {
    let min_msg_size: usize = 32;
    if byte_count < min_msg_size || byte_count > u16::MAX as usize {
        Err(IpfixError::Config(format!(
            "max message size {byte_count} outside {min_msg_size}..=65535"
        )))
    } else {
        Ok(())
    }
}

/// Installs a `simplelog` logger for the whole process.
pub fn init_logging(level: LevelFilter) -> Result<()> {
    SimpleLogger::init(level, Config::default())
        .map_err(|e| IpfixError::Config(format!("logger already installed: {e}")))
}

pub fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}
