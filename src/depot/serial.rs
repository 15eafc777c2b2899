//! Serial number allocation and encoding.
//!
//! A depot stores the *next* serial number to hand out. Allocation returns
//! the stored value and stores its successor, so serials only ever go up.
//! A depot without any stored value starts at a random 130 bit number.

use openssl::bn::{BigNum, BigNumRef, MsbOption};
use openssl::error::ErrorStack;

use crate::commons::crypto::bn_to_hex;
use crate::commons::error::Error;
use crate::constants::INITIAL_SERIAL_BITS;


/// Returns a fresh random serial number.
///
/// The result is uniformly distributed over `1 .. 2^130`.
pub fn random() -> Result<BigNum, ErrorStack> {
    let mut serial = BigNum::new()?;
    loop {
        serial.rand(INITIAL_SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
        if serial.num_bits() > 0 {
            return Ok(serial)
        }
    }
}

/// Returns the serial number following `serial`.
pub fn next(serial: &BigNumRef) -> Result<BigNum, ErrorStack> {
    let mut res = BigNum::new()?;
    res.checked_add(serial, BigNum::from_u32(1)?.as_ref())?;
    Ok(res)
}

/// Encodes a serial number for storage: lowercase hex and a line break.
pub fn encode(serial: &BigNumRef) -> String {
    format!("{}\n", bn_to_hex(serial))
}

/// Decodes a stored serial number.
///
/// Accepts hex digits in either case and an odd number of them, followed
/// by an optional line break.
pub fn decode(content: &[u8]) -> Result<BigNum, Error> {
    let content = std::str::from_utf8(content).map_err(|_| {
        Error::serial_format("stored serial number is not valid text")
    })?;
    let digits = content.trim_end_matches(['\r', '\n']);
    if digits.is_empty() {
        return Err(Error::serial_format("stored serial number is empty"))
    }

    let padded = if digits.len() % 2 == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(&padded).map_err(|_| {
        Error::serial_format(format!(
            "could not convert '{digits}' to serial number"
        ))
    })?;
    BigNum::from_slice(&bytes).map_err(Error::serial_format)
}


//------------ Tests ---------------------------------------------------------
