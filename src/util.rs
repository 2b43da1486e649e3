/// Renders a serial number's big-endian magnitude as the canonical lookup
/// key: lowercase hex, minimal length, always an even number of digits.
/// The same string keys the database, the cache and every log line.
pub fn serial_to_string(serial: &[u8]) -> String {
    let magnitude = match serial.iter().position(|&b| b != 0) {
        Some(i) => &serial[i..],
        None => &[0u8][..],
    };
    hex::encode(magnitude)
}

pub fn cvt(r: libc::c_int) -> Result<libc::c_int, openssl::error::ErrorStack> {
    if r <= 0 {
        Err(openssl::error::ErrorStack::get())
    } else {
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_strings_are_even_lowercase_hex() {
        assert_eq!(serial_to_string(&[0x03, 0xf9, 0xa1, 0xb2, 0xc3]), "03f9a1b2c3");
        assert_eq!(serial_to_string(&[0xff, 0x00]), "ff00");
        assert_eq!(serial_to_string(&[0xAB]), "ab");
    }

    #[test]
    fn serial_strings_trim_leading_zero_bytes() {
        assert_eq!(serial_to_string(&[0x00, 0x01, 0x02]), "0102");
        assert_eq!(serial_to_string(&[0x00, 0x00, 0xff]), "ff");
    }

    #[test]
    fn zero_serial_renders_as_one_byte() {
        assert_eq!(serial_to_string(&[0x00]), "00");
        assert_eq!(serial_to_string(&[0x00, 0x00]), "00");
        assert_eq!(serial_to_string(&[]), "00");
    }
}
