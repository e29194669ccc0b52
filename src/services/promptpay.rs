//! CRC-16/CCITT-FALSE over EMVCo-style QR payloads.
//!
//! The v1 gateway endpoint returns a raw PromptPay payload string whose last
//! four characters are the hex CRC of everything before them (including the
//! `6304` checksum tag itself).

pub fn crc16(payload: &str) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for byte in payload.bytes() {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

pub fn crc16_hex(payload: &str) -> String {
    format!("{:04X}", crc16(payload))
}

pub fn append_checksum(payload: &str) -> String {
    format!("{payload}{}", crc16_hex(payload))
}

pub fn has_valid_checksum(payload: &str) -> bool {
    if !payload.is_ascii() || payload.len() < 4 {
        return false;
    }
    let (body, suffix) = payload.split_at(payload.len() - 4);
    suffix.eq_ignore_ascii_case(&crc16_hex(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc16_matches_known_vectors() {
        // Standard CCITT-FALSE check value.
        assert_eq!(crc16("123456789"), 0x29B1);
        assert_eq!(crc16_hex("123456789"), "29B1");
        // Empty input leaves the initial value untouched.
        assert_eq!(crc16(""), 0xFFFF);
    }

    #[test]
    fn appended_checksum_validates() {
        let body = "00020101021230370016A0000006770101120115123456789012345530376454041.006304";
        let full = append_checksum(body);
        assert_eq!(full.len(), body.len() + 4);
        assert!(has_valid_checksum(&full));
    }

    #[test]
    fn mutated_payload_fails_validation() {
        let full = append_checksum("000201010212");
        let mut corrupted = full.clone();
        corrupted.replace_range(0..1, "9");
        assert!(has_valid_checksum(&full));
        assert!(!has_valid_checksum(&corrupted));
    }

    #[test]
    fn lowercase_checksum_is_accepted() {
        let body = "000201010212";
        let full = format!("{body}{}", crc16_hex(body).to_lowercase());
        assert!(has_valid_checksum(&full));
    }

    #[test]
    fn short_or_non_ascii_input_is_rejected() {
        assert!(!has_valid_checksum("abc"));
        assert!(!has_valid_checksum("สวัสดี6304FFFF"));
    }
}
