//! Service name validation.

/// Longest service name the service manager accepts.
pub const MAX_SERVICE_NAME: usize = 80;
/// Longest display name the service manager accepts.
pub const MAX_DISPLAY_NAME: usize = 255;

/// Validate a string as an acceptable service name.
///
/// Rejects empty names, names longer than [`MAX_SERVICE_NAME`] UTF-16 units,
/// and names containing control characters, `/` or `\`.
pub fn validate_service_name(name: &str) -> bool {
    let len = name.encode_utf16().count();
    if len == 0 || len > MAX_SERVICE_NAME {
        return false;
    }

    !name.chars().any(|c| c < ' ' || c == '/' || c == '\\')
}

/// Length of a display name as the service manager counts it.
#[inline]
pub fn display_name_len(display_name: &str) -> usize {
    display_name.encode_utf16().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        assert!(validate_service_name("svc1"));
        assert!(validate_service_name("My Service (x86)"));
        assert!(validate_service_name(" "));
        assert!(validate_service_name(&"a".repeat(80)));
    }

    #[test]
    fn rejects_empty_and_long_names() {
        assert!(!validate_service_name(""));
        assert!(!validate_service_name(&"a".repeat(81)));
    }

    #[test]
    fn rejects_separators_and_control_chars() {
        assert!(!validate_service_name("a/b"));
        assert!(!validate_service_name("a\\b"));
        assert!(!validate_service_name("tab\there"));
        assert!(!validate_service_name("nul\0"));
        assert!(!validate_service_name("\u{1f}"));
    }

    #[test]
    fn length_is_counted_in_utf16_units() {
        // 40 astral characters are 80 UTF-16 units
        assert!(validate_service_name(&"\u{1F600}".repeat(40)));
        assert!(!validate_service_name(&"\u{1F600}".repeat(41)));
        assert_eq!(display_name_len("\u{1F600}"), 2);
    }
}
