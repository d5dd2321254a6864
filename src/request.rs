//! Caller identity helpers for the request layer

const BEARER_PREFIX: &str = "bearer ";

/// Extract the opaque API key from an `Authorization` header value.
///
/// Accepts `Bearer <key>` (scheme is case-insensitive) or a raw key. Blank
/// values yield `None`.
pub fn extract_api_key(header_value: &str) -> Option<String> {
    let value = header_value.trim();
    if value.eq_ignore_ascii_case(BEARER_PREFIX.trim_end()) {
        return None;
    }
    let key = match value.get(..BEARER_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(BEARER_PREFIX) => {
            value[BEARER_PREFIX.len()..].trim()
        }
        _ => value,
    };
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_and_raw() {
        assert_eq!(extract_api_key("Bearer abc").as_deref(), Some("abc"));
        assert_eq!(extract_api_key("bearer   abc  ").as_deref(), Some("abc"));
        assert_eq!(extract_api_key("BEARER abc").as_deref(), Some("abc"));
        assert_eq!(extract_api_key("  sk-raw-key ").as_deref(), Some("sk-raw-key"));
    }

    #[test]
    fn test_blank_is_none() {
        assert_eq!(extract_api_key(""), None);
        assert_eq!(extract_api_key("   "), None);
        assert_eq!(extract_api_key("Bearer "), None);
        assert_eq!(extract_api_key("Bearer    "), None);
    }

    #[test]
    fn test_multibyte_does_not_panic() {
        assert_eq!(extract_api_key("clé-ü").as_deref(), Some("clé-ü"));
        assert_eq!(extract_api_key("é").as_deref(), Some("é"));
    }
}
