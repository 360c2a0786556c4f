//! `${VAR}` interpolation for configuration strings.
//!
//! Placeholders resolve against the process environment. A placeholder whose
//! variable is unset or empty is left in place, so a missing secret shows up
//! verbatim instead of silently collapsing to an empty string.

/// Expand `${VAR}` placeholders from the process environment.
pub fn interpolate(value: &str) -> String {
    interpolate_with(value, |name| std::env::var(name).ok())
}

/// Expand `${VAR}` placeholders using a custom lookup.
pub fn interpolate_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        let end = start + 2 + len + 1;

        out.push_str(&rest[..start]);
        match lookup(name).filter(|v| !v.is_empty()) {
            Some(resolved) => out.push_str(&resolved),
            None => out.push_str(&rest[start..end]),
        }
        rest = &rest[end..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "REDIS_HOST" => Some("cache.internal".to_string()),
            "REDIS_PORT" => Some("6380".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn test_plain_value_untouched() {
        assert_eq!(interpolate_with("127.0.0.1:6379", lookup), "127.0.0.1:6379");
    }

    #[test]
    fn test_multiple_placeholders() {
        assert_eq!(
            interpolate_with("${REDIS_HOST}:${REDIS_PORT}", lookup),
            "cache.internal:6380"
        );
    }

    #[test]
    fn test_unresolved_placeholder_kept() {
        assert_eq!(
            interpolate_with("${MISSING}:${REDIS_PORT}", lookup),
            "${MISSING}:6380"
        );
        assert_eq!(interpolate_with("${EMPTY}", lookup), "${EMPTY}");
    }

    #[test]
    fn test_unterminated_placeholder() {
        assert_eq!(interpolate_with("prefix-${REDIS_HOST", lookup), "prefix-${REDIS_HOST");
    }
}
