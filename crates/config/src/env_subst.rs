/// Replace `${ENV_VAR}` and `${ENV_VAR:-fallback}` placeholders.
///
/// Unresolvable variables without a fallback are left as-is. An empty
/// variable counts as unset when a fallback is given.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder untouched.
            result.push_str(&rest[start..]);
            return result;
        };
        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (lookup(name).filter(|v| fallback.is_none() || !v.is_empty()), fallback) {
            (Some(value), _) if !name.is_empty() => result.push_str(&value),
            (_, Some(fallback)) if !name.is_empty() => result.push_str(fallback),
            _ => {
                result.push_str("${");
                result.push_str(body);
                result.push('}');
            },
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "TESSERA_TEST_PORT" => Some("9000".into()),
            "TESSERA_TEST_EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(
            substitute_with("bind_addr = \"0.0.0.0:${TESSERA_TEST_PORT}\"", env),
            "bind_addr = \"0.0.0.0:9000\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_with("${TESSERA_NONEXISTENT_XYZ}", env),
            "${TESSERA_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn fallback_applies_to_unset_and_empty() {
        assert_eq!(substitute_with("${TESSERA_NONEXISTENT_XYZ:-8080}", env), "8080");
        assert_eq!(substitute_with("${TESSERA_TEST_EMPTY:-x}", env), "x");
        assert_eq!(substitute_with("${TESSERA_TEST_PORT:-8080}", env), "9000");
    }

    #[test]
    fn malformed_placeholders_are_literal() {
        assert_eq!(substitute_with("a ${unterminated", env), "a ${unterminated");
        assert_eq!(substitute_with("${}", env), "${}");
        assert_eq!(substitute_with("plain text", env), "plain text");
    }

    #[test]
    fn reads_process_environment() {
        assert_eq!(substitute_env("${TESSERA_NONEXISTENT_XYZ:-ok}"), "ok");
    }
}
