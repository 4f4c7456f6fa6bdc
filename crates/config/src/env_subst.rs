/// Replace `${VAR}` and `${VAR:-fallback}` placeholders with environment values.
///
/// An unset variable without a fallback is left as-is so the parse error (if
/// any) points at the placeholder instead of an empty string.
pub fn substitute_env(input: &str) -> String {
    substitute_with(input, |name| std::env::var(name).ok())
}

fn substitute_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated: emit the remainder verbatim.
            out.push_str(&rest[start..]);
            return out;
        };

        let body = &after[..end];
        let (name, fallback) = match body.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (body, None),
        };

        match (lookup(name), fallback) {
            (Some(value), _) if !name.is_empty() => out.push_str(&value),
            (_, Some(fallback)) if !name.is_empty() => out.push_str(fallback),
            _ => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_env(name: &str) -> Option<String> {
        match name {
            "WAGATE_PORT" => Some("9100".into()),
            "WAGATE_CC" => Some("44".into()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_known_var() {
        assert_eq!(substitute_with("port = ${WAGATE_PORT}", fake_env), "port = 9100");
    }

    #[test]
    fn leaves_unknown_var() {
        assert_eq!(
            substitute_with("${WAGATE_NONEXISTENT_XYZ}", fake_env),
            "${WAGATE_NONEXISTENT_XYZ}"
        );
    }

    #[test]
    fn fallback_used_only_when_unset() {
        assert_eq!(substitute_with("${WAGATE_CC:-62}", fake_env), "44");
        assert_eq!(substitute_with("${WAGATE_MISSING:-62}", fake_env), "62");
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        assert_eq!(substitute_with("path=${HOME", fake_env), "path=${HOME");
    }

    #[test]
    fn empty_name_is_literal() {
        assert_eq!(substitute_with("a${}b", fake_env), "a${}b");
    }

    #[test]
    fn reads_process_env() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
