/// Redaction utilities for logging
///
/// Masks credentials in traced AMI traffic and shortens principal names so
/// logs stay useful without leaking who ran what.

const MASK: &str = "********";

/// Keys whose values never reach the log
const SECRET_KEYS: [&str; 2] = ["secret", "key"];

/// Mask secret values in a raw AMI message, preserving line layout.
/// Example: "Secret: hunter2\r\n" -> "Secret: ********\r\n"
pub fn ami_message(message: &str) -> String {
    message
        .split_inclusive('\n')
        .map(|line| match line.split_once(':') {
            Some((key, rest)) if is_secret_key(key) => {
                let ending = &rest[rest.trim_end_matches(['\r', '\n']).len()..];
                format!("{}: {}{}", key, MASK, ending)
            }
            _ => line.to_string(),
        })
        .collect()
}

fn is_secret_key(key: &str) -> bool {
    let key = key.trim();
    SECRET_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k))
}

/// Redact a principal name, keeping the first character and any domain.
/// Example: "alice@example.com" -> "a***@example.com", "bob" -> "b***"
pub fn principal(name: &str) -> String {
    let (local, domain) = match name.find('@') {
        Some(at) if at > 0 => name.split_at(at),
        _ => (name, ""),
    };

    let mut chars = local.chars();
    match (chars.next(), chars.next()) {
        (None, _) => name.to_string(),
        (Some(_), None) => format!("*{}", domain),
        (Some(first), Some(_)) => format!("{}***{}", first, domain),
    }
}
