//! Kubernetes naming rules

/// Maximum length of an RFC 1123 DNS label
pub const DNS1123_LABEL_MAX_LENGTH: usize = 63;

/// Validate an RFC 1123 DNS label.
///
/// Rules:
/// - Must not be empty or longer than 63 characters
/// - May contain lowercase letters, digits, and hyphens
/// - Must start and end with a lowercase letter or digit
///
/// Service names, and therefore app ids, must satisfy this.
pub fn validate_dns1123_label(s: &str) -> Result<(), String> {
    if s.is_empty() {
        return Err("a DNS-1123 label must not be empty".to_string());
    }

    if s.len() > DNS1123_LABEL_MAX_LENGTH {
        return Err(format!(
            "must be no more than {} characters: {}",
            DNS1123_LABEL_MAX_LENGTH, s
        ));
    }

    let is_alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();

    for c in s.chars() {
        if !is_alnum(c) && c != '-' {
            return Err(format!(
                "a DNS-1123 label must consist of lower case alphanumeric characters or '-': {}",
                s
            ));
        }
    }

    // Length checked above, so first/last exist
    let starts_ok = s.chars().next().is_some_and(is_alnum);
    let ends_ok = s.chars().last().is_some_and(is_alnum);
    if !starts_ok || !ends_ok {
        return Err(format!(
            "a DNS-1123 label must start and end with an alphanumeric character: {}",
            s
        ));
    }

    Ok(())
}
