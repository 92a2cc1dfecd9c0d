// 🧹 Field Normalizers - Canonical forms for identity fields
// All four are pure, idempotent, and return "" for missing input

/// Normalize free-text fields (names): lowercase, trim, collapse internal
/// whitespace runs to a single space.
pub fn normalize_text(value: Option<&str>) -> String {
    match value {
        Some(s) => s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase(),
        None => String::new(),
    }
}

/// Normalize email addresses: lowercase and trim only.
pub fn normalize_email(value: Option<&str>) -> String {
    match value {
        Some(s) => s.trim().to_lowercase(),
        None => String::new(),
    }
}

/// Normalize phone numbers: strip parentheses, dashes, spaces, and plus
/// signs. Digits and anything else pass through untouched.
pub fn normalize_phone(value: Option<&str>) -> String {
    match value {
        Some(s) => s
            .chars()
            .filter(|c| !matches!(c, '(' | ')' | '-' | ' ' | '+'))
            .collect(),
        None => String::new(),
    }
}

/// Normalize CPF (Brazilian tax id): keep ASCII digits only, dropping
/// separators like dots, dashes, and spaces. 11 digits when complete.
pub fn normalize_cpf(value: Option<&str>) -> String {
    match value {
        Some(s) => s.chars().filter(|c| c.is_ascii_digit()).collect(),
        None => String::new(),
    }
}

// ============================================================================
// TESTS
// ============================================================================
