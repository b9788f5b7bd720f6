//! Input checks for the account mutations. Each returns the first problem
//! found, reported against the field the client sent.

use super::types::{FieldError, UsernamePasswordInput};

const MIN_USERNAME_CHARS: usize = 3;
const MIN_PASSWORD_CHARS: usize = 7;

/// Loose shape check: `local@domain.tld` without whitespace.
pub fn is_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(host, rest)| !host.is_empty() && !rest.is_empty())
        && !domain.ends_with('.')
}

pub fn check_password(field: &str, password: &str) -> Option<FieldError> {
    if password.trim().chars().count() < MIN_PASSWORD_CHARS {
        return Some(FieldError::new(field, "Length must be greater than 6"));
    }
    None
}

pub fn check_register(input: &UsernamePasswordInput) -> Option<FieldError> {
    if input.username.trim().chars().count() < MIN_USERNAME_CHARS {
        return Some(FieldError::new("username", "Length must be greater than 2"));
    }
    // usernames must stay distinguishable from emails at login
    if input.username.contains('@') {
        return Some(FieldError::new(
            "username",
            "Username must not include an '@' symbol",
        ));
    }
    if !is_email(&input.email) {
        return Some(FieldError::new("email", "Please enter a valid email"));
    }
    check_password("password", &input.password)
}
