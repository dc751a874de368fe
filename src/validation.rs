// src/validation.rs

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

use crate::types::Registration;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is a valid regex")
});

/// Field name to message, one entry per failing field.
pub type FieldErrors = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Form {
    Profile,
    Registration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldCheck {
    pub valid: bool,
    pub message: String,
}

impl FieldCheck {
    fn ok() -> Self {
        Self {
            valid: true,
            message: String::new(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProfileForm {
    pub username: String,
    pub email: String,
    pub avatar_url: Option<String>,
}

fn check_length(value: &str, min: usize, max: usize, label: &str) -> Option<String> {
    let len = value.chars().count();
    if value.is_empty() {
        Some(format!("{label} is required"))
    } else if len < min {
        Some(format!("{label} must be at least {min} characters"))
    } else if len > max {
        Some(format!("{label} cannot exceed {max} characters"))
    } else {
        None
    }
}

fn check_email(value: &str) -> Option<String> {
    if value.is_empty() {
        Some("Email is required".to_string())
    } else if !EMAIL_RE.is_match(value) {
        Some("Please enter a valid email address".to_string())
    } else {
        None
    }
}

fn check_avatar_url(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else if Url::parse(value).is_err() {
        Some("Please enter a valid URL".to_string())
    } else if value.chars().count() > 255 {
        Some("URL cannot exceed 255 characters".to_string())
    } else {
        None
    }
}

fn check_password(value: &str) -> Option<String> {
    if value.is_empty() {
        Some("Password is required".to_string())
    } else if value.chars().count() < 8 {
        Some("Password must be at least 8 characters".to_string())
    } else {
        None
    }
}

fn check(form: Form, field: &str, value: &str) -> Option<String> {
    match (form, field) {
        (Form::Profile, "username") => check_length(value, 4, 100, "Username"),
        (Form::Registration, "username") => check_length(value, 4, 64, "Username"),
        (_, "email") => check_email(value),
        (Form::Profile, "avatar_url") => check_avatar_url(value),
        (Form::Registration, "password") => check_password(value),
        _ => Some(format!("Invalid {field}")),
    }
}

/// Live feedback for a single field.
pub fn validate_field(form: Form, field: &str, value: &str) -> FieldCheck {
    match check(form, field, value) {
        Some(message) => FieldCheck::fail(message),
        None => FieldCheck::ok(),
    }
}

fn collect<'a>(form: Form, fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<(), FieldErrors> {
    let errors: FieldErrors = fields
        .into_iter()
        .filter_map(|(field, value)| check(form, field, value).map(|m| (field.to_string(), m)))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

pub fn validate_profile(profile: &ProfileForm) -> Result<(), FieldErrors> {
    collect(
        Form::Profile,
        [
            ("username", profile.username.as_str()),
            ("email", profile.email.as_str()),
            ("avatar_url", profile.avatar_url.as_deref().unwrap_or("")),
        ],
    )
}

pub fn validate_registration(registration: &Registration) -> Result<(), FieldErrors> {
    collect(
        Form::Registration,
        [
            ("username", registration.username.as_str()),
            ("email", registration.email.as_str()),
            ("password", registration.password.as_str()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_bounds() {
        assert!(!validate_field(Form::Profile, "username", "abc").valid);
        assert!(validate_field(Form::Profile, "username", "abcd").valid);
        let long = "a".repeat(101);
        assert_eq!(
            validate_field(Form::Profile, "username", &long).message,
            "Username cannot exceed 100 characters"
        );
        assert!(!validate_field(Form::Registration, "username", &"a".repeat(65)).valid);
    }

    #[test]
    fn test_optional_avatar_url() {
        assert!(validate_field(Form::Profile, "avatar_url", "").valid);
        assert!(validate_field(Form::Profile, "avatar_url", "https://img.test/a.png").valid);
        assert_eq!(
            validate_field(Form::Profile, "avatar_url", "not a url").message,
            "Please enter a valid URL"
        );
    }

    #[test]
    fn test_full_registration_collects_every_failure() {
        let errors = validate_registration(&Registration {
            username: "bob".into(),
            email: "bob@".into(),
            password: "short".into(),
        })
        .unwrap_err();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors["email"], "Please enter a valid email address");

        assert!(validate_profile(&ProfileForm {
            username: "alice".into(),
            email: "alice@example.com".into(),
            avatar_url: None,
        })
        .is_ok());
    }
}
