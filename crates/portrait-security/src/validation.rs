use std::sync::LazyLock;

use portrait_common::{Error, Result};
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 6;
const MAX_FIELD_LEN: usize = 256;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

/// Input validation and sanitization for user-supplied fields.
pub struct InputValidator;

impl InputValidator {
    /// Sanitize user input by removing control characters.
    pub fn sanitize(input: &str) -> String {
        input
            .chars()
            .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
            .collect()
    }

    pub fn validate_email(email: &str) -> Result<()> {
        if email.len() > MAX_FIELD_LEN || !EMAIL_RE.is_match(email) {
            return Err(Error::Validation(format!("invalid email address: {email}")));
        }
        Ok(())
    }

    /// Validate the fields of a registration request.
    pub fn validate_registration(name: &str, email: &str, password: &str) -> Result<()> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "name, email, and password are required".into(),
            ));
        }
        if name.len() > MAX_FIELD_LEN {
            return Err(Error::Validation("name too long".into()));
        }
        Self::validate_email(email.trim())?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::Validation(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }

    /// Validate a stored profile-picture reference (a path or URL).
    pub fn validate_picture_ref(picture: &str) -> Result<()> {
        if picture.trim().is_empty() {
            return Err(Error::Validation(
                "profile picture path is required".into(),
            ));
        }
        if picture.chars().any(|c| c.is_control()) {
            return Err(Error::Validation(
                "profile picture path contains control characters".into(),
            ));
        }
        Ok(())
    }
}
