//! Registration input validation.

use super::types::{ClientInfo, RegisterRequest};
use crate::error::{ApiError, FieldError};
use crate::store::{
    GuardDetails, NewRegistration, PlayerDetails, RegistrationDetails, Role, YesNo,
};
use regex::Regex;
use std::sync::LazyLock;

static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\d\s()\-+]+$").expect("phone pattern is valid"));

const MAX_PHONE_LEN: usize = 20;

/// Collects field errors while normalizing values.
#[derive(Default)]
struct Checker {
    errors: Vec<FieldError>,
}

impl Checker {
    fn fail(&mut self, field: &str, message: &str) {
        self.errors.push(FieldError::new(field, message));
    }

    /// Trimmed text of at most `max` characters. Blank counts as absent.
    fn text(
        &mut self,
        field: &str,
        value: Option<String>,
        max: usize,
        message: &str,
    ) -> Option<String> {
        let value = trimmed(value)?;
        if value.chars().count() > max {
            self.fail(field, message);
            return None;
        }
        Some(value)
    }

    fn phone(&mut self, field: &str, value: Option<String>, message: &str) -> Option<String> {
        let value = trimmed(value)?;
        if value.chars().count() > MAX_PHONE_LEN || !PHONE_PATTERN.is_match(&value) {
            self.fail(field, message);
            return None;
        }
        Some(value)
    }

    fn yes_no(&mut self, field: &str, value: Option<String>, message: &str) -> Option<YesNo> {
        let value = trimmed(value)?;
        let parsed = YesNo::parse(&value);
        if parsed.is_none() {
            self.fail(field, message);
        }
        parsed
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate and normalize a submission.
///
/// Every supplied field is checked, whatever the role; only the fields of
/// the chosen role are kept.
pub fn validate_registration(
    request: RegisterRequest,
    client: ClientInfo,
) -> Result<NewRegistration, ApiError> {
    let mut check = Checker::default();

    let role = request.role.as_deref().map(str::trim).and_then(Role::parse);
    if role.is_none() {
        check.fail("role", "Invalid role");
    }

    let player = PlayerDetails {
        first_name: check.text(
            "firstName",
            request.first_name,
            50,
            "First name must be 1-50 characters",
        ),
        last_name: check.text(
            "lastName",
            request.last_name,
            50,
            "Last name must be 1-50 characters",
        ),
        class: check.text("class", request.class, 10, "Class must be 1-10 characters"),
        phone: check.phone("phone", request.phone, "Invalid phone number format"),
    };

    let guard = GuardDetails {
        guard_name: check.text(
            "guardName",
            request.guard_name,
            100,
            "Guard name must be 1-100 characters",
        ),
        guard_class: check.text(
            "guardClass",
            request.guard_class,
            10,
            "Guard class must be 1-10 characters",
        ),
        guard_phone: check.phone(
            "guardPhone",
            request.guard_phone,
            "Invalid guard phone number format",
        ),
        brings_phone: check.yes_no(
            "bringsPhone",
            request.brings_phone,
            "Invalid bringsPhone value",
        ),
        willing_to_help: check.yes_no(
            "willingToHelp",
            request.willing_to_help,
            "Invalid willingToHelp value",
        ),
    };

    let details = match role {
        Some(Role::Player) if check.errors.is_empty() => RegistrationDetails::Player(player),
        Some(Role::Guard) if check.errors.is_empty() => RegistrationDetails::Guard(guard),
        _ => return Err(ApiError::Validation(check.errors)),
    };

    Ok(NewRegistration {
        details,
        ip_address: client.ip_address,
        user_agent: client.user_agent,
    })
}
