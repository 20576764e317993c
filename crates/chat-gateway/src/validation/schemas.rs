//! Request schemas. Each `*Payload` carries the field rules; the matching
//! `*Input` is the typed value handed to handlers.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use validator::{Validate, ValidationError};

use super::Schema;

lazy_static! {
    static ref PROMPT_CHARSET: Regex = Regex::new(r"^[a-zA-Z0-9\s.,!?\-_()]+$").unwrap();
    static ref NAME_CHARSET: Regex = Regex::new(r"^[a-zA-Z\s]+$").unwrap();
}

const PASSWORD_STRENGTH_MESSAGE: &str =
    "Password must contain at least one lowercase letter, one uppercase letter, and one number";

fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if has_lower && has_upper && has_digit {
        Ok(())
    } else {
        let mut err = ValidationError::new("password_strength");
        err.message = Some(Cow::Borrowed(PASSWORD_STRENGTH_MESSAGE));
        Err(err)
    }
}

// ---------------------------------------------------------------------------
// Chat message
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct ChatMessagePayload {
    #[validate(
        required(message = "Required"),
        length(min = 1, max = 4000, message = "Message must be between 1 and 4000 characters")
    )]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessageInput {
    pub message: String,
}

impl Schema for ChatMessageInput {
    type Payload = ChatMessagePayload;
    const NAME: &'static str = "chat message";
    const FIELDS: &'static [(&'static str, &'static str)] = &[("message", "message")];

    fn from_payload(payload: Self::Payload) -> Self {
        Self { message: payload.message.unwrap_or_default() }
    }
}

// ---------------------------------------------------------------------------
// Image prompt
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct ImagePromptPayload {
    #[validate(
        required(message = "Required"),
        length(min = 1, max = 1000, message = "Prompt must be between 1 and 1000 characters"),
        regex(path = "PROMPT_CHARSET", message = "Prompt contains invalid characters")
    )]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePromptInput {
    pub prompt: String,
}

impl Schema for ImagePromptInput {
    type Payload = ImagePromptPayload;
    const NAME: &'static str = "image prompt";
    const FIELDS: &'static [(&'static str, &'static str)] = &[("prompt", "prompt")];

    fn from_payload(payload: Self::Payload) -> Self {
        Self { prompt: payload.prompt.unwrap_or_default() }
    }
}

// ---------------------------------------------------------------------------
// Registration / login
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct RegistrationPayload {
    #[validate(
        required(message = "Required"),
        email(message = "Invalid email format"),
        length(max = 255, message = "Email too long")
    )]
    pub email: Option<String>,

    #[validate(
        required(message = "Required"),
        length(min = 8, max = 128, message = "Password must be between 8 and 128 characters"),
        custom = "validate_password_strength"
    )]
    pub password: Option<String>,

    #[validate(
        length(min = 1, max = 50, message = "First name must be between 1 and 50 characters"),
        regex(path = "NAME_CHARSET", message = "First name contains invalid characters")
    )]
    pub first_name: Option<String>,

    #[validate(
        length(min = 1, max = 50, message = "Last name must be between 1 and 50 characters"),
        regex(path = "NAME_CHARSET", message = "Last name contains invalid characters")
    )]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInput {
    pub email: String,
    pub password: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl Schema for RegistrationInput {
    type Payload = RegistrationPayload;
    const NAME: &'static str = "registration";
    const FIELDS: &'static [(&'static str, &'static str)] = &[
        ("email", "email"),
        ("password", "password"),
        ("first_name", "first_name"),
        ("last_name", "last_name"),
    ];

    fn from_payload(payload: Self::Payload) -> Self {
        Self {
            email: payload.email.unwrap_or_default(),
            password: payload.password.unwrap_or_default(),
            first_name: payload.first_name,
            last_name: payload.last_name,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginPayload {
    #[validate(required(message = "Required"), email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(
        required(message = "Required"),
        length(min = 1, message = "Password is required")
    )]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

impl Schema for LoginInput {
    type Payload = LoginPayload;
    const NAME: &'static str = "login";
    const FIELDS: &'static [(&'static str, &'static str)] =
        &[("email", "email"), ("password", "password")];

    fn from_payload(payload: Self::Payload) -> Self {
        Self {
            email: payload.email.unwrap_or_default(),
            password: payload.password.unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Password reset / update, profile
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetPayload {
    #[validate(required(message = "Required"), email(message = "Invalid email format"))]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetInput {
    pub email: String,
}

impl Schema for PasswordResetInput {
    type Payload = PasswordResetPayload;
    const NAME: &'static str = "password reset";
    const FIELDS: &'static [(&'static str, &'static str)] = &[("email", "email")];

    fn from_payload(payload: Self::Payload) -> Self {
        Self { email: payload.email.unwrap_or_default() }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordUpdatePayload {
    #[validate(
        required(message = "Required"),
        length(min = 8, max = 128, message = "Password must be between 8 and 128 characters"),
        custom = "validate_password_strength"
    )]
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordUpdateInput {
    pub password: String,
}

impl Schema for PasswordUpdateInput {
    type Payload = PasswordUpdatePayload;
    const NAME: &'static str = "password update";
    const FIELDS: &'static [(&'static str, &'static str)] = &[("password", "password")];

    fn from_payload(payload: Self::Payload) -> Self {
        Self { password: payload.password.unwrap_or_default() }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ProfileUpdatePayload {
    #[validate(
        length(min = 1, max = 50, message = "First name must be between 1 and 50 characters"),
        regex(path = "NAME_CHARSET", message = "First name contains invalid characters")
    )]
    pub first_name: Option<String>,

    #[validate(
        length(min = 1, max = 50, message = "Last name must be between 1 and 50 characters"),
        regex(path = "NAME_CHARSET", message = "Last name contains invalid characters")
    )]
    pub last_name: Option<String>,

    #[validate(url(message = "Invalid avatar URL format"))]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdateInput {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl ProfileUpdateInput {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none() && self.last_name.is_none() && self.avatar_url.is_none()
    }
}

impl Schema for ProfileUpdateInput {
    type Payload = ProfileUpdatePayload;
    const NAME: &'static str = "profile update";
    const FIELDS: &'static [(&'static str, &'static str)] = &[
        ("first_name", "first_name"),
        ("last_name", "last_name"),
        ("avatar_url", "avatar_url"),
    ];

    fn from_payload(payload: Self::Payload) -> Self {
        Self {
            first_name: payload.first_name,
            last_name: payload.last_name,
            avatar_url: payload.avatar_url,
        }
    }
}

// ---------------------------------------------------------------------------
// Image download
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct ImageDownloadPayload {
    #[serde(rename = "imageUrl")]
    #[validate(required(message = "Required"), url(message = "Invalid image URL"))]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDownloadInput {
    pub image_url: String,
}

impl Schema for ImageDownloadInput {
    type Payload = ImageDownloadPayload;
    const NAME: &'static str = "image download";
    const FIELDS: &'static [(&'static str, &'static str)] = &[("image_url", "imageUrl")];

    fn from_payload(payload: Self::Payload) -> Self {
        Self { image_url: payload.image_url.unwrap_or_default() }
    }
}
