//! Refined input types.
//!
//! Every value the flows send to the IdP is validated here, before any
//! request is made. Constructors are the only way in; a value of one of these
//! types is known-good by construction.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const PASSWORD_MIN: usize = 8;
const PASSWORD_MAX: usize = 72;

/// Why a candidate password was rejected.
///
/// When several predicates fail at once, the reported variant follows the
/// fixed priority: length, illegal character, uppercase, lowercase, digit,
/// special.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("password has {len} characters, minimum is {PASSWORD_MIN}")]
    TooFewChars { len: usize },
    #[error("password has {len} characters, maximum is {PASSWORD_MAX}")]
    TooManyChars { len: usize },
    #[error("password contains a character outside the allowed set")]
    IllegalCharacter,
    #[error("password needs at least one uppercase letter")]
    MissingUppercase,
    #[error("password needs at least one lowercase letter")]
    MissingLowercase,
    #[error("password needs at least one digit")]
    MissingDigit,
    #[error("password needs at least one special character")]
    MissingSpecial,
}

/// A validated password. The raw material lives in a [`SecretString`] and is
/// exposed only at the serialization boundary; `Debug` stays redacted.
#[derive(Clone)]
pub struct Password {
    raw: SecretString,
}

impl Password {
    /// Validate a candidate password.
    ///
    /// Accepted passwords are 8 to 72 characters, drawn entirely from ASCII
    /// letters, digits, and the printable specials (`0x21..=0x2F`,
    /// `0x3A..=0x40`, `0x7B..=0x7E`), with at least one character from each
    /// of the four classes.
    ///
    /// # Errors
    /// Returns the highest-priority [`PasswordError`] among the failed
    /// predicates.
    pub fn parse(raw: &str) -> Result<Self, PasswordError> {
        let len = raw.chars().count();
        if len < PASSWORD_MIN {
            return Err(PasswordError::TooFewChars { len });
        }
        if len > PASSWORD_MAX {
            return Err(PasswordError::TooManyChars { len });
        }

        // Single pass; class flags are folded so the checks below report in
        // the fixed priority order regardless of character positions.
        let mut all_legal = true;
        let mut has_upper = false;
        let mut has_lower = false;
        let mut has_digit = false;
        let mut has_special = false;
        for &byte in raw.as_bytes() {
            let upper = byte.is_ascii_uppercase();
            let lower = byte.is_ascii_lowercase();
            let digit = byte.is_ascii_digit();
            let special = is_special(byte);
            all_legal &= upper | lower | digit | special;
            has_upper |= upper;
            has_lower |= lower;
            has_digit |= digit;
            has_special |= special;
        }

        if !all_legal {
            return Err(PasswordError::IllegalCharacter);
        }
        if !has_upper {
            return Err(PasswordError::MissingUppercase);
        }
        if !has_lower {
            return Err(PasswordError::MissingLowercase);
        }
        if !has_digit {
            return Err(PasswordError::MissingDigit);
        }
        if !has_special {
            return Err(PasswordError::MissingSpecial);
        }

        Ok(Self {
            raw: SecretString::from(raw.to_string()),
        })
    }

    pub(crate) fn expose(&self) -> &str {
        self.raw.expose_secret()
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(redacted)")
    }
}

const fn is_special(byte: u8) -> bool {
    matches!(byte, 0x21..=0x2F | 0x3A..=0x40 | 0x7B..=0x7E)
}

/// Why a candidate OTP was rejected. Length and character-class failures are
/// distinguishable.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum OtpError {
    #[error("expected {expected} digits, received {received} characters")]
    InvalidLength { expected: usize, received: usize },
    #[error("code contains a non-numeric character")]
    NonNumeric,
}

/// A six-digit one-time password delivered over SMS or email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleOtp(String);

impl SimpleOtp {
    pub const LENGTH: usize = 6;

    /// Validate a six-digit code.
    ///
    /// # Errors
    /// Returns [`OtpError::InvalidLength`] or [`OtpError::NonNumeric`].
    pub fn parse(raw: &str) -> Result<Self, OtpError> {
        parse_digits(raw, Self::LENGTH).map(Self)
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// An eight-digit TOTP code from an authenticator app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Totp(String);

impl Totp {
    pub const LENGTH: usize = 8;

    /// Validate an eight-digit code.
    ///
    /// # Errors
    /// Returns [`OtpError::InvalidLength`] or [`OtpError::NonNumeric`].
    pub fn parse(raw: &str) -> Result<Self, OtpError> {
        parse_digits(raw, Self::LENGTH).map(Self)
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

/// Validity is folded across every byte with a bitwise AND so the scan time
/// is a function of length only.
fn parse_digits(raw: &str, expected: usize) -> Result<String, OtpError> {
    let bytes = raw.as_bytes();
    if bytes.len() != expected {
        return Err(OtpError::InvalidLength {
            expected,
            received: bytes.len(),
        });
    }

    let mut numeric = 1u8;
    for &byte in bytes {
        numeric &= u8::from(byte.wrapping_sub(b'0') <= 9);
    }
    if core::hint::black_box(numeric) == 0 {
        return Err(OtpError::NonNumeric);
    }
    Ok(raw.to_string())
}

/// The MFA methods the IdP knows about. Wire names are the exact variant
/// names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MfaKind {
    Totp,
    Sms,
    Email,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown MFA kind: {0}")]
pub struct UnknownMfaKind(pub String);

impl MfaKind {
    /// Case-insensitive parse of the three kind names.
    ///
    /// # Errors
    /// Returns [`UnknownMfaKind`] carrying the raw input.
    pub fn parse(raw: &str) -> Result<Self, UnknownMfaKind> {
        if raw.eq_ignore_ascii_case("totp") {
            Ok(Self::Totp)
        } else if raw.eq_ignore_ascii_case("sms") {
            Ok(Self::Sms)
        } else if raw.eq_ignore_ascii_case("email") {
            Ok(Self::Email)
        } else {
            Err(UnknownMfaKind(raw.to_string()))
        }
    }

    pub(crate) const fn wire_name(self) -> &'static str {
        match self {
            Self::Totp => "Totp",
            Self::Sms => "Sms",
            Self::Email => "Email",
        }
    }
}

impl std::fmt::Display for MfaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn accepts_passwords_with_all_classes() {
        for candidate in ["Password1234!", "aB3{def}", "XyZ9:rest-of-it", "A1b!A1b!"] {
            assert!(Password::parse(candidate).is_ok(), "rejected {candidate}");
        }
    }

    #[test]
    fn rejects_length_before_anything_else() {
        assert_eq!(
            Password::parse("Abc1!").err(),
            Some(PasswordError::TooFewChars { len: 5 })
        );
        let long = "Aa1!".repeat(19);
        assert_eq!(
            Password::parse(&long).err(),
            Some(PasswordError::TooManyChars { len: 76 })
        );
    }

    #[test]
    fn rejects_in_priority_order() {
        // Space is illegal and the string also lacks a digit; the illegal
        // character wins.
        assert_eq!(
            Password::parse("Abcdef gh").err(),
            Some(PasswordError::IllegalCharacter)
        );
        assert_eq!(
            Password::parse("abcdef1!").err(),
            Some(PasswordError::MissingUppercase)
        );
        assert_eq!(
            Password::parse("ABCDEF1!").err(),
            Some(PasswordError::MissingLowercase)
        );
        assert_eq!(
            Password::parse("Abcdefg!").err(),
            Some(PasswordError::MissingDigit)
        );
        assert_eq!(
            Password::parse("Abcdefg1").err(),
            Some(PasswordError::MissingSpecial)
        );
    }

    #[test]
    fn rejects_non_ascii_as_illegal() {
        assert_eq!(
            Password::parse("Pässword1!").err(),
            Some(PasswordError::IllegalCharacter)
        );
    }

    #[test]
    fn special_ranges_are_exact() {
        assert!(is_special(b'!'));
        assert!(is_special(b'/'));
        assert!(is_special(b':'));
        assert!(is_special(b'@'));
        assert!(is_special(b'{'));
        assert!(is_special(b'~'));
        assert!(!is_special(b' '));
        assert!(!is_special(b'0'));
        assert!(!is_special(b'A'));
        assert!(!is_special(0x7F));
    }

    #[test]
    fn password_debug_is_redacted() {
        let password = Password::parse("Password1234!").unwrap();
        assert_eq!(format!("{password:?}"), "Password(redacted)");
    }

    #[test]
    fn simple_otp_requires_six_digits() {
        assert!(SimpleOtp::parse("123456").is_ok());
        assert_eq!(
            SimpleOtp::parse("12345"),
            Err(OtpError::InvalidLength {
                expected: 6,
                received: 5
            })
        );
        assert_eq!(SimpleOtp::parse("12345a"), Err(OtpError::NonNumeric));
    }

    #[test]
    fn totp_requires_eight_digits() {
        assert!(Totp::parse("12345678").is_ok());
        assert_eq!(
            Totp::parse("123456789"),
            Err(OtpError::InvalidLength {
                expected: 8,
                received: 9
            })
        );
        assert_eq!(Totp::parse("1234567x"), Err(OtpError::NonNumeric));
    }

    #[test]
    fn mfa_kind_parses_case_insensitively() {
        assert_eq!(MfaKind::parse("totp").unwrap(), MfaKind::Totp);
        assert_eq!(MfaKind::parse("SMS").unwrap(), MfaKind::Sms);
        assert_eq!(MfaKind::parse("Email").unwrap(), MfaKind::Email);
        assert_eq!(
            MfaKind::parse("voice"),
            Err(UnknownMfaKind("voice".to_string()))
        );
    }

    #[test]
    fn mfa_kind_serializes_as_wire_name() {
        let value = serde_json::to_value(MfaKind::Sms).unwrap();
        assert_eq!(value, serde_json::json!("Sms"));
    }
}
