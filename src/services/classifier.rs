//! Connection outcome classification
//!
//! NetworkManager only reports failures as free text. This module maps that
//! text onto a fixed set of outcomes, each with a stable user message.

use serde::Serialize;
use std::fmt;

/// Why a single connection attempt failed
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ToolUnavailable,
    WrongPassword,
    ActivationFailed,
    NetworkNotFound,
    NetworkNotFoundOrWrongPassword,
    DeviceUnavailable,
    DeviceNotReady,
    Unclassified,
    Unknown,
}

impl FailureKind {
    /// Fixed user message. `None` for kinds that surface the raw tool text.
    pub fn message(self) -> Option<&'static str> {
        match self {
            Self::ToolUnavailable => {
                Some("Unable to run the network manager. Likely a wifi adapter issue.")
            }
            Self::WrongPassword => Some("Wrong password"),
            Self::ActivationFailed => Some("Connection activation failed."),
            Self::NetworkNotFound => Some("Could not find a wifi network with the specified SSID."),
            Self::NetworkNotFoundOrWrongPassword => {
                Some("The password is incorrect or the network could not be found.")
            }
            Self::DeviceUnavailable => Some("Could not connect. Possible hardware issue."),
            Self::DeviceNotReady => Some("The device is not ready."),
            Self::Unclassified => None,
            Self::Unknown => Some("Could not connect. Please try again."),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ToolUnavailable => "tool unavailable",
            Self::WrongPassword => "wrong password",
            Self::ActivationFailed => "activation failed",
            Self::NetworkNotFound => "network not found",
            Self::NetworkNotFoundOrWrongPassword => "network not found or wrong password",
            Self::DeviceUnavailable => "device unavailable",
            Self::DeviceNotReady => "device not ready",
            Self::Unclassified => "unclassified",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Classified result of one connection attempt
///
/// `raw` keeps the untranslated tool output for diagnostics.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ConnectionOutcome {
    Success { raw: String },
    Failure { kind: FailureKind, raw: String },
}

impl ConnectionOutcome {
    pub fn failure(kind: FailureKind, raw: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            raw: raw.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            Self::Success { raw } | Self::Failure { raw, .. } => raw,
        }
    }

    /// Human readable text shown to the user
    pub fn message(&self) -> String {
        match self {
            Self::Success { raw } => raw.clone(),
            Self::Failure { kind, raw } => kind
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| raw.clone()),
        }
    }
}

/// Output stream a rule inspects
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Ordered match table, first hit wins. Patterns are lowercase.
const RULES: &[(Stream, &str, Option<FailureKind>)] = &[
    (
        Stream::Stderr,
        "psk: property is invalid",
        Some(FailureKind::WrongPassword),
    ),
    (Stream::Stdout, "successfully activated", None),
    (
        Stream::Stdout,
        "connection activation failed",
        Some(FailureKind::ActivationFailed),
    ),
    (
        Stream::Stdout,
        "no network with ssid",
        Some(FailureKind::NetworkNotFound),
    ),
    (
        Stream::Stdout,
        "no valid secrets",
        Some(FailureKind::WrongPassword),
    ),
    (
        Stream::Stdout,
        "no suitable device found",
        Some(FailureKind::DeviceUnavailable),
    ),
    (
        Stream::Stdout,
        "device not ready",
        Some(FailureKind::DeviceNotReady),
    ),
    (
        Stream::Stdout,
        "invalid password",
        Some(FailureKind::WrongPassword),
    ),
    (
        Stream::Stdout,
        "could not be found or the password is incorrect",
        Some(FailureKind::NetworkNotFoundOrWrongPassword),
    ),
];

/// Classify the output of one `connect` invocation
///
/// Only one stream is inspected: stderr when it has content, stdout otherwise.
/// Text no rule recognizes is returned verbatim as `Unclassified`.
pub fn classify(stdout: &str, stderr: &str) -> ConnectionOutcome {
    let (stream, raw) = if !stderr.is_empty() {
        (Stream::Stderr, stderr)
    } else if !stdout.is_empty() {
        (Stream::Stdout, stdout)
    } else {
        return ConnectionOutcome::failure(FailureKind::Unknown, "");
    };

    let text = raw.to_lowercase();

    RULES
        .iter()
        .find(|(rule_stream, pattern, _)| *rule_stream == stream && text.contains(pattern))
        .map(|(_, _, kind)| match kind {
            None => ConnectionOutcome::Success {
                raw: raw.to_string(),
            },
            Some(kind) => ConnectionOutcome::failure(*kind, raw),
        })
        .unwrap_or_else(|| ConnectionOutcome::failure(FailureKind::Unclassified, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(stdout: &str, stderr: &str) -> Option<FailureKind> {
        classify(stdout, stderr).failure_kind()
    }

    mod stderr {
        use super::*;

        #[test]
        fn invalid_psk_is_wrong_password() {
            let outcome = classify("", "Error: 802-11-wireless-security.psk: property is invalid");
            assert_eq!(
                outcome,
                ConnectionOutcome::failure(
                    FailureKind::WrongPassword,
                    "Error: 802-11-wireless-security.psk: property is invalid"
                )
            );
            assert_eq!(outcome.message(), "Wrong password");
        }

        #[test]
        fn takes_precedence_over_stdout() {
            assert_eq!(
                kind_of(
                    "Device 'wlan1' successfully activated",
                    "Warning: something odd"
                ),
                Some(FailureKind::Unclassified)
            );
        }

        #[test]
        fn stdout_patterns_do_not_match_on_stderr() {
            let outcome = classify("", "Error: No network with SSID 'Foo' found.");
            assert_eq!(outcome.failure_kind(), Some(FailureKind::Unclassified));
            assert_eq!(outcome.message(), "Error: No network with SSID 'Foo' found.");
        }
    }

    mod stdout {
        use super::*;

        #[test]
        fn successfully_activated_is_success() {
            let outcome = classify("Connection successfully activated", "");
            assert!(outcome.is_success());
            assert_eq!(outcome.message(), "Connection successfully activated");
        }

        #[test]
        fn matches_are_case_insensitive() {
            assert_eq!(
                kind_of("Error: CONNECTION ACTIVATION FAILED: (7) Secrets were required", ""),
                Some(FailureKind::ActivationFailed)
            );
        }

        #[test]
        fn every_rule_maps_to_its_kind() {
            let cases = [
                ("Error: Connection activation failed.", FailureKind::ActivationFailed),
                ("Error: No network with SSID 'Foo' found.", FailureKind::NetworkNotFound),
                ("Secrets were required, but no valid secrets.", FailureKind::WrongPassword),
                ("Error: No suitable device found", FailureKind::DeviceUnavailable),
                ("Error: Device not ready", FailureKind::DeviceNotReady),
                ("Invalid password", FailureKind::WrongPassword),
                (
                    "The network could not be found or the password is incorrect",
                    FailureKind::NetworkNotFoundOrWrongPassword,
                ),
            ];

            for (stdout, kind) in cases {
                assert_eq!(kind_of(stdout, ""), Some(kind), "stdout: {stdout}");
            }
        }

        #[test]
        fn earlier_rules_win() {
            // contains both "activation failed" and "no valid secrets"
            assert_eq!(
                kind_of(
                    "Connection activation failed: no valid secrets were provided",
                    ""
                ),
                Some(FailureKind::ActivationFailed)
            );
            assert!(classify("successfully activated, device not ready", "").is_success());
        }

        #[test]
        fn unrecognized_text_is_surfaced_verbatim() {
            let outcome = classify("Something Brand New happened", "");
            assert_eq!(
                outcome,
                ConnectionOutcome::failure(FailureKind::Unclassified, "Something Brand New happened")
            );
            assert_eq!(outcome.message(), "Something Brand New happened");
        }
    }

    #[test]
    fn no_output_is_unknown() {
        let outcome = classify("", "");
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Unknown));
        assert_eq!(outcome.message(), "Could not connect. Please try again.");
    }

    #[test]
    fn classification_is_deterministic() {
        let inputs = [
            ("Connection successfully activated", ""),
            ("", "psk: property is invalid"),
            ("no network with ssid", ""),
            ("", ""),
            ("garbage", "more garbage"),
        ];

        let first: Vec<_> = inputs.iter().map(|(o, e)| classify(o, e)).collect();
        for _ in 0..3 {
            let again: Vec<_> = inputs.iter().rev().map(|(o, e)| classify(o, e)).collect();
            assert_eq!(first, again.into_iter().rev().collect::<Vec<_>>());
        }
    }

    #[test]
    fn every_failure_kind_has_a_message() {
        let kinds = [
            FailureKind::ToolUnavailable,
            FailureKind::WrongPassword,
            FailureKind::ActivationFailed,
            FailureKind::NetworkNotFound,
            FailureKind::NetworkNotFoundOrWrongPassword,
            FailureKind::DeviceUnavailable,
            FailureKind::DeviceNotReady,
            FailureKind::Unclassified,
            FailureKind::Unknown,
        ];

        for kind in kinds {
            let outcome = ConnectionOutcome::failure(kind, "raw tool text");
            assert!(!outcome.message().is_empty(), "{kind}");
        }
    }
}
