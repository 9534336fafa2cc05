//! Failure classification for git process output.

/// Substrings (lowercase) that mark a failure as a credentials problem.
/// Retrying cannot fix these.
const AUTH_SIGNALS: &[&str] = &[
    "403",
    "401",
    "authentication",
    "permission denied",
    "could not read username",
    "access denied",
];

const NOT_A_REPOSITORY_SIGNALS: &[&str] = &["not a git repository"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    NotARepository,
    Authentication,
    /// Anything else; the caller decides whether it is worth retrying.
    Other,
}

pub fn classify_failure(message: &str) -> FailureClass {
    let lower = message.to_lowercase();
    if NOT_A_REPOSITORY_SIGNALS.iter().any(|s| lower.contains(s)) {
        FailureClass::NotARepository
    } else if is_authentication_failure(&lower) {
        FailureClass::Authentication
    } else {
        FailureClass::Other
    }
}

pub fn is_authentication_failure(message: &str) -> bool {
    let lower = message.to_lowercase();
    AUTH_SIGNALS.iter().any(|s| lower.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_auth_codes() {
        assert_eq!(
            classify_failure("remote: Permission to acme/api.git denied.\nfatal: unable to access: The requested URL returned error: 403"),
            FailureClass::Authentication
        );
        assert_eq!(
            classify_failure("The requested URL returned error: 401"),
            FailureClass::Authentication
        );
    }

    #[test]
    fn test_auth_wording_is_case_insensitive() {
        for msg in [
            "fatal: Authentication failed for 'https://github.com/acme/api/'",
            "git@github.com: Permission denied (publickey).",
            "fatal: could not read Username for 'https://github.com': terminal prompts disabled",
            "ERROR: Access denied",
        ] {
            assert_eq!(classify_failure(msg), FailureClass::Authentication, "{msg}");
        }
    }

    #[test]
    fn test_network_errors_are_other() {
        for msg in [
            "fatal: unable to access 'https://github.com/acme/api/': Could not resolve host: github.com",
            "ssh: connect to host github.com port 22: Connection timed out",
            "error: RPC failed; curl 56 GnuTLS recv error (-9)",
        ] {
            assert_eq!(classify_failure(msg), FailureClass::Other, "{msg}");
        }
    }

    #[test]
    fn test_not_a_repository() {
        assert_eq!(
            classify_failure("fatal: not a git repository (or any of the parent directories): .git"),
            FailureClass::NotARepository
        );
    }
}
