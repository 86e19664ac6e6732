//! Retryable vs fatal classification of database errors

use crate::DatabaseError;
use std::fmt;
use std::io::ErrorKind;

/// serialization_failure
pub const SERIALIZATION_FAILURE: &str = "40001";
/// deadlock_detected
pub const DEADLOCK_DETECTED: &str = "40P01";
/// statement_completion_unknown
pub const STATEMENT_COMPLETION_UNKNOWN: &str = "40003";
/// Class 08: connection exception
pub const CONNECTION_EXCEPTION_CLASS: &str = "08";
/// Class 57: operator intervention, including query_canceled from statement_timeout
pub const OPERATOR_INTERVENTION_CLASS: &str = "57";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryReason {
    SerializationFailure,
    DeadlockDetected,
    CompletionUnknown,
    ConnectionException,
    OperatorIntervention,
    TransportEof,
}

impl RetryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryReason::SerializationFailure => "serialization_failure",
            RetryReason::DeadlockDetected => "deadlock_detected",
            RetryReason::CompletionUnknown => "completion_unknown",
            RetryReason::ConnectionException => "connection_exception",
            RetryReason::OperatorIntervention => "operator_intervention",
            RetryReason::TransportEof => "transport_eof",
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable(RetryReason),
    Fatal,
}

/// Decide whether `err` is safe to retry.
///
/// Rules are checked in order: transactional SQLSTATEs, connection and
/// operator-intervention classes, then transport end-of-stream. Anything
/// else is fatal.
pub fn classify(err: &DatabaseError) -> ErrorClass {
    if let Some(code) = err.code() {
        match code {
            SERIALIZATION_FAILURE => return ErrorClass::Retryable(RetryReason::SerializationFailure),
            DEADLOCK_DETECTED => return ErrorClass::Retryable(RetryReason::DeadlockDetected),
            STATEMENT_COMPLETION_UNKNOWN => {
                return ErrorClass::Retryable(RetryReason::CompletionUnknown)
            }
            _ => {}
        }

        match code.get(..2) {
            Some(CONNECTION_EXCEPTION_CLASS) => {
                return ErrorClass::Retryable(RetryReason::ConnectionException)
            }
            Some(OPERATOR_INTERVENTION_CLASS) => {
                return ErrorClass::Retryable(RetryReason::OperatorIntervention)
            }
            _ => {}
        }
    }

    if let DatabaseError::Io { kind, message } = err {
        if *kind == ErrorKind::UnexpectedEof || is_eof_message(message) {
            return ErrorClass::Retryable(RetryReason::TransportEof);
        }
    }

    ErrorClass::Fatal
}

fn is_eof_message(message: &str) -> bool {
    let msg = message.to_lowercase();
    msg.contains("eof detected") || msg.contains("unexpected eof")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(code: &str) -> DatabaseError {
        DatabaseError::sqlstate(code, "boom")
    }

    #[test]
    fn test_transactional_errors_are_retryable() {
        assert_eq!(
            classify(&db("40001")),
            ErrorClass::Retryable(RetryReason::SerializationFailure)
        );
        assert_eq!(
            classify(&db("40P01")),
            ErrorClass::Retryable(RetryReason::DeadlockDetected)
        );
        assert_eq!(
            classify(&db("40003")),
            ErrorClass::Retryable(RetryReason::CompletionUnknown)
        );
    }

    #[test]
    fn test_connection_classes_are_retryable() {
        for code in ["08000", "08003", "08006", "08001", "08P01"] {
            assert_eq!(
                classify(&db(code)),
                ErrorClass::Retryable(RetryReason::ConnectionException),
                "{code}"
            );
        }
        for code in ["57000", "57014", "57P01", "57P02", "57P03"] {
            assert_eq!(
                classify(&db(code)),
                ErrorClass::Retryable(RetryReason::OperatorIntervention),
                "{code}"
            );
        }
    }

    #[test]
    fn test_transport_eof_is_retryable() {
        let eof = DatabaseError::Io {
            kind: ErrorKind::UnexpectedEof,
            message: "failed to fill whole buffer".to_string(),
        };
        assert_eq!(classify(&eof), ErrorClass::Retryable(RetryReason::TransportEof));

        let ssl = DatabaseError::Io {
            kind: ErrorKind::Other,
            message: "SSL SYSCALL error: EOF detected".to_string(),
        };
        assert_eq!(classify(&ssl), ErrorClass::Retryable(RetryReason::TransportEof));
    }

    #[test]
    fn test_unrelated_errors_are_fatal() {
        // unique_violation, foreign_key_violation, undefined_table, syntax_error, division_by_zero
        for code in ["23505", "23503", "42P01", "42601", "22012", "40002"] {
            assert_eq!(classify(&db(code)), ErrorClass::Fatal, "{code}");
        }

        let reset = DatabaseError::Io {
            kind: ErrorKind::ConnectionRefused,
            message: "connection refused".to_string(),
        };
        assert_eq!(classify(&reset), ErrorClass::Fatal);

        assert_eq!(classify(&DatabaseError::PoolUnavailable { attempts: 5 }), ErrorClass::Fatal);
        assert_eq!(classify(&DatabaseError::Query("no rows".to_string())), ErrorClass::Fatal);
        assert_eq!(
            classify(&DatabaseError::Database {
                code: None,
                message: "mystery".to_string()
            }),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_short_codes_do_not_panic() {
        assert_eq!(classify(&db("0")), ErrorClass::Fatal);
        assert_eq!(classify(&db("")), ErrorClass::Fatal);
    }
}
