use std::io;

use crate::stats::Outcome;

/// How a failed outbound attempt is accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Timeout,
    Error,
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Timeout => Outcome::Timeout,
            Failure::Error => Outcome::Error,
        }
    }
}

/// Classifies a transport error as a timeout or a hard error.
///
/// Deterministic and side-effect free. Typed signals are inspected first by
/// walking the source chain: an elapsed deadline, a cancelled hyper request,
/// or a refused/timed-out connection all count as timeouts. String matching
/// on the rendered chain is kept only as a fallback for transports that
/// report these conditions as opaque text.
pub fn classify(err: &(dyn std::error::Error + 'static)) -> Failure {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = current {
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return Failure::Timeout;
        }

        if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
            if hyper_err.is_canceled() || hyper_err.is_timeout() {
                return Failure::Timeout;
            }
        }

        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            match io_err.kind() {
                io::ErrorKind::ConnectionRefused | io::ErrorKind::TimedOut => {
                    return Failure::Timeout;
                }
                _ => {}
            }
        }

        current = cause.source();
    }

    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("connection refused")
            || text.contains("operation canceled")
            || text.contains("request canceled")
        {
            return Failure::Timeout;
        }
        current = cause.source();
    }

    Failure::Error
}
