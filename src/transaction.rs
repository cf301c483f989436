//! Session-scoped transactions around multi-document operations.

use tracing::warn;

use crate::error::DaoError;
use crate::store::DocumentStore;

/// Run `op` atomically.
///
/// A caller-supplied session is reused as is: the caller owns its transaction
/// and decides when to commit or abort. Without one, a session is opened and
/// `op` runs in a fresh transaction (see [`run_in_transaction`]).
pub fn with_transaction<S, T, F>(
    store: &S,
    session: Option<&S::Session>,
    max_retries: u32,
    mut op: F,
) -> Result<T, DaoError>
where
    S: DocumentStore,
    F: FnMut(&S::Session) -> Result<T, DaoError>,
{
    match session {
        Some(session) => op(session),
        None => run_in_transaction(store, max_retries, op),
    }
}

/// Open a session, run `op` in a transaction and commit it; abort when `op` fails.
///
/// Transient failures (write conflicts) restart the whole transaction up to
/// `max_retries` times, so `op` may run more than once.
pub fn run_in_transaction<S, T, F>(store: &S, max_retries: u32, mut op: F) -> Result<T, DaoError>
where
    S: DocumentStore,
    F: FnMut(&S::Session) -> Result<T, DaoError>,
{
    let mut attempt = 0;
    loop {
        let session = store.start_session()?;
        store.start_transaction(&session)?;

        let err = match op(&session) {
            Ok(value) => match store.commit_transaction(&session) {
                Ok(()) => return Ok(value),
                Err(err) => DaoError::from(err),
            },
            Err(err) => {
                if let Err(abort_err) = store.abort_transaction(&session) {
                    warn!(error = %abort_err, "failed to abort transaction");
                }
                err
            }
        };

        if err.is_transient() && attempt < max_retries {
            attempt += 1;
            warn!(attempt, max_retries, error = %err, "retrying transaction");
            continue;
        }
        return Err(err);
    }
}
