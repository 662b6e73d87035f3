//! Transaction submission with bounded retry.
//!
//! Network failures retry the same transaction id after an exponential
//! backoff, so a request that was actually applied upstream is never applied
//! twice. A duplicate-id rejection means the random id collided with an
//! unrelated transaction; the committer swaps in a fresh id and tries again.
//! A conflict is terminal for the attempt and left to the caller.

use std::time::Duration;

use crate::mutation::Transaction;
use crate::transport::{SubmitResult, Transport};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based): base * 2^(attempt-1),
    /// capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Accepted under this id; confirmation follows on the remote stream.
    Committed { transaction_id: String },
    /// Revision mismatch. The staged edits are preserved for the caller to
    /// rebase and recommit, or discard.
    Conflict {
        transaction_id: String,
        message: String,
    },
    /// Retries exhausted without an accept or reject.
    Failed {
        transaction_id: String,
        attempts: u32,
        message: String,
    },
}

pub struct Committer {
    policy: RetryPolicy,
    sleep: Box<dyn FnMut(Duration)>,
}

impl std::fmt::Debug for Committer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Committer")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Default for Committer {
    fn default() -> Self {
        Committer::new(RetryPolicy::default())
    }
}

impl Committer {
    pub fn new(policy: RetryPolicy) -> Self {
        Committer {
            policy,
            sleep: Box::new(std::thread::sleep),
        }
    }

    /// Replace the backoff sleeper. Tests pass a recording no-op.
    pub fn with_sleeper(policy: RetryPolicy, sleep: Box<dyn FnMut(Duration)>) -> Self {
        Committer { policy, sleep }
    }

    /// Submit `transaction`, retrying per the policy. May regenerate the
    /// transaction id on a duplicate-id rejection; the caller must pick up
    /// the final id from the outcome (and from `transaction` itself).
    pub fn submit<T: Transport>(
        &mut self,
        transport: &mut T,
        transaction: &mut Transaction,
    ) -> CommitOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match transport.submit(transaction) {
                SubmitResult::Success => {
                    log::debug!(
                        "transaction {} committed on attempt {attempt}",
                        transaction.id
                    );
                    return CommitOutcome::Committed {
                        transaction_id: transaction.id.clone(),
                    };
                }
                SubmitResult::Conflict { message } => {
                    log::warn!("transaction {} rejected: {message}", transaction.id);
                    return CommitOutcome::Conflict {
                        transaction_id: transaction.id.clone(),
                        message,
                    };
                }
                SubmitResult::DuplicateTransactionId => {
                    if attempt >= self.policy.max_attempts {
                        return CommitOutcome::Failed {
                            transaction_id: transaction.id.clone(),
                            attempts: attempt,
                            message: "transaction id kept colliding".to_owned(),
                        };
                    }
                    let old_id = transaction.id.clone();
                    let new_id = transaction.regenerate_id();
                    log::debug!("transaction id collision, {old_id} -> {new_id}");
                }
                SubmitResult::NetworkError { message } => {
                    if attempt >= self.policy.max_attempts {
                        return CommitOutcome::Failed {
                            transaction_id: transaction.id.clone(),
                            attempts: attempt,
                            message,
                        };
                    }
                    let delay = self.policy.delay_for(attempt);
                    log::debug!(
                        "transaction {} submit failed ({message}), retrying in {delay:?}",
                        transaction.id
                    );
                    (self.sleep)(delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::{Mutation, MutationEffect};
    use crate::transport::TransportError;
    use serde_json::Value;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct ScriptedTransport {
        script: Vec<SubmitResult>,
        submitted_ids: Vec<String>,
    }

    impl Transport for ScriptedTransport {
        fn attach(&mut self, _document_id: &str) {}
        fn detach(&mut self, _document_id: &str) {}
        fn submit(&mut self, transaction: &Transaction) -> SubmitResult {
            self.submitted_ids.push(transaction.id.clone());
            if self.script.is_empty() {
                SubmitResult::Success
            } else {
                self.script.remove(0)
            }
        }
        fn fetch_revision(
            &mut self,
            document_id: &str,
            _rev: &String,
        ) -> Result<Value, TransportError> {
            Err(TransportError::NotFound(document_id.to_owned()))
        }
    }

    fn txn() -> Transaction {
        Transaction::new(
            "txn-original",
            vec![Mutation::local("txn-original", "a", vec![MutationEffect::Delete])],
        )
    }

    fn no_sleep() -> (Rc<RefCell<Vec<Duration>>>, Box<dyn FnMut(Duration)>) {
        let slept = Rc::new(RefCell::new(Vec::new()));
        let handle = Rc::clone(&slept);
        (slept, Box::new(move |d| handle.borrow_mut().push(d)))
    }

    #[test]
    fn network_errors_retry_same_id_with_backoff() {
        let mut transport = ScriptedTransport {
            script: vec![
                SubmitResult::NetworkError {
                    message: "down".into(),
                },
                SubmitResult::NetworkError {
                    message: "down".into(),
                },
            ],
            submitted_ids: Vec::new(),
        };
        let (slept, sleep) = no_sleep();
        let mut committer = Committer::with_sleeper(RetryPolicy::default(), sleep);
        let mut transaction = txn();
        let outcome = committer.submit(&mut transport, &mut transaction);
        assert_eq!(
            outcome,
            CommitOutcome::Committed {
                transaction_id: "txn-original".into()
            }
        );
        assert_eq!(transport.submitted_ids, vec!["txn-original"; 3]);
        assert_eq!(
            *slept.borrow(),
            vec![Duration::from_millis(200), Duration::from_millis(400)]
        );
    }

    #[test]
    fn duplicate_id_gets_a_fresh_id() {
        let mut transport = ScriptedTransport {
            script: vec![SubmitResult::DuplicateTransactionId],
            submitted_ids: Vec::new(),
        };
        let (_, sleep) = no_sleep();
        let mut committer = Committer::with_sleeper(RetryPolicy::default(), sleep);
        let mut transaction = txn();
        let outcome = committer.submit(&mut transport, &mut transaction);
        let CommitOutcome::Committed { transaction_id } = outcome else {
            panic!("expected commit");
        };
        assert_ne!(transaction_id, "txn-original");
        assert_eq!(transaction.id, transaction_id);
        assert_eq!(transaction.mutations[0].transaction_id, transaction_id);
    }

    #[test]
    fn conflict_is_terminal() {
        let mut transport = ScriptedTransport {
            script: vec![SubmitResult::Conflict {
                message: "revision mismatch".into(),
            }],
            submitted_ids: Vec::new(),
        };
        let (slept, sleep) = no_sleep();
        let mut committer = Committer::with_sleeper(RetryPolicy::default(), sleep);
        let mut transaction = txn();
        let outcome = committer.submit(&mut transport, &mut transaction);
        assert!(matches!(outcome, CommitOutcome::Conflict { .. }));
        assert!(slept.borrow().is_empty());
        assert_eq!(transport.submitted_ids.len(), 1);
    }

    #[test]
    fn retries_exhaust_into_failed() {
        let mut transport = ScriptedTransport {
            script: vec![
                SubmitResult::NetworkError { message: "down".into() };
                10
            ],
            submitted_ids: Vec::new(),
        };
        let (_, sleep) = no_sleep();
        let mut committer = Committer::with_sleeper(RetryPolicy::default(), sleep);
        let mut transaction = txn();
        let outcome = committer.submit(&mut transport, &mut transaction);
        assert!(matches!(
            outcome,
            CommitOutcome::Failed { attempts: 5, .. }
        ));
        assert_eq!(transport.submitted_ids.len(), 5);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(20), Duration::from_secs(8));
    }
}
