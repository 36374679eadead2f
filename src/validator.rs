//! Ordered validation chain with per-key error classification
//!
//! Checks are evaluated against a subject in registration order and
//! short-circuit on the first failure. A failing check raises an
//! `UploadError` tagged `ValidationError<Key>`; the chain itself never
//! retries and never logs.

use crate::errors::{validation_code, ErrorRegistry, UploadError};
use futures::future::{self, LocalBoxFuture};
use std::future::Future;

type Predicate<S> = Box<dyn Fn(&S) -> LocalBoxFuture<'static, bool> + Send + Sync>;

/// A single named check: a predicate over the subject plus an optional
/// HTTP response registered under the check's derived error code.
pub struct ValidationCheck<S> {
    is_valid: Option<Predicate<S>>,
    response: Option<(u16, String)>,
}

impl<S> ValidationCheck<S> {
    /// Check with a synchronous predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&S) -> bool + Send + Sync + 'static,
    {
        Self {
            is_valid: Some(Box::new(move |subject| {
                let verdict = predicate(subject);
                let fut: LocalBoxFuture<'static, bool> = Box::pin(future::ready(verdict));
                fut
            })),
            response: None,
        }
    }

    /// Check with an asynchronous predicate. The predicate receives the
    /// subject by reference and must return an owned future.
    pub fn new_async<F, Fut>(predicate: F) -> Self
    where
        F: Fn(&S) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + 'static,
    {
        Self {
            is_valid: Some(Box::new(move |subject| {
                let fut: LocalBoxFuture<'static, bool> = Box::pin(predicate(subject));
                fut
            })),
            response: None,
        }
    }

    /// Check carrying only a response. Registering it without supplying a
    /// predicate is a programming error caught by `Validator::add`.
    pub fn response_only(status: u16, message: &str) -> Self {
        Self {
            is_valid: None,
            response: Some((status, message.to_string())),
        }
    }

    /// Attach a custom HTTP response to this check.
    pub fn response(mut self, status: u16, message: &str) -> Self {
        self.response = Some((status, message.to_string()));
        self
    }
}

/// Keyed collection of checks, evaluated in registration order.
pub struct Validator<S> {
    checks: Vec<(String, Predicate<S>)>,
}

impl<S> Validator<S> {
    pub fn new() -> Self {
        Self { checks: Vec::new() }
    }

    /// Register checks. A check with a response contributes an entry to the
    /// registry under `ValidationError<Key>`. Registering the same key again
    /// replaces the earlier check in place, keeping its evaluation position.
    ///
    /// # Panics
    ///
    /// Panics when a check has no predicate. This is a wiring error and must
    /// surface at startup, not at verification time.
    pub fn add<I>(&mut self, registry: &mut ErrorRegistry, checks: I)
    where
        I: IntoIterator<Item = (String, ValidationCheck<S>)>,
    {
        for (key, check) in checks {
            let predicate = match check.is_valid {
                Some(predicate) => predicate,
                None => panic!("validation check '{}' registered without a predicate", key),
            };
            if let Some((status, message)) = check.response {
                registry.register(&validation_code(&key), status, &message);
            }
            match self.checks.iter_mut().find(|(existing, _)| *existing == key) {
                Some(slot) => slot.1 = predicate,
                None => self.checks.push((key, predicate)),
            }
        }
    }

    /// Evaluate every check against the subject in registration order.
    /// Fails on the first falsy result; later checks are not evaluated.
    pub async fn verify(&self, subject: &S) -> Result<(), UploadError> {
        for (key, predicate) in &self.checks {
            if !predicate(subject).await {
                return Err(UploadError::validation(key));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }
}

impl<S> Default for Validator<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct TestObj {
        prop: i64,
    }

    #[actix_web::test]
    async fn test_sync_check_rejects_with_derived_code() {
        let mut registry = ErrorRegistry::new();
        let mut validation = Validator::new();
        validation.add(
            &mut registry,
            vec![(
                "first".to_string(),
                ValidationCheck::new(|p: &TestObj| p.prop > 20),
            )],
        );

        let err = validation.verify(&TestObj { prop: 10 }).await.unwrap_err();
        assert_eq!(err.code, "ValidationErrorFirst");
        assert!(validation.verify(&TestObj { prop: 30 }).await.is_ok());
    }

    #[actix_web::test]
    async fn test_async_check_rejects_with_derived_code() {
        let mut registry = ErrorRegistry::new();
        let mut validation = Validator::new();
        validation.add(
            &mut registry,
            vec![(
                "first".to_string(),
                ValidationCheck::new_async(|p: &TestObj| {
                    let prop = p.prop;
                    async move { prop > 20 }
                }),
            )],
        );

        let err = validation.verify(&TestObj { prop: 10 }).await.unwrap_err();
        assert_eq!(err.code, "ValidationErrorFirst");
    }

    #[actix_web::test]
    async fn test_custom_response_registers_into_registry() {
        let mut registry = ErrorRegistry::new();
        let mut validation = Validator::new();
        validation.add(
            &mut registry,
            vec![(
                "first".to_string(),
                ValidationCheck::new(|p: &TestObj| p.prop > 20).response(400, "error"),
            )],
        );

        assert!(registry.contains("ValidationErrorFirst"));
        let err = validation.verify(&TestObj { prop: 10 }).await.unwrap_err();
        assert_eq!(err.code, "ValidationErrorFirst");
    }

    #[test]
    #[should_panic(expected = "without a predicate")]
    fn test_missing_predicate_panics_at_registration() {
        let mut registry = ErrorRegistry::new();
        let mut validation: Validator<TestObj> = Validator::new();
        validation.add(
            &mut registry,
            vec![(
                "first".to_string(),
                ValidationCheck::response_only(400, "error"),
            )],
        );
    }

    #[actix_web::test]
    async fn test_first_failure_short_circuits_later_checks() {
        let mut registry = ErrorRegistry::new();
        let mut validation = Validator::new();
        let evaluated = Arc::new(AtomicUsize::new(0));
        let second_counter = evaluated.clone();
        let third_counter = evaluated.clone();
        validation.add(
            &mut registry,
            vec![
                (
                    "first".to_string(),
                    ValidationCheck::new(|p: &TestObj| p.prop > 20),
                ),
                (
                    "second".to_string(),
                    ValidationCheck::new(move |_: &TestObj| {
                        second_counter.fetch_add(1, Ordering::SeqCst);
                        true
                    }),
                ),
                (
                    "third".to_string(),
                    ValidationCheck::new(move |_: &TestObj| {
                        third_counter.fetch_add(1, Ordering::SeqCst);
                        true
                    }),
                ),
            ],
        );

        let err = validation.verify(&TestObj { prop: 10 }).await.unwrap_err();
        assert_eq!(err.code, "ValidationErrorFirst");
        assert_eq!(evaluated.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_duplicate_key_replaces_check_in_place() {
        let mut registry = ErrorRegistry::new();
        let mut validation = Validator::new();
        validation.add(
            &mut registry,
            vec![
                (
                    "first".to_string(),
                    ValidationCheck::new(|_: &TestObj| false),
                ),
                (
                    "second".to_string(),
                    ValidationCheck::new(|p: &TestObj| p.prop > 20),
                ),
            ],
        );
        // Re-registering `first` keeps its position but swaps the predicate.
        validation.add(
            &mut registry,
            vec![("first".to_string(), ValidationCheck::new(|_: &TestObj| true))],
        );

        assert_eq!(validation.len(), 2);
        let err = validation.verify(&TestObj { prop: 10 }).await.unwrap_err();
        assert_eq!(err.code, "ValidationErrorSecond");
    }
}
