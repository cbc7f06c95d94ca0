use std::future::Future;

use crate::error::{AgentError, Result};

/// Ordered, non-empty list of model credentials.
#[derive(Clone)]
pub struct CredentialSet {
    keys: Vec<String>,
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("len", &self.keys.len())
            .finish()
    }
}

impl CredentialSet {
    pub fn new(keys: Vec<String>) -> Result<Self> {
        if keys.is_empty() {
            return Err(AgentError::NoCredentials);
        }
        Ok(Self { keys })
    }

    pub fn single(key: impl Into<String>) -> Self {
        Self {
            keys: vec![key.into()],
        }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Successful outcome of [`try_in_order`].
#[derive(Debug)]
pub struct Fallback<T, E> {
    pub value: T,
    /// Position of the item that produced `value`.
    pub index: usize,
    /// Errors from the items tried before it.
    pub failures: Vec<E>,
}

/// Every item was tried and every attempt failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub errors: Vec<E>,
}

impl<E> Exhausted<E> {
    pub fn last(&self) -> Option<&E> {
        self.errors.last()
    }
}

/// Run `attempt` against each item in order and stop at the first success.
///
/// Attempts are strictly sequential. An empty `items` slice is exhausted with
/// no errors.
pub async fn try_in_order<'a, I, T, E, F, Fut>(
    items: &'a [I],
    mut attempt: F,
) -> std::result::Result<Fallback<T, E>, Exhausted<E>>
where
    F: FnMut(usize, &'a I) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut errors = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match attempt(index, item).await {
            Ok(value) => {
                return Ok(Fallback {
                    value,
                    index,
                    failures: errors,
                })
            }
            Err(err) => errors.push(err),
        }
    }
    Err(Exhausted { errors })
}
