use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

use codee::{Decoder, Encoder};
use snafu::Snafu;

#[derive(Debug, Clone, Snafu)]
pub enum StorageError {
    #[snafu(display("StorageError: Backend unavailable: {reason}"))]
    Unavailable { reason: String },

    #[snafu(display("StorageError: Could not write '{key}': {reason}"))]
    Write { key: String, reason: String },
}

/// Synchronous key-value storage. All engine state that has to survive a redirect lives here.
pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;

    fn clear(&self) -> Result<(), StorageError>;
}

/// Volatile storage. Used as the fallback when no durable backend is usable.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<RefCell<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries.borrow_mut().clear();
        Ok(())
    }
}

const PROBE_KEY: &str = "trust_session__probe";
const PROBE_VALUE: &str = "probe";

/// The storage backend the engine actually works with.
///
/// `durable` tells whether the host-provided backend passed the write probe. Without durable
/// storage nothing survives a redirect, so CSRF protection degrades to a no-op.
#[derive(Clone)]
pub struct StorageHandle {
    backend: Rc<dyn Storage>,
    durable: bool,
}

impl Debug for StorageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandle")
            .field("durable", &self.durable)
            .finish_non_exhaustive()
    }
}

impl StorageHandle {
    /// Use `durable` if it survives a write/read/remove round trip, an in-memory store otherwise.
    pub fn select(durable: Option<Rc<dyn Storage>>) -> Self {
        match durable {
            Some(backend) => match probe(backend.as_ref()) {
                Ok(()) => Self {
                    backend,
                    durable: true,
                },
                Err(err) => {
                    tracing::warn!(
                        ?err,
                        "Durable storage failed the write probe. Falling back to in-memory storage."
                    );
                    Self::memory()
                }
            },
            None => {
                tracing::debug!("No durable storage provided. Using in-memory storage.");
                Self::memory()
            }
        }
    }

    pub fn memory() -> Self {
        Self {
            backend: Rc::new(MemoryStorage::new()),
            durable: false,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.backend.get(key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.backend.set(key, value)
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.remove(key)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.backend.clear()
    }

    /// Read and decode a persisted value.
    ///
    /// A value that no longer decodes (its format changed between versions) is removed and
    /// reported as absent.
    pub(crate) fn read<T, C>(&self, key: &str) -> Result<Option<T>, StorageError>
    where
        C: Decoder<T, Encoded = str>,
        <C as Decoder<T>>::Error: Debug,
    {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };
        match C::decode(raw.as_str()) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::debug!(
                    ?err,
                    "Data format of '{key}' changed. Removing previously persisted value."
                );
                self.backend.remove(key)?;
                Ok(None)
            }
        }
    }

    pub(crate) fn write<T, C>(&self, key: &str, value: &T) -> Result<(), StorageError>
    where
        C: Encoder<T, Encoded = String>,
        <C as Encoder<T>>::Error: Debug,
    {
        let encoded = C::encode(value).map_err(|err| StorageError::Write {
            key: key.to_owned(),
            reason: format!("{err:?}"),
        })?;
        self.backend.set(key, &encoded).inspect_err(|err| {
            tracing::error!(?err, "Error writing '{key}' to storage.");
        })
    }
}

fn probe(backend: &dyn Storage) -> Result<(), StorageError> {
    backend.set(PROBE_KEY, PROBE_VALUE)?;
    let read = backend.get(PROBE_KEY)?;
    backend.remove(PROBE_KEY)?;
    match read.as_deref() {
        Some(PROBE_VALUE) => Ok(()),
        _ => Err(StorageError::Unavailable {
            reason: "probe value did not round-trip".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;
    use codee::string::JsonSerdeCodec;

    use super::*;

    /// Accepts writes but never returns anything, like a storage silently blocked by the browser.
    struct BlackHole;

    impl Storage for BlackHole {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    struct Throwing;

    impl Storage for Throwing {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable {
                reason: "denied".to_owned(),
            })
        }
        fn set(&self, key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Write {
                key: key.to_owned(),
                reason: "quota".to_owned(),
            })
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
        fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[test]
    fn working_backend_is_durable() {
        let backend = MemoryStorage::new();
        let handle = StorageHandle::select(Some(Rc::new(backend.clone())));
        assert_that(handle.is_durable()).is_true();
        // The probe cleans up after itself.
        assert_that(backend.is_empty()).is_true();
    }

    #[test]
    fn black_hole_backend_falls_back_to_memory() {
        let handle = StorageHandle::select(Some(Rc::new(BlackHole)));
        assert_that(handle.is_durable()).is_false();
        handle.set("a", "b").unwrap();
        assert_that(handle.get("a").unwrap()).is_equal_to(Some("b".to_owned()));
    }

    #[test]
    fn throwing_backend_falls_back_to_memory() {
        let handle = StorageHandle::select(Some(Rc::new(Throwing)));
        assert_that(handle.is_durable()).is_false();
    }

    #[test]
    fn missing_backend_is_not_durable() {
        assert_that(StorageHandle::select(None).is_durable()).is_false();
    }

    #[test]
    fn undecodable_values_are_removed() {
        let handle = StorageHandle::select(Some(Rc::new(MemoryStorage::new())));
        handle.set("key", "{not json").unwrap();
        let read = handle.read::<Vec<u32>, JsonSerdeCodec>("key").unwrap();
        assert_that(read).is_equal_to(None);
        assert_that(handle.get("key").unwrap()).is_equal_to(None);
    }

    #[test]
    fn typed_values_round_trip() {
        let handle = StorageHandle::memory();
        handle
            .write::<Vec<u32>, JsonSerdeCodec>("key", &vec![1, 2, 3])
            .unwrap();
        let read = handle.read::<Vec<u32>, JsonSerdeCodec>("key").unwrap();
        assert_that(read).is_equal_to(Some(vec![1, 2, 3]));
    }
}
