// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coalescing key derivation.
//!
//! Two calls coalesce when their keys are equal. A key is either supplied directly by the
//! caller, or derived from the call arguments by a [`KeyFn`]. The default derivation,
//! [`ArgsKey`], hashes a canonical encoding of the unit of work's identity and its arguments.
//!
//! Derived keys are advisory: they are built on a strong 128-bit hash, not a cryptographic
//! one, and distinct arguments colliding is improbable but not impossible.

use std::{
    borrow::Cow,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::Serialize;
use xxhash_rust::xxh3::Xxh3;

use crate::error::KeyError;

/// Derives a coalescing key from the arguments of a call.
///
/// Implemented for every `Fn(&A) -> K` closure, which covers keys built from a subset of the
/// arguments, constant keys and unique keys. [`ArgsKey`] is the default implementation.
pub trait KeyFn<A: ?Sized, K> {
    /// Returns the key for a call with the given arguments.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the arguments cannot be encoded.
    fn key(&self, args: &A) -> Result<K, KeyError>;
}

impl<A: ?Sized, K, F> KeyFn<A, K> for F
where
    F: Fn(&A) -> K,
{
    fn key(&self, args: &A) -> Result<K, KeyError> {
        Ok(self(args))
    }
}

/// Derives keys by hashing the unit of work's identity together with its arguments.
///
/// The resulting key has the shape `identity:hash`, where the hash covers a canonical JSON
/// encoding of the arguments. Map-like arguments are encoded with sorted keys, so two values
/// that compare equal produce the same key regardless of iteration order.
#[derive(Debug, Clone)]
pub struct ArgsKey {
    identity: Cow<'static, str>,
}

impl ArgsKey {
    /// Creates a key derivation for the unit of work named `identity`.
    #[must_use]
    pub fn new(identity: impl Into<Cow<'static, str>>) -> Self {
        Self { identity: identity.into() }
    }

    /// Creates a key derivation named after the type of `F`.
    ///
    /// For function items this is the fully qualified function path. Every closure in a function
    /// shares the name `path::{{closure}}`, so closure identities also carry a process-wide
    /// sequence number and each call returns a distinct identity.
    #[must_use]
    pub fn of<F>() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);

        let name = std::any::type_name::<F>();
        if name.contains("{{closure}}") {
            Self::new(format!("{name}#{}", NEXT.fetch_add(1, Ordering::Relaxed)))
        } else {
            Self::new(name)
        }
    }

    /// The identity prefixed to every key this derivation produces.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }
}

impl<A, K> KeyFn<A, K> for ArgsKey
where
    A: Serialize + ?Sized,
    K: From<String>,
{
    fn key(&self, args: &A) -> Result<K, KeyError> {
        derive(&self.identity, args).map(K::from)
    }
}

/// Derives the key of a call to `identity` with `args`.
///
/// # Errors
///
/// Returns [`KeyError`] if `args` cannot be represented as JSON, for example a map whose keys
/// are not strings.
///
/// # Examples
///
/// ```
/// let a = coalescer::key::derive("app::load_user", &(42, "eu")).unwrap();
/// let b = coalescer::key::derive("app::load_user", &(42, "eu")).unwrap();
/// let c = coalescer::key::derive("app::load_user", &(43, "eu")).unwrap();
///
/// assert_eq!(a, b);
/// assert_ne!(a, c);
/// assert!(a.starts_with("app::load_user:"));
/// ```
pub fn derive<A>(identity: &str, args: &A) -> Result<String, KeyError>
where
    A: Serialize + ?Sized,
{
    // Going through `Value` sorts object keys, which makes the encoding canonical.
    let canonical = serde_json::to_value(args)
        .and_then(|value| serde_json::to_vec(&value))
        .map_err(|e| KeyError::caused_by(identity.to_owned(), e))?;

    let mut hasher = Xxh3::new();
    hasher.update(identity.as_bytes());
    hasher.update(&[0]);
    hasher.update(&canonical);

    Ok(format!("{identity}:{:032x}", hasher.digest128()))
}

/// A key function that maps every call to `key`, coalescing all concurrent calls.
pub fn constant<A: ?Sized, K: Clone>(key: K) -> impl Fn(&A) -> K {
    move |_: &A| key.clone()
}

/// A key function that produces a fresh key for every call, disabling coalescing.
pub fn unique<A: ?Sized>() -> impl Fn(&A) -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    |_: &A| format!("unique:{}", NEXT.fetch_add(1, Ordering::Relaxed))
}
