// SPDX-License-Identifier: GPL-3.0-only

//! Scoped ownership of external handles
//!
//! Accelerator devices, decode sessions, texture caches, mapped staging
//! buffers and locked pixel buffers all share one shape: a handle that must
//! be released exactly once, on every exit path. [`Scoped`] owns one such
//! handle and releases it when dropped unless ownership was taken back with
//! [`Scoped::into_inner`].

use std::ops::{Deref, DerefMut};

/// An external resource with an explicit release step
pub trait Releasable {
    /// Release the underlying resource. Called at most once by [`Scoped`].
    fn release(&mut self);
}

impl<T: Releasable + ?Sized> Releasable for Box<T> {
    fn release(&mut self) {
        (**self).release();
    }
}

/// Owns one external handle and releases it on drop
pub struct Scoped<T: Releasable> {
    handle: Option<T>,
}

impl<T: Releasable> Scoped<T> {
    /// Take ownership of an already-acquired handle
    pub fn new(handle: T) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Give up ownership without releasing
    pub fn into_inner(mut self) -> T {
        // `handle` is only ever `None` after this call or inside drop
        match self.handle.take() {
            Some(handle) => handle,
            None => unreachable!("scoped handle already taken"),
        }
    }

    /// Release now instead of at end of scope
    pub fn release_now(self) {
        drop(self);
    }
}

impl<T: Releasable> Deref for Scoped<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("scoped handle already taken"),
        }
    }
}

impl<T: Releasable> DerefMut for Scoped<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.handle {
            Some(handle) => handle,
            None => unreachable!("scoped handle already taken"),
        }
    }
}

impl<T: Releasable> Drop for Scoped<T> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.release();
        }
    }
}

impl<T: Releasable + std::fmt::Debug> std::fmt::Debug for Scoped<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Scoped").field(&self.handle).finish()
    }
}
