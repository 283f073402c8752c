//! Bounded pool of reusable encoder/decoder states.

use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use crate::codec::wire::{ValueDecoder, ValueEncoder};
use crate::sync::mutex_lock;

/// State that can be handed back to a pool and reused.
pub trait PooledState: Default + Send {
    /// A ready-to-use state with well-known types registered.
    fn bootstrapped() -> Self;
    /// Drop anything specific to the last use.
    fn reset(&mut self);
}

impl PooledState for ValueEncoder {
    fn bootstrapped() -> Self {
        ValueEncoder::new()
    }
    fn reset(&mut self) {
        ValueEncoder::reset(self)
    }
}

impl PooledState for ValueDecoder {
    fn bootstrapped() -> Self {
        ValueDecoder::new()
    }
    fn reset(&mut self) {
        ValueDecoder::reset(self)
    }
}

#[derive(Debug)]
pub struct StatePool<S: PooledState> {
    idle: Mutex<Vec<S>>,
    max_idle: usize,
}

impl<S: PooledState> StatePool<S> {
    /// Pool keeping at most `max_idle` states, pre-warmed with one.
    pub fn new(max_idle: usize) -> Self {
        let pool = Self {
            idle: Mutex::new(Vec::with_capacity(max_idle.min(8))),
            max_idle,
        };
        pool.release(S::bootstrapped());
        pool
    }

    pub fn acquire(&self) -> Pooled<'_, S> {
        let state = mutex_lock(&self.idle, "codec_pool", "acquire")
            .pop()
            .unwrap_or_else(S::bootstrapped);
        Pooled { pool: self, state }
    }

    fn release(&self, mut state: S) {
        state.reset();
        let mut idle = mutex_lock(&self.idle, "codec_pool", "release");
        if idle.len() < self.max_idle {
            idle.push(state);
        }
    }

    pub fn idle(&self) -> usize {
        mutex_lock(&self.idle, "codec_pool", "idle").len()
    }
}

/// A state on loan from a [`StatePool`]; returned on drop.
pub struct Pooled<'a, S: PooledState> {
    pool: &'a StatePool<S>,
    state: S,
}

impl<S: PooledState> Deref for Pooled<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.state
    }
}

impl<S: PooledState> DerefMut for Pooled<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.state
    }
}

impl<S: PooledState> Drop for Pooled<'_, S> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.state));
    }
}
