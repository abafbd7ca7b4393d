//! Double-buffer handoff between one producer and one consumer.
//!
//! A [`BufferQueue`] owns a fixed set of at most [`MAX_BUFFERS`] externally
//! allocated buffer handles and moves them around a cycle:
//!
//! ```text
//!   free ──acquire_free──▶ producer ──publish_ready──▶ ready
//!    ▲                                                   │
//!    └──────release_free◀── consumer ◀──acquire_ready────┘
//! ```
//!
//! # Key Design: Role Handles
//!
//! [`BufferQueue::new`] returns a [`Producer`] and a [`Consumer`]. Each handle
//! carries the cursor it advances, takes `&mut self` on every transfer and is
//! not `Clone`, so "exactly one producer and one consumer" is a property of the
//! types rather than a convention. Both handles share the two counting
//! semaphores that track availability:
//!
//! 1. `free` starts at N and counts buffers the producer may fill
//! 2. `ready` starts at 0 and counts buffers the consumer may drain
//! 3. Cursors only ever advance by one modulo N, so the consumer sees buffers
//!    in exactly the order the producer filled them
//!
//! At any instant `free + ready + held_by_producer + held_by_consumer == N`.
//!
//! # Example
//!
//! ```
//! use vision_pool::BufferQueue;
//!
//! let (mut producer, mut consumer) = BufferQueue::new(&['A', 'B']).unwrap();
//!
//! let a = producer.acquire_free();
//! producer.publish_ready().unwrap();
//!
//! assert_eq!(consumer.acquire_ready(), a);
//! consumer.release_free().unwrap();
//! assert_eq!(producer.free_count(), 2);
//! ```

pub mod semaphore;

pub use semaphore::CountingSemaphore;

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Largest supported number of buffers per queue.
pub const MAX_BUFFERS: usize = 2;

/// Errors raised by [`BufferQueue`] construction and role-handle misuse.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Capacity must be between 1 and [`MAX_BUFFERS`].
    #[error("invalid queue capacity {capacity} (expected 1..={max})", max = MAX_BUFFERS)]
    InvalidCapacity {
        /// Number of buffers that was supplied.
        capacity: usize,
    },

    /// A handle tried to hand back a buffer it does not hold.
    #[error("{role} has no buffer checked out")]
    NotHeld {
        /// `"producer"` or `"consumer"`.
        role: &'static str,
    },
}

/// Shared state of a queue: the buffer table and both availability counters.
pub struct BufferQueue<B> {
    buffers: Box<[B]>,
    free: CountingSemaphore,
    ready: CountingSemaphore,
}

impl<B: Copy> BufferQueue<B> {
    /// Creates a queue over `buffers` and splits it into its two role handles.
    ///
    /// All buffers start free and both cursors start at slot 0.
    pub fn new(buffers: &[B]) -> Result<(Producer<B>, Consumer<B>), QueueError> {
        let capacity = buffers.len();
        if capacity == 0 || capacity > MAX_BUFFERS {
            return Err(QueueError::InvalidCapacity { capacity });
        }

        let shared = Arc::new(Self {
            buffers: buffers.into(),
            free: CountingSemaphore::new(capacity, capacity),
            ready: CountingSemaphore::new(0, capacity),
        });

        Ok((
            Producer {
                queue: Arc::clone(&shared),
                free_cursor: 0,
                held: 0,
            },
            Consumer {
                queue: shared,
                ready_cursor: 0,
                held: 0,
            },
        ))
    }
}

impl<B> BufferQueue<B> {
    fn capacity(&self) -> usize {
        self.buffers.len()
    }
}

/// Filling side of a [`BufferQueue`].
pub struct Producer<B> {
    queue: Arc<BufferQueue<B>>,
    free_cursor: usize,
    held: usize,
}

impl<B: Copy> Producer<B> {
    /// Takes the next free buffer, waiting indefinitely for one.
    ///
    /// This is the backpressure point: a producer that outruns its consumer
    /// parks here until `release_free` is called on the other side.
    pub fn acquire_free(&mut self) -> B {
        self.queue.free.take();
        self.take_slot()
    }

    /// Takes the next free buffer if one is available right now.
    ///
    /// Never blocks, so it is safe to call from interrupt context.
    #[must_use]
    pub fn try_acquire_free(&mut self) -> Option<B> {
        if !self.queue.free.try_take() {
            return None;
        }
        Some(self.take_slot())
    }

    fn take_slot(&mut self) -> B {
        let buf = self.queue.buffers[self.free_cursor];
        self.free_cursor = (self.free_cursor + 1) % self.queue.capacity();
        self.held += 1;
        buf
    }

    /// Marks the oldest buffer obtained from `acquire_free` as ready.
    pub fn publish_ready(&mut self) -> Result<(), QueueError> {
        if self.held == 0 {
            return Err(QueueError::NotHeld { role: "producer" });
        }
        self.held -= 1;
        let accepted = self.queue.ready.give();
        debug_assert!(accepted, "ready count exceeded capacity");
        Ok(())
    }
}

/// Draining side of a [`BufferQueue`].
pub struct Consumer<B> {
    queue: Arc<BufferQueue<B>>,
    ready_cursor: usize,
    held: usize,
}

impl<B: Copy> Consumer<B> {
    /// Takes the next ready buffer, waiting indefinitely for one.
    pub fn acquire_ready(&mut self) -> B {
        self.queue.ready.take();
        self.take_slot()
    }

    /// Takes the next ready buffer if one is available right now.
    #[must_use]
    pub fn try_acquire_ready(&mut self) -> Option<B> {
        if !self.queue.ready.try_take() {
            return None;
        }
        Some(self.take_slot())
    }

    fn take_slot(&mut self) -> B {
        let buf = self.queue.buffers[self.ready_cursor];
        trace!(slot = self.ready_cursor, "buffer handed to consumer");
        self.ready_cursor = (self.ready_cursor + 1) % self.queue.capacity();
        self.held += 1;
        buf
    }

    /// Returns the oldest buffer obtained from `acquire_ready` to the free
    /// pool.
    pub fn release_free(&mut self) -> Result<(), QueueError> {
        if self.held == 0 {
            return Err(QueueError::NotHeld { role: "consumer" });
        }
        self.held -= 1;
        let accepted = self.queue.free.give();
        debug_assert!(accepted, "free count exceeded capacity");
        Ok(())
    }
}

macro_rules! queue_queries {
    ($handle:ident) => {
        impl<B> $handle<B> {
            /// Buffers available to the producer.
            #[must_use]
            pub fn free_count(&self) -> usize {
                self.queue.free.count()
            }

            /// Buffers available to the consumer.
            #[must_use]
            pub fn ready_count(&self) -> usize {
                self.queue.ready.count()
            }

            /// Total number of buffers in the queue.
            #[must_use]
            pub fn capacity(&self) -> usize {
                self.queue.capacity()
            }

            /// Buffers currently checked out by this handle.
            #[must_use]
            pub fn held(&self) -> usize {
                self.held
            }
        }

        impl<B> fmt::Debug for $handle<B> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($handle))
                    .field("capacity", &self.capacity())
                    .field("free", &self.free_count())
                    .field("ready", &self.ready_count())
                    .field("held", &self.held)
                    .finish()
            }
        }
    };
}

queue_queries!(Producer);
queue_queries!(Consumer);
