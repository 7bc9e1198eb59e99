//! Blocking one-shot channel.
//!
//! The receiving thread parks until the single message arrives or the sender
//! is dropped. Used as the acknowledgement a caller waits on after handing
//! work to another thread.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering::*;
use std::sync::Arc;
use std::thread::{self, Thread};

const EMPTY: u8 = 0;
const READY: u8 = 1;
/// Sender dropped without sending.
const CLOSED: u8 = 2;
/// Message moved out by the receiver.
const TAKEN: u8 = 3;

struct Channel<T> {
    message: UnsafeCell<MaybeUninit<T>>,
    state: AtomicU8,
}

// Sharing the channel only ever moves a T between threads.
unsafe impl<T> Sync for Channel<T> where T: Send {}

impl<T> Drop for Channel<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == READY {
            unsafe { self.message.get_mut().assume_init_drop() }
        }
    }
}

pub struct Sender<T> {
    channel: Arc<Channel<T>>,
    receiving_thread: Thread,
}

pub struct Receiver<T> {
    channel: Arc<Channel<T>>,
    // Parking only works for the thread that created the channel.
    _no_send: PhantomData<*const ()>,
}

/// Creates a channel whose receiver belongs to the calling thread.
pub fn oneshot<T>() -> (Sender<T>, Receiver<T>) {
    let channel = Arc::new(Channel {
        message: UnsafeCell::new(MaybeUninit::uninit()),
        state: AtomicU8::new(EMPTY),
    });
    (
        Sender {
            channel: channel.clone(),
            receiving_thread: thread::current(),
        },
        Receiver {
            channel,
            _no_send: PhantomData,
        },
    )
}

impl<T> Sender<T> {
    /// Consumes the sender, so at most one message is ever written.
    pub fn send(self, message: T) {
        unsafe { (*self.channel.message.get()).write(message) };
        self.channel.state.store(READY, Release);
        self.receiving_thread.unpark();
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        // No-op after `send`, which already moved the state past EMPTY.
        if self
            .channel
            .state
            .compare_exchange(EMPTY, CLOSED, Release, Relaxed)
            .is_ok()
        {
            self.receiving_thread.unpark();
        }
    }
}

impl<T> Receiver<T> {
    /// Parks until the message arrives. Returns `None` if the sender was
    /// dropped without sending.
    pub fn receive(self) -> Option<T> {
        loop {
            match self.channel.state.load(Acquire) {
                READY => break,
                CLOSED => return None,
                _ => thread::park(),
            }
        }
        let message = unsafe { (*self.channel.message.get()).assume_init_read() };
        self.channel.state.store(TAKEN, Relaxed);
        Some(message)
    }
}

#[test]
fn test_send_from_other_thread() {
    let (sender, receiver) = oneshot();

    thread::scope(|s| {
        s.spawn(move || {
            sender.send(42u64);
        });
        assert_eq!(receiver.receive(), Some(42));
    });
}

#[test]
fn test_dropped_sender_wakes_receiver() {
    let (sender, receiver) = oneshot::<u64>();

    thread::scope(|s| {
        s.spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            drop(sender);
        });
        assert_eq!(receiver.receive(), None);
    });
}

#[test]
fn test_unreceived_message_dropped() {
    let (sender, receiver) = oneshot();
    let payload = Arc::new(());
    sender.send(payload.clone());
    drop(receiver);
    assert_eq!(Arc::strong_count(&payload), 1);
}

#[test]
fn test_received_message_not_dropped_twice() {
    let (sender, receiver) = oneshot();
    let payload = Arc::new(());
    sender.send(payload.clone());
    let received = receiver.receive().unwrap();
    assert_eq!(Arc::strong_count(&payload), 2);
    drop(received);
    assert_eq!(Arc::strong_count(&payload), 1);
}
