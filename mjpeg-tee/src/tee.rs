//! Latest-frame broadcast of a multipart stream.
//!
//! One reader task decodes parts off the child's MJPEG pipe; any number of
//! HTTP subscribers receive the most recent part and then every subsequent
//! part they keep up with. Each subscriber owns a one-slot mailbox: a newer
//! part replaces an unread one, so a slow subscriber loses intermediate
//! frames instead of stalling the pipe. That is the right trade for a live
//! camera feed, where a stale frame has no value.

use std::sync::{Arc, Mutex};

use tokio::io::AsyncBufRead;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::TeeError;
use crate::reader::{MimePart, MultipartReader};

/// One-slot mailbox. Depositing overwrites any unread part and never blocks.
struct Mailbox {
    slot: Mutex<MailboxSlot>,
    notify: Notify,
}

#[derive(Default)]
struct MailboxSlot {
    part: Option<MimePart>,
    closed: bool,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            slot: Mutex::new(MailboxSlot::default()),
            notify: Notify::new(),
        }
    }

    fn deposit(&self, part: MimePart) {
        let mut slot = self.slot.lock().expect("mailbox lock poisoned");
        if !slot.closed {
            slot.part = Some(part);
            self.notify.notify_one();
        }
    }

    /// Idempotent; wakes a pending `recv`.
    fn close(&self) {
        let mut slot = self.slot.lock().expect("mailbox lock poisoned");
        slot.closed = true;
        self.notify.notify_one();
    }

    async fn recv(&self) -> Option<MimePart> {
        loop {
            {
                let mut slot = self.slot.lock().expect("mailbox lock poisoned");
                if let Some(part) = slot.part.take() {
                    return Some(part);
                }
                if slot.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

#[derive(Default)]
struct TeeState {
    last: Option<MimePart>,
    next_id: u64,
    subscribers: Vec<(u64, Arc<Mailbox>)>,
    /// Set once the listener has returned; new mailboxes are born closed.
    shutdown: bool,
}

/// Duplicates a mime multipart stream to multiple readers.
///
/// Cheap to clone; all clones share the subscriber list and the latest part.
#[derive(Clone, Default)]
pub struct MimeTee {
    state: Arc<Mutex<TeeState>>,
}

impl MimeTee {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the multipart stream and relays each part to the current
    /// subscribers. Returns when the stream ends, the token fires, or the
    /// stream is malformed. On return every mailbox is closed so subscribers
    /// drain and finish.
    pub async fn listen<R: AsyncBufRead + Unpin>(
        &self,
        cancel: CancellationToken,
        reader: R,
        boundary: &str,
    ) -> Result<(), TeeError> {
        let res = self.listen_inner(cancel, reader, boundary).await;
        let subscribers = {
            let mut state = self.state.lock().expect("tee lock poisoned");
            state.shutdown = true;
            std::mem::take(&mut state.subscribers)
        };
        for (_, mailbox) in subscribers {
            mailbox.close();
        }
        res
    }

    async fn listen_inner<R: AsyncBufRead + Unpin>(
        &self,
        cancel: CancellationToken,
        reader: R,
        boundary: &str,
    ) -> Result<(), TeeError> {
        let mut mr = MultipartReader::new(reader, boundary);
        let mut count = 0u64;
        loop {
            let part = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                part = mr.next_part() => part?,
            };
            let Some(part) = part else { return Ok(()) };
            if count == 0 {
                tracing::info!("ready");
            }
            count += 1;
            // Snapshot the subscriber list under the lock; the deposits
            // themselves happen outside it and cannot block.
            let targets: Vec<Arc<Mailbox>> = {
                let mut state = self.state.lock().expect("tee lock poisoned");
                state.last = Some(part.clone());
                state.subscribers.iter().map(|(_, m)| m.clone()).collect()
            };
            for mailbox in targets {
                mailbox.deposit(part.clone());
            }
        }
    }

    /// Registers a new subscriber.
    ///
    /// The most recent part, if any, is deposited into the mailbox before the
    /// subscriber joins the broadcast list: a late joiner sees at most one
    /// stale frame and then live content with no gap.
    pub fn subscribe(&self) -> TeeSubscriber {
        let mailbox = Arc::new(Mailbox::new());
        let id = {
            let mut state = self.state.lock().expect("tee lock poisoned");
            if let Some(last) = &state.last {
                if !last.body.is_empty() {
                    mailbox.deposit(last.clone());
                }
            }
            let id = state.next_id;
            state.next_id += 1;
            if state.shutdown {
                // No listener left; let the subscriber drain the final part
                // and finish instead of waiting forever.
                mailbox.close();
            } else {
                state.subscribers.push((id, mailbox.clone()));
            }
            id
        };
        TeeSubscriber {
            id,
            mailbox,
            state: self.state.clone(),
        }
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.state.lock().expect("tee lock poisoned").subscribers.len()
    }
}

/// A registered reader of the tee. Dropping it unsubscribes.
pub struct TeeSubscriber {
    id: u64,
    mailbox: Arc<Mailbox>,
    state: Arc<Mutex<TeeState>>,
}

impl TeeSubscriber {
    /// Waits for the next part. Returns `None` once the tee has shut down
    /// and the mailbox is drained.
    pub async fn recv(&mut self) -> Option<MimePart> {
        self.mailbox.recv().await
    }
}

impl Drop for TeeSubscriber {
    fn drop(&mut self) {
        // Close before delisting so a concurrent deposit cannot land in a
        // mailbox nobody will read.
        self.mailbox.close();
        let mut state = self.state.lock().expect("tee lock poisoned");
        state.subscribers.retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn part(body: &str) -> MimePart {
        MimePart {
            headers: vec![("Content-Type".to_string(), "image/jpeg".to_string())],
            body: Bytes::from(body.to_string()),
        }
    }

    fn publish(tee: &MimeTee, p: &MimePart) {
        let targets: Vec<Arc<Mailbox>> = {
            let mut state = tee.state.lock().unwrap();
            state.last = Some(p.clone());
            state.subscribers.iter().map(|(_, m)| m.clone()).collect()
        };
        for m in targets {
            m.deposit(p.clone());
        }
    }

    #[tokio::test]
    async fn test_broadcast_and_late_join() {
        let tee = MimeTee::new();
        let mut a = tee.subscribe();
        let mut b = tee.subscribe();

        let p1 = part("P1");
        publish(&tee, &p1);

        // A reads promptly and gets P1.
        assert_eq!(&a.recv().await.unwrap().body[..], b"P1");

        // C subscribes between P1 and P2: it gets P1 immediately.
        let mut c = tee.subscribe();
        assert_eq!(&c.recv().await.unwrap().body[..], b"P1");

        let p2 = part("P2");
        publish(&tee, &p2);

        assert_eq!(&a.recv().await.unwrap().body[..], b"P2");
        assert_eq!(&c.recv().await.unwrap().body[..], b"P2");
        // B never read: its mailbox holds only the newest part.
        assert_eq!(&b.recv().await.unwrap().body[..], b"P2");
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_but_keeps_order() {
        let tee = MimeTee::new();
        let mut s = tee.subscribe();
        for i in 0..10 {
            publish(&tee, &part(&format!("F{i}")));
        }
        assert_eq!(&s.recv().await.unwrap().body[..], b"F9");
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let tee = MimeTee::new();
        let s = tee.subscribe();
        assert_eq!(tee.subscriber_count(), 1);
        drop(s);
        assert_eq!(tee.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_listen_decodes_and_fans_out() {
        let mut data = Vec::new();
        for body in [&b"one"[..], b"two"] {
            data.extend_from_slice(b"--ffmpeg\r\nContent-type: image/jpeg\r\n");
            data.extend_from_slice(format!("Content-length: {}\r\n\r\n", body.len()).as_bytes());
            data.extend_from_slice(body);
            data.extend_from_slice(b"\r\n");
        }
        data.extend_from_slice(b"--ffmpeg--\r\n");

        let tee = MimeTee::new();
        let mut sub = tee.subscribe();
        let cancel = CancellationToken::new();
        let listen = {
            let tee = tee.clone();
            tokio::spawn(async move {
                tee.listen(cancel, std::io::Cursor::new(data), "ffmpeg").await
            })
        };

        // The subscriber observes parts in order (it may skip, never swap).
        let first = sub.recv().await.unwrap();
        assert!(first.body == "one" || first.body == "two");
        if first.body == "one" {
            let second = sub.recv().await.unwrap();
            assert_eq!(&second.body[..], b"two");
        }
        // Once the stream ends the mailbox closes.
        assert!(sub.recv().await.is_none());
        listen.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_terminates() {
        let tee = MimeTee::new();
        publish(&tee, &part("final"));
        let cancel = CancellationToken::new();
        cancel.cancel();
        tee.listen(cancel, std::io::Cursor::new(Vec::new()), "ffmpeg")
            .await
            .unwrap();

        // A late subscriber drains the final frame, then sees the closed
        // mailbox instead of waiting forever.
        let mut sub = tee.subscribe();
        assert_eq!(&sub.recv().await.unwrap().body[..], b"final");
        assert!(sub.recv().await.is_none());
    }
}
