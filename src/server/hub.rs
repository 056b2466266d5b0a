//! Connected browsers and the events pushed to them.
//!
//! Each browser holds one Server-Sent Events stream open. The hub keeps the
//! write half of every stream; a client whose write fails is dropped.
//!
//! | Event | Data | Sent when |
//! |---|---|---|
//! | `hello` | `{"id": n}` | on connect, so the client can tag its ghost events |
//! | `reload` | `{"path": "..."}` | an HTML or JS artifact changed |
//! | `inject` | `{"path": "..."}` | a stylesheet changed; swapped in place |
//! | `ghost` | the originating event | another client clicked, typed or scrolled |

use crate::config::GhostConfig;
use serde_json::{Value, json};
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// How browsers react to a changed artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadKind {
    /// Full page reload.
    Reload,
    /// Swap stylesheets without reloading.
    Inject,
}

impl ReloadKind {
    pub fn event_name(self) -> &'static str {
        match self {
            ReloadKind::Reload => "reload",
            ReloadKind::Inject => "inject",
        }
    }
}

struct Client {
    id: u64,
    stream: Box<dyn Write + Send>,
}

/// One SSE message.
pub fn sse_frame(event: &str, data: &str) -> Vec<u8> {
    let mut frame = format!("event: {event}\n");
    for line in data.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame.into_bytes()
}

/// Whether a ghost event of this type is mirrored under `ghost`.
pub fn ghost_allowed(ghost: &GhostConfig, event_type: &str) -> bool {
    match event_type {
        "click" => ghost.clicks,
        "input" | "change" | "submit" => ghost.forms,
        "scroll" => ghost.scroll,
        _ => false,
    }
}

pub struct LiveHub {
    clients: Mutex<Vec<Client>>,
    next_id: AtomicU64,
    ghost: GhostConfig,
}

impl LiveHub {
    pub fn new(ghost: GhostConfig) -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            ghost,
        }
    }

    /// Register a stream whose response head was already written. Returns
    /// the client id, or `None` if the greeting could not be delivered.
    pub fn connect(&self, mut stream: Box<dyn Write + Send>) -> Option<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let hello = sse_frame("hello", &json!({ "id": id }).to_string());
        if stream.write_all(&hello).and_then(|_| stream.flush()).is_err() {
            return None;
        }
        self.lock_clients().push(Client { id, stream });
        tracing::debug!(client = id, "browser connected");
        Some(id)
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, Vec<Client>> {
        // A panic while holding the lock leaves only a list of sockets behind.
        self.clients.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a frame to every client except `skip`; drop the ones that fail.
    /// Returns how many received it.
    fn send(&self, frame: &[u8], skip: Option<u64>) -> usize {
        let mut clients = self.lock_clients();
        let mut delivered = 0;
        clients.retain_mut(|client| {
            if Some(client.id) == skip {
                return true;
            }
            match client.stream.write_all(frame).and_then(|_| client.stream.flush()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    tracing::debug!(client = client.id, "browser disconnected");
                    false
                }
            }
        });
        delivered
    }

    /// Tell every browser that `path` (relative to the output root) changed.
    pub fn notify(&self, kind: ReloadKind, path: &str) -> usize {
        let data = json!({ "path": path }).to_string();
        let delivered = self.send(&sse_frame(kind.event_name(), &data), None);
        if delivered > 0 {
            tracing::info!(kind = kind.event_name(), path, clients = delivered, "browsers notified");
        }
        delivered
    }

    /// Relay a ghost event posted by one client to all others.
    ///
    /// The body must be a JSON object with a `type` and the sender's `from`
    /// id. Returns `false` when the event is malformed or its type is not
    /// mirrored.
    pub fn relay_ghost(&self, body: &[u8]) -> bool {
        let Ok(Value::Object(event)) = serde_json::from_slice::<Value>(body) else {
            return false;
        };
        let Some(event_type) = event.get("type").and_then(Value::as_str) else {
            return false;
        };
        if !ghost_allowed(&self.ghost, event_type) {
            return false;
        }
        let from = event.get("from").and_then(Value::as_u64);
        let data = Value::Object(event.clone()).to_string();
        self.send(&sse_frame("ghost", &data), from);
        true
    }

    /// Comment line that keeps idle streams open and prunes dead clients.
    pub fn heartbeat(&self) {
        self.send(b": ping\n\n", None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;

    /// Writer that appends into a shared buffer, or fails on demand.
    #[derive(Clone, Default)]
    struct Sink {
        buf: Arc<Mutex<Vec<u8>>>,
        broken: bool,
    }

    impl Sink {
        fn text(&self) -> String {
            String::from_utf8(self.buf.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for Sink {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            self.buf.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn frames_are_sse_formatted() {
        assert_eq!(
            sse_frame("reload", "{\"path\":\"index.html\"}"),
            b"event: reload\ndata: {\"path\":\"index.html\"}\n\n".to_vec()
        );
        assert_eq!(sse_frame("x", "a\nb"), b"event: x\ndata: a\ndata: b\n\n".to_vec());
    }

    #[test]
    fn clients_are_greeted_with_their_id() {
        let hub = LiveHub::new(GhostConfig::default());
        let sink = Sink::default();
        let id = hub.connect(Box::new(sink.clone())).unwrap();
        assert_eq!(id, 1);
        assert_eq!(sink.text(), "event: hello\ndata: {\"id\":1}\n\n");
    }

    #[test]
    fn notify_reaches_all_clients_and_prunes_dead_ones() {
        let hub = LiveHub::new(GhostConfig::default());
        let a = Sink::default();
        let b = Sink::default();
        hub.connect(Box::new(a.clone()));
        hub.connect(Box::new(b.clone()));

        assert_eq!(hub.notify(ReloadKind::Inject, "css/bundle.css"), 2);
        assert!(a.text().ends_with("event: inject\ndata: {\"path\":\"css/bundle.css\"}\n\n"));

        // break b after its greeting went through
        {
            let mut clients = hub.lock_clients();
            clients[1].stream = Box::new(Sink {
                broken: true,
                ..Sink::default()
            });
        }
        assert_eq!(hub.notify(ReloadKind::Reload, "index.html"), 1);
        assert_eq!(hub.client_count(), 1);
    }

    #[test]
    fn ghost_events_skip_the_sender() {
        let hub = LiveHub::new(GhostConfig::default());
        let a = Sink::default();
        let b = Sink::default();
        let id_a = hub.connect(Box::new(a.clone())).unwrap();
        hub.connect(Box::new(b.clone()));

        let body = format!(r##"{{"type":"click","from":{id_a},"selector":"#menu"}}"##);
        assert!(hub.relay_ghost(body.as_bytes()));
        assert!(!a.text().contains("event: ghost"));
        assert!(b.text().contains("event: ghost\ndata: "));
        assert!(b.text().contains("\"selector\":\"#menu\""));
    }

    #[test]
    fn ghost_filter_follows_config() {
        let hub = LiveHub::new(GhostConfig::default());
        assert!(!hub.relay_ghost(br#"{"type":"scroll","from":1,"y":0.5}"#));
        assert!(!hub.relay_ghost(br#"{"type":"keylogger"}"#));
        assert!(!hub.relay_ghost(b"not json"));
        assert!(!hub.relay_ghost(b"[1,2]"));

        let scrolling = LiveHub::new(GhostConfig {
            clicks: false,
            forms: false,
            scroll: true,
        });
        assert!(scrolling.relay_ghost(br#"{"type":"scroll","y":0.5}"#));
        assert!(!scrolling.relay_ghost(br#"{"type":"click"}"#));
    }
}
