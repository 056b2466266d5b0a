//! Development server with live reload.
//!
//! Serves the output root over plain HTTP/1.1, one thread per connection.
//! Every HTML response gets a small client script injected before
//! `</body>`; the script subscribes to `/__webpipe/events` and reacts to the
//! [`LiveHub`] events (reload, stylesheet inject, ghost replay).
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /__webpipe/events` | Server-Sent Events stream |
//! | `GET /__webpipe/client.js` | the injected client |
//! | `POST /__webpipe/ghost` | a client reports an interaction to mirror |
//! | anything else | static file under the output root |

pub mod http;
pub mod hub;
pub mod pages;

pub use hub::{LiveHub, ReloadKind};

use crate::artifact::list_files;
use crate::config::{Project, ServerConfig};
use http::{Request, Response};
use serde_json::json;
use std::io::{BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

pub const EVENTS_PATH: &str = "/__webpipe/events";
pub const CLIENT_PATH: &str = "/__webpipe/client.js";
pub const GHOST_PATH: &str = "/__webpipe/ghost";

const CLIENT_JS: &str = include_str!("client.js");
const HEARTBEAT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
}

/// What the router decided for one request.
#[derive(Debug)]
pub enum Routed {
    Response(Response),
    /// Hand the connection to the hub as an event stream.
    Events,
}

/// Everything a connection handler needs, shared across threads.
pub struct ServeContext {
    pub root: PathBuf,
    /// Markup injected into HTML responses.
    pub snippet: String,
    pub hub: Arc<LiveHub>,
}

impl ServeContext {
    pub fn new(project: &Project, hub: Arc<LiveHub>) -> Self {
        Self {
            root: project.layout.output.clone(),
            snippet: client_snippet(&project.config.server),
            hub,
        }
    }
}

/// Settings object plus client script tag.
pub fn client_snippet(settings: &ServerConfig) -> String {
    let init = json!({ "notify": settings.notify, "ghost": settings.ghost });
    format!("<script>window.__webpipe={init};</script><script src=\"{CLIENT_PATH}\"></script>")
}

pub fn route(request: &Request, ctx: &ServeContext) -> Routed {
    let path = request.path();
    match (request.method.as_str(), path) {
        ("GET", EVENTS_PATH) => Routed::Events,
        ("GET", CLIENT_PATH) => Routed::Response(
            Response::ok(CLIENT_JS.as_bytes().to_vec(), "text/javascript; charset=utf-8")
                .with_header("Cache-Control", "no-cache"),
        ),
        ("POST", GHOST_PATH) => Routed::Response(if ctx.hub.relay_ghost(&request.body) {
            Response::new(204, "No Content")
        } else {
            Response::new(400, "Bad Request")
        }),
        ("GET", _) => Routed::Response(serve_static(path, ctx)),
        _ => Routed::Response(
            Response::new(405, "Method Not Allowed").with_header("Allow", "GET, POST"),
        ),
    }
}

fn serve_static(url_path: &str, ctx: &ServeContext) -> Response {
    let Some(mut file) = http::resolve_path(&ctx.root, url_path) else {
        return not_found(url_path, ctx);
    };
    if file.is_dir() {
        if !url_path.ends_with('/') {
            return Response::new(301, "Moved Permanently")
                .with_header("Location", &format!("{url_path}/"));
        }
        file.push("index.html");
    }
    let bytes = match std::fs::read(&file) {
        Ok(bytes) => bytes,
        Err(_) => return not_found(url_path, ctx),
    };
    let content_type = http::content_type(&file);
    let body = if content_type.starts_with("text/html") {
        http::inject_before_body_end(&String::from_utf8_lossy(&bytes), &ctx.snippet).into_bytes()
    } else {
        bytes
    };
    Response::ok(body, content_type).with_header("Cache-Control", "no-cache")
}

fn not_found(url_path: &str, ctx: &ServeContext) -> Response {
    let pages: Vec<String> = list_files(&ctx.root, &["html"])
        .unwrap_or_default()
        .iter()
        .filter_map(|p| p.file_name()?.to_str().map(str::to_string))
        .collect();
    let html = pages::not_found(url_path, &pages).into_string();
    Response::new(404, "Not Found").with_body(html.into_bytes(), "text/html; charset=utf-8")
}

fn handle_connection(stream: TcpStream, ctx: &ServeContext) -> Result<(), ServerError> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut stream = stream;

    let request = match http::read_request(&mut reader) {
        Ok(Some(request)) => request,
        Ok(None) => return Ok(()),
        Err(ServerError::BadRequest(msg)) => {
            stream.write_all(&Response::new(400, "Bad Request").to_bytes())?;
            return Err(ServerError::BadRequest(msg));
        }
        Err(e) => return Err(e),
    };
    tracing::trace!(method = %request.method, target = %request.target, "request");

    match route(&request, ctx) {
        Routed::Response(response) => {
            stream.write_all(&response.to_bytes())?;
            stream.flush()?;
        }
        Routed::Events => {
            stream.set_write_timeout(Some(Duration::from_secs(5)))?;
            stream.write_all(http::event_stream_head())?;
            ctx.hub.connect(Box::new(stream));
        }
    }
    Ok(())
}

/// A bound, not yet running server.
pub struct DevServer {
    listener: TcpListener,
    ctx: Arc<ServeContext>,
    open: bool,
}

impl DevServer {
    pub fn bind(project: &Project) -> Result<Self, ServerError> {
        let settings = &project.config.server;
        let address = format!("{}:{}", settings.host, settings.port);
        let listener = TcpListener::bind(&address).map_err(|e| ServerError::Bind {
            address: address.clone(),
            source: e,
        })?;
        let hub = Arc::new(LiveHub::new(settings.ghost));
        Ok(Self {
            listener,
            ctx: Arc::new(ServeContext::new(project, hub)),
            open: settings.open,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn hub(&self) -> Arc<LiveHub> {
        Arc::clone(&self.ctx.hub)
    }

    /// Accept connections on a background thread until `running` clears.
    pub fn spawn(self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>, ServerError> {
        let addr = self.local_addr()?;
        let url = format!("http://{addr}/");
        self.listener.set_nonblocking(true)?;
        tracing::info!(%url, root = %self.ctx.root.display(), "serving");
        if self.open
            && let Err(e) = open_browser(&url)
        {
            tracing::warn!("could not open a browser: {e}");
        }

        let handle = thread::Builder::new()
            .name("webpipe-server".to_string())
            .spawn(move || {
                let mut last_beat = Instant::now();
                while running.load(Ordering::SeqCst) {
                    match self.listener.accept() {
                        Ok((stream, _)) => {
                            let ctx = Arc::clone(&self.ctx);
                            thread::spawn(move || {
                                if let Err(e) = handle_connection(stream, &ctx) {
                                    tracing::debug!("connection error: {e}");
                                }
                            });
                        }
                        Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                            thread::sleep(Duration::from_millis(10));
                        }
                        Err(e) => tracing::warn!("accept error: {e}"),
                    }
                    if last_beat.elapsed() >= HEARTBEAT {
                        self.ctx.hub.heartbeat();
                        last_beat = Instant::now();
                    }
                }
                tracing::debug!("server stopped");
            })?;
        Ok(handle)
    }
}

/// Open a URL in the default browser.
fn open_browser(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/c", "start", "", url])
            .spawn()?;
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).spawn()?;
    }
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        std::process::Command::new("xdg-open").arg(url).spawn()?;
    }
    Ok(())
}

/// Path of `file` relative to the output root, as browsers request it.
pub fn served_path(file: &Path, output_root: &Path) -> String {
    crate::artifact::relative_display(file, output_root)
}
