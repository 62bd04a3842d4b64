//! Development server and live reload.
//!
//! Two parts:
//!
//! 1. **HTTP server**: `axum` serving the project root, with a directory
//!    listing for folders. Every HTML response gets a small client script
//!    injected before `</body>`.
//! 2. **Reload channel**: a WebSocket listener on its own port, run on
//!    dedicated threads with `tungstenite`. The client script connects to it
//!    and reloads the page on `reload`, or re-fetches stylesheets on `css`.

use std::fmt::Write as _;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{Sender, channel};
use std::sync::{Arc, Mutex, OnceLock};

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use console::style;
use percent_encoding::percent_decode_str;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};
use tungstenite::WebSocket;

/// Port of the HTTP server.
pub const HTTP_PORT: u16 = 3010;
/// Preferred port of the reload WebSocket, an ephemeral one is used when it
/// is taken.
pub const RELOAD_PORT: u16 = 1337;

/// Keep at most this many browser connections.
const MAX_CLIENTS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerOptions {
    pub http_port: u16,
    pub reload_port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            http_port: HTTP_PORT,
            reload_port: RELOAD_PORT,
        }
    }
}

/// Message sent to connected browsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Reload the whole page.
    Reload,
    /// Re-fetch stylesheets only.
    Styles,
}

impl Signal {
    fn as_str(self) -> &'static str {
        match self {
            Signal::Reload => "reload",
            Signal::Styles => "css",
        }
    }
}

type Clients = Arc<Mutex<Vec<WebSocket<TcpStream>>>>;

/// Broadcasts reload signals to every connected browser.
///
/// Until [`Reloader::listen`] is called there is nobody to notify and
/// signals are dropped.
#[derive(Default)]
pub struct Reloader {
    clients: Clients,
    sender: OnceLock<Mutex<Sender<Signal>>>,
    port: OnceLock<u16>,
}

impl Reloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the WebSocket port and start accepting browsers. Idempotent,
    /// returns the bound port.
    pub fn listen(&self, preferred: u16) -> std::io::Result<u16> {
        if let Some(&port) = self.port.get() {
            return Ok(port);
        }

        let (tcp, port) = reserve_port(preferred)?;
        new_thread_ws_incoming(tcp, self.clients.clone());

        let tx = new_thread_ws_reload(self.clients.clone());
        let _ = self.sender.set(Mutex::new(tx));
        let _ = self.port.set(port);

        info!("live reload listening on port {port}");
        Ok(port)
    }

    pub fn port(&self) -> Option<u16> {
        self.port.get().copied()
    }

    pub fn connected(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    pub fn reload(&self) {
        self.send(Signal::Reload);
    }

    pub fn refresh_styles(&self) {
        self.send(Signal::Styles);
    }

    fn send(&self, signal: Signal) {
        match self.sender.get() {
            Some(tx) => {
                if tx.lock().unwrap().send(signal).is_err() {
                    warn!("reload thread is gone, dropping {signal:?}");
                }
            }
            None => debug!("no reload listener, dropping {signal:?}"),
        }
    }
}

fn reserve_port(preferred: u16) -> std::io::Result<(TcpListener, u16)> {
    let listener = match TcpListener::bind(("127.0.0.1", preferred)) {
        Ok(sock) => sock,
        Err(_) => TcpListener::bind("127.0.0.1:0")?,
    };

    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

fn new_thread_ws_incoming(server: TcpListener, clients: Clients) {
    std::thread::spawn(move || {
        for stream in server.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("reload connection failed: {e}");
                    continue;
                }
            };

            match tungstenite::accept(stream) {
                Ok(socket) => clients.lock().unwrap().push(socket),
                Err(e) => warn!("reload handshake failed: {e}"),
            }
        }
    });
}

fn new_thread_ws_reload(clients: Clients) -> Sender<Signal> {
    let (tx, rx) = channel::<Signal>();

    std::thread::spawn(move || {
        while let Ok(signal) = rx.recv() {
            let mut clients = clients.lock().unwrap();
            let mut broken = vec![];

            for (i, socket) in clients.iter_mut().enumerate() {
                match socket.send(signal.as_str().into()) {
                    Ok(_) => {}
                    Err(tungstenite::Error::Io(e)) => {
                        if e.kind() == std::io::ErrorKind::BrokenPipe {
                            broken.push(i);
                        }
                    }
                    Err(
                        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                    ) => {
                        broken.push(i);
                    }
                    Err(e) => {
                        error!("Error: {e:?}");
                    }
                }
            }

            for i in broken.into_iter().rev() {
                clients.remove(i);
            }

            // Close all but the last few connections
            let len = clients.len();
            if len > MAX_CLIENTS {
                for mut socket in clients.drain(0..len - MAX_CLIENTS) {
                    socket.close(None).ok();
                }
            }

            debug!("sent {signal:?} to {} client(s)", clients.len());
        }
    });

    tx
}

struct ServerState {
    root: Utf8PathBuf,
    reload_port: u16,
}

/// The HTTP half of the dev server. Remembers the address it ended up
/// bound to.
#[derive(Debug, Default)]
pub struct DevServer {
    options: ServerOptions,
    address: OnceLock<SocketAddr>,
}

impl DevServer {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            options,
            address: OnceLock::new(),
        }
    }

    /// Where the HTTP server listens, once it does.
    pub fn address(&self) -> Option<SocketAddr> {
        self.address.get().copied()
    }

    /// Serve `root` on `127.0.0.1:<http_port>` until the process ends.
    pub async fn serve(&self, root: Utf8PathBuf, reloader: &Reloader) -> anyhow::Result<()> {
        let reload_port = reloader.listen(self.options.reload_port)?;

        let address = SocketAddr::from(([127, 0, 0, 1], self.options.http_port));
        let listener = tokio::net::TcpListener::bind(address).await?;
        let address = listener.local_addr()?;
        let _ = self.address.set(address);

        let url = format!("http://localhost:{}/", address.port());
        info!(url = %style(url).yellow(), "starting a HTTP server");

        let state = Arc::new(ServerState { root, reload_port });
        let router = Router::new().fallback(handle).with_state(state);

        axum::serve(listener, router).await?;

        Ok(())
    }
}

async fn handle(State(state): State<Arc<ServerState>>, request: Request) -> Response {
    let path = request.uri().path().to_string();

    if let Some(dir) = local_dir(&state.root, &path) {
        if !path.ends_with('/') {
            return redirect(&format!("{path}/"));
        }
        return match render_listing(&dir, &path) {
            Ok(html) => html_response(inject_client(&html, state.reload_port)),
            Err(e) => {
                error!("couldn't list '{dir}': {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    let mut files = ServeDir::new(&state.root).append_index_html_on_directories(false);
    let response = match files.try_call(request).await {
        Ok(response) => response.map(Body::new),
        Err(e) => {
            error!("couldn't serve '{path}': {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/html"));

    if !is_html || !response.status().is_success() {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            let html = inject_client(&String::from_utf8_lossy(&bytes), state.reload_port);
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(html))
        }
        Err(e) => {
            error!("couldn't read '{path}': {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Map a request path onto a directory under `root`, if it is one. Paths
/// that try to leave the root never match.
fn local_dir(root: &Utf8Path, request_path: &str) -> Option<Utf8PathBuf> {
    let decoded = percent_decode_str(request_path).decode_utf8().ok()?;
    let mut dir = root.to_path_buf();

    for component in Utf8Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Utf8Component::Normal(part) => dir.push(part),
            Utf8Component::CurDir => {}
            _ => return None,
        }
    }

    dir.is_dir().then_some(dir)
}

fn redirect(location: &str) -> Response {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location.to_string())]).into_response()
}

fn html_response(html: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

/// Render a plain HTML index of `dir`, directories first.
pub fn render_listing(dir: &Utf8Path, request_path: &str) -> std::io::Result<String> {
    let mut entries = Vec::new();

    for entry in dir.read_dir_utf8()? {
        let entry = entry?;
        let is_dir = entry.file_type()?.is_dir();
        entries.push((!is_dir, entry.file_name().to_string()));
    }
    entries.sort();

    let title = escape_html(request_path);
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>Index of {title}</title></head>\n<body>\n<h1>Index of {title}</h1>\n<ul>\n"
    );

    if request_path != "/" {
        html.push_str("<li><a href=\"../\">../</a></li>\n");
    }

    for (is_file, name) in entries {
        let suffix = if is_file { "" } else { "/" };
        let name = escape_html(&name);
        let _ = writeln!(html, "<li><a href=\"{name}{suffix}\">{name}{suffix}</a></li>");
    }

    html.push_str("</ul>\n</body>\n</html>\n");
    Ok(html)
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Add the live reload client to an HTML document.
pub fn inject_client(html: &str, port: u16) -> String {
    let script = format!(
        r#"<script>(function () {{
  var socket = new WebSocket("ws://" + location.hostname + ":{port}");
  socket.onmessage = function (event) {{
    if (event.data === "css") {{
      document.querySelectorAll('link[rel="stylesheet"]').forEach(function (link) {{
        var url = new URL(link.href);
        url.searchParams.set("reload", Date.now());
        link.href = url.toString();
      }});
    }} else {{
      location.reload();
    }}
  }};
}})();</script>
"#
    );

    match html.rfind("</body>") {
        Some(at) => format!("{}{}{}", &html[..at], script, &html[at..]),
        None => format!("{html}{script}"),
    }
}
