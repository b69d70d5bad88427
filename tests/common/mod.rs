#![allow(dead_code)]

use photon_rs::PhotonImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone, Debug)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn ok(content_type: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: Vec::new(),
        }
    }
}

type Routes = Arc<Mutex<HashMap<String, Vec<Reply>>>>;

/// Minimal HTTP/1.1 responder. Each path answers with its replies in turn,
/// repeating the last one; unknown paths get 404.
#[derive(Clone)]
pub struct FeedServer {
    pub base: String,
    routes: Routes,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl FeedServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let routes: Routes = Arc::default();
        let hits = Arc::new(Mutex::new(HashMap::new()));
        let server = Self {
            base,
            routes: routes.clone(),
            hits: hits.clone(),
        };
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (routes, hits) = (routes.clone(), hits.clone());
                tokio::spawn(async move {
                    let _ = respond(stream, &routes, &hits).await;
                });
            }
        });
        server
    }

    pub fn route(&self, path: &str, replies: Vec<Reply>) -> &Self {
        self.routes.lock().unwrap().insert(path.to_string(), replies);
        self
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or_default()
    }
}

async fn respond(
    mut stream: TcpStream,
    routes: &Mutex<HashMap<String, Vec<Reply>>>,
    hits: &Mutex<HashMap<String, usize>>,
) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }
    let head = String::from_utf8_lossy(&request);
    let target = head.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target).to_string();
    let n = {
        let mut hits = hits.lock().unwrap();
        let n = hits.entry(path.clone()).or_insert(0);
        *n += 1;
        *n - 1
    };
    let reply = routes
        .lock()
        .unwrap()
        .get(&path)
        .and_then(|replies| replies.get(n).or(replies.last()))
        .cloned()
        .unwrap_or_else(|| Reply::status(404));
    let reason = match reply.status {
        200 => "OK",
        404 => "Not Found",
        429 => "Too Many Requests",
        _ => "Status",
    };
    let header = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.content_type,
        reply.body.len()
    );
    stream.write_all(header.as_bytes()).await?;
    stream.write_all(&reply.body).await?;
    stream.shutdown().await
}

/// Grey vertical bands, one per level, encoded as PNG.
pub fn png(width: u32, height: u32, levels: &[u8]) -> Vec<u8> {
    let mut rgba = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..height {
        for x in 0..width {
            let v = levels[(x as usize * levels.len()) / width as usize];
            rgba.extend([v, v, v, 255]);
        }
    }
    PhotonImage::new(rgba, width, height).get_bytes()
}

pub fn gallery_page(images: &[String]) -> String {
    let mut html = String::from("<html><head>");
    if let Some(first) = images.first() {
        html.push_str(&format!(r#"<meta property="og:image" content="{first}">"#));
    }
    html.push_str("</head><body>");
    for img in images.iter().skip(1) {
        html.push_str(&format!(r#"<img src="{img}">"#));
    }
    html.push_str("</body></html>");
    html
}
