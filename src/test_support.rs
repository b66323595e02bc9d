//! Shared fixtures for unit tests: an in-memory HTTP fake and synthetic images.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, Rgba};

use crate::catalog::ProductRecord;
use crate::error::ResolveError;
use crate::http::{HttpClient, HttpResponse};

#[derive(Debug, Clone)]
pub enum FakeReply {
    Status(u16, Bytes),
    /// Transport failure (connection refused, timeout).
    Unreachable,
}

impl FakeReply {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::Status(200, body.into())
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::Status(200, Bytes::from(value.to_string()))
    }

    pub fn status(code: u16) -> Self {
        Self::Status(code, Bytes::new())
    }
}

/// Routes match when the pattern is a substring of the requested URL; the first matching
/// route wins. Queued replies are consumed in order and the last one repeats. Unrouted
/// URLs answer 404.
#[derive(Debug, Default)]
pub struct FakeHttp {
    routes: Mutex<Vec<(String, VecDeque<FakeReply>)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, pattern: &str, reply: FakeReply) -> Self {
        {
            let mut routes = self.routes.lock().unwrap();
            match routes.iter_mut().find(|(p, _)| p == pattern) {
                Some((_, queue)) => queue.push_back(reply),
                None => routes.push((pattern.to_string(), VecDeque::from([reply]))),
            }
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|u| u.contains(pattern)).count()
    }

    fn next_reply(&self, url: &str) -> FakeReply {
        self.calls.lock().unwrap().push(url.to_string());
        let mut routes = self.routes.lock().unwrap();
        match routes.iter_mut().find(|(p, _)| url.contains(p.as_str())) {
            Some((_, queue)) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some((_, queue)) => queue.front().cloned().unwrap(),
            None => FakeReply::status(404),
        }
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn get(&self, url: &str) -> Result<HttpResponse, ResolveError> {
        match self.next_reply(url) {
            FakeReply::Status(status, body) => Ok(HttpResponse {
                status,
                url: url.to_string(),
                body,
            }),
            FakeReply::Unreachable => Err(ResolveError::network(url, None, "connection refused")),
        }
    }

    async fn head(&self, url: &str) -> Result<u16, ResolveError> {
        match self.next_reply(url) {
            FakeReply::Status(status, _) => Ok(status),
            FakeReply::Unreachable => Err(ResolveError::network(url, None, "connection refused")),
        }
    }
}

pub fn product(sku: &str, name: &str, platform: &str) -> ProductRecord {
    let slug = crate::normalization::text::slugify(name);
    ProductRecord::new(sku, &slug, name, platform)
}

/// Noisy JPEG so the encoded size clears minimum-size checks.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
    });
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode_image(&DynamicImage::ImageRgb8(img))
        .unwrap();
    out
}

/// PNG that is fully transparent on its left half.
pub fn transparent_png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |x, _| {
        if x < width / 2 {
            Rgba([0, 0, 0, 0])
        } else {
            Rgba([200, 20, 20, 255])
        }
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
