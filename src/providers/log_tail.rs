// Last K lines of a named log file. Reads backwards from the end in fixed chunks so
// large logs cost O(K) rather than O(file).

use anyhow::Context;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::Provider;
use crate::models::Payload;

const CHUNK_BYTES: u64 = 8 * 1024;
/// Stop scanning backwards past this much data, even if fewer than K lines were found.
const MAX_TAIL_BYTES: usize = 1024 * 1024;

/// Last `k` lines of `path`, oldest first. A trailing newline does not produce an empty line.
pub fn read_last_lines(path: &Path, k: usize) -> anyhow::Result<Vec<String>> {
    let mut file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let len = file.metadata()?.len();
    if k == 0 || len == 0 {
        return Ok(Vec::new());
    }

    let mut pos = len;
    let mut buf: Vec<u8> = Vec::new();
    while pos > 0 && buf.len() < MAX_TAIL_BYTES {
        let step = CHUNK_BYTES.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;
        let mut chunk = vec![0u8; step as usize];
        file.read_exact(&mut chunk)?;
        chunk.extend_from_slice(&buf);
        buf = chunk;
        if buf.iter().filter(|&&b| b == b'\n').count() > k {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    if pos > 0 && !lines.is_empty() {
        // first segment starts mid-line
        lines.remove(0);
    }
    let start = lines.len().saturating_sub(k);
    Ok(lines[start..].iter().map(|l| l.to_string()).collect())
}

pub struct LogTailProvider {
    source_id: String,
    path: PathBuf,
    lines: usize,
}

impl LogTailProvider {
    /// Source id is `logs:<name>`.
    pub fn new(name: &str, path: impl Into<PathBuf>, lines: usize) -> Self {
        Self {
            source_id: format!("logs:{}", name),
            path: path.into(),
            lines,
        }
    }

    async fn sample(&self) -> anyhow::Result<Payload> {
        let path = self.path.clone();
        let k = self.lines;
        let lines = tokio::task::spawn_blocking(move || read_last_lines(&path, k))
            .await
            .map_err(|e| anyhow::anyhow!("log tail task join: {}", e))??;
        let mut payload = Payload::new();
        payload.insert(
            "path".into(),
            self.path.to_string_lossy().into_owned().into(),
        );
        payload.insert("lines".into(), lines.into());
        Ok(payload)
    }
}

impl Provider for LogTailProvider {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn collect(&self) -> BoxFuture<'_, anyhow::Result<Payload>> {
        self.sample().boxed()
    }
}
