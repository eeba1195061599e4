use log::{ info, warn };
use std::io;
use std::path::Path;

pub const DEFAULT_MAX_ATTACHMENT_BYTES: usize = 100 * 1024;

/// Text extracted from a user-supplied file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub content: String,
}

impl Attachment {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|b| *b == 0)
}

/// Reads `path` as text, capped at `max_bytes`. Binary or non-UTF-8 files
/// yield a sentinel line instead of their content.
pub async fn extract_text(path: &Path, max_bytes: usize) -> io::Result<Attachment> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = tokio::fs::read(path).await?;
    let size = bytes.len();

    if looks_binary(&bytes) {
        warn!("Attachment {} looks binary ({} bytes), not extracting", name, size);
        return Ok(Attachment::new(&name, binary_sentinel(&name, size)));
    }

    let (slice, truncated) = if size > max_bytes { (&bytes[..max_bytes], true) } else { (&bytes[..], false) };
    let mut content = match std::str::from_utf8(slice) {
        Ok(text) => text.to_string(),
        // a cut through a multi-byte character is fine; anything else is binary
        Err(e) if truncated && e.error_len().is_none() => {
            String::from_utf8_lossy(&slice[..e.valid_up_to()]).into_owned()
        }
        Err(_) => {
            warn!("Attachment {} is not valid UTF-8, not extracting", name);
            return Ok(Attachment::new(&name, binary_sentinel(&name, size)));
        }
    };

    if truncated {
        content.push_str(&format!("\n[... truncated, showing first {} of {} bytes]", max_bytes, size));
    }
    info!("Attached {} ({} bytes{})", name, size, if truncated { ", truncated" } else { "" });
    Ok(Attachment::new(name, content))
}

fn binary_sentinel(name: &str, size: usize) -> String {
    format!("[Binary file: {} ({} bytes) - content not extracted]", name, size)
}
