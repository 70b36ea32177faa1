/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// The image optimizer uses it to key its on-disk cache, so that an unchanged
/// source file is never compressed twice.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    /// Hashes several buffers as one stream, e.g. source bytes plus encoder
    /// settings.
    pub(crate) fn hash_parts<'a>(parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        hasher.finalize().into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time production build: no source maps, no live reload.
    Build,
    /// Development build followed by the dev server and the watcher.
    Watch,
}

/// Global state available to all tasks.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The current build mode (Build or Watch).
    pub mode: Mode,
    /// The port of the live-reload WebSocket (if running).
    pub port: Option<u16>,
}

impl Environment {
    pub fn build() -> Self {
        Self {
            mode: Mode::Build,
            port: None,
        }
    }

    pub fn watch(port: Option<u16>) -> Self {
        Self {
            mode: Mode::Watch,
            port,
        }
    }

    /// Whether tasks should emit source maps next to their artifacts.
    pub fn source_maps(&self) -> bool {
        self.mode == Mode::Watch
    }

    /// Returns a JavaScript snippet to enable live-reloading.
    ///
    /// If the pipeline is running in `Watch` mode and a port is configured,
    /// this returns a script that connects to the WebSocket server and reloads
    /// the page on every message.
    pub fn get_refresh_script(&self) -> Option<String> {
        if self.mode != Mode::Watch {
            return None;
        }

        self.port.map(|port| {
            format!(
                r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_parts_matches_concatenation() {
        let a = Hash32::hash(b"hello world");
        let b = Hash32::hash_parts([b"hello ".as_slice(), b"world".as_slice()]);
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn test_refresh_script_only_in_watch() {
        assert!(Environment::build().get_refresh_script().is_none());
        assert!(Environment::watch(None).get_refresh_script().is_none());

        let script = Environment::watch(Some(1337)).get_refresh_script().unwrap();
        assert!(script.contains("ws://localhost:1337"));
    }
}
