//! Common fixtures for client integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use gfapi_client::{ClientConfig, ClientFacade, MemoryBackend, VolumeConnection};
use tempfile::TempDir;

pub const VOLUME: &str = "patchy";

/// Two-brick distribute volume.
pub const PATCHY_VOLFILE: &str = "\
volume patchy-client-0
    type protocol/client
    option remote-host server1
    option remote-subvolume /bricks/b0
end-volume

volume patchy-client-1
    type protocol/client
    option remote-host server2
    option remote-subvolume /bricks/b1
end-volume

volume patchy-dht
    type cluster/distribute
    subvolumes patchy-client-0 patchy-client-1
end-volume
";

/// A memory-backed volume plus a scratch directory holding its volfile and
/// log file.
pub struct TestVolume {
    pub backend: Arc<MemoryBackend>,
    pub client: ClientFacade,
    pub dir: TempDir,
}

impl TestVolume {
    pub fn new() -> Self {
        let backend = Arc::new(MemoryBackend::new());
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("patchy.vol"), PATCHY_VOLFILE).expect("write volfile");
        Self {
            client: ClientFacade::new(backend.clone()),
            backend,
            dir,
        }
    }

    pub fn volfile(&self) -> PathBuf {
        self.dir.path().join("patchy.vol")
    }

    pub fn log_file(&self) -> PathBuf {
        self.dir.path().join("patchy.log")
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            volume: VOLUME.to_string(),
            volfile: Some(self.volfile()),
            log_file: Some(self.log_file()),
            log_level: 7,
            ..Default::default()
        }
    }

    pub fn seed(&self, path: &str, data: &[u8]) {
        self.backend
            .volume(VOLUME)
            .seed_file(path, data)
            .expect("seed file");
    }

    pub fn contents(&self, path: &str) -> Vec<u8> {
        self.backend.volume(VOLUME).contents(path).expect("contents")
    }

    pub fn connect(&self) -> VolumeConnection {
        self.client.connect_volume(&self.config()).expect("connect")
    }
}

/// Deterministic non-trivial payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 256) as u8).collect()
}
