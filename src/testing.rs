//! Fakes and fixtures shared by the unit tests.

use std::{
    collections::HashSet,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    cache::ArtifactFetcher,
    error::{DownloadError, ProcessError, ResolveError},
    instance::ServerInstance,
    process::ProcessController,
    resolver::{Product, Release, VersionResolver},
};

pub fn release(version: &str) -> Release {
    Release::from_url(format!(
        "https://www.minecraft.net/bedrockdedicatedserver/bin-linux/bedrock-server-{}.zip",
        version
    ))
    .unwrap()
}

/// Lays out a small server tree under `parent/name`.
pub fn make_instance(parent: &Path, name: &str, binary: &str) -> ServerInstance {
    let root = parent.join(name);
    fs::create_dir_all(root.join("worlds/level/db")).unwrap();
    fs::write(root.join("worlds/level/level.dat"), format!("world-of-{}", name)).unwrap();
    fs::write(root.join("worlds/level/db/000005.ldb"), [7u8; 64]).unwrap();
    fs::write(root.join("allowlist.json"), br#"[{"name":"Steve"}]"#).unwrap();
    fs::write(root.join("permissions.json"), br#"[{"permission":"operator"}]"#).unwrap();
    fs::write(root.join("server.properties"), format!("server-name={}\n", name)).unwrap();
    fs::write(root.join("bedrock_server"), binary).unwrap();
    ServerInstance::new(root)
}

pub struct FakeResolver {
    result: Result<Release, ResolveError>,
}

impl FakeResolver {
    pub fn ok(release: Release) -> Self {
        Self {
            result: Ok(release),
        }
    }

    pub fn err(e: ResolveError) -> Self {
        Self { result: Err(e) }
    }
}

#[async_trait]
impl VersionResolver for FakeResolver {
    async fn resolve(&self, _product: Product) -> Result<Release, ResolveError> {
        self.result.clone()
    }
}

/// Serves a zip built from in-memory files, or fails every time.
pub struct ZipFetcher {
    files: Option<Vec<(String, Vec<u8>)>>,
    calls: AtomicUsize,
}

impl ZipFetcher {
    pub fn new(files: &[(&str, &[u8])]) -> Self {
        Self {
            files: Some(
                files
                    .iter()
                    .map(|(n, d)| (n.to_string(), d.to_vec()))
                    .collect(),
            ),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            files: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactFetcher for ZipFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(files) = &self.files else {
            return Err(DownloadError::Timeout {
                url: url.to_string(),
            });
        };

        let file = fs::File::create(dest).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, data) in files {
            zip.start_file(name.as_str(), options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        Ok(())
    }
}

/// In-memory process table keyed by instance root.
#[derive(Default)]
pub struct FakeProcesses {
    running: Mutex<HashSet<PathBuf>>,
    stops: AtomicUsize,
}

impl FakeProcesses {
    pub fn set_running(&self, instance: &ServerInstance) {
        self.running
            .lock()
            .unwrap()
            .insert(instance.root_dir.clone());
    }

    pub fn is_running_now(&self, instance: &ServerInstance) -> bool {
        self.running.lock().unwrap().contains(&instance.root_dir)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessController for FakeProcesses {
    async fn is_running(&self, instance: &ServerInstance) -> Result<bool, ProcessError> {
        Ok(self.is_running_now(instance))
    }

    async fn stop(&self, instance: &ServerInstance) -> Result<(), ProcessError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.lock().unwrap().remove(&instance.root_dir);
        Ok(())
    }

    async fn start(&self, instance: &ServerInstance) -> Result<(), ProcessError> {
        let exe = instance.root_dir.join("bedrock_server");
        if !exe.is_file() {
            return Err(ProcessError::MissingExecutable(exe));
        }
        self.set_running(instance);
        Ok(())
    }
}
