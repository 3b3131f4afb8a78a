//! In-memory storage host

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::artifact::{DirEntry, EntryKind, RemoteError, RemoteFs};

use super::failure::{FailureConfig, FailureInjector, FailureMode};

/// Remote operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Put,
    Read,
    Write,
    ListDir,
    CreateDir,
}

#[derive(Debug, Default)]
struct RemoteState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    puts: Vec<String>,
    failures: FailureInjector<RemoteOp>,
}

/// File tree kept in memory; clones share the same tree
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Contents of a remote file
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(&normalize(path)).cloned()
    }

    /// Place a file, creating its parent directories
    pub fn insert_file(&self, path: &str, contents: &[u8]) {
        let path = normalize(path);
        let mut state = self.state.lock().unwrap();
        add_parents(&mut state.dirs, &path);
        state.files.insert(path, contents.to_vec());
    }

    pub fn insert_dir(&self, path: &str) {
        let path = normalize(path);
        let mut state = self.state.lock().unwrap();
        add_parents(&mut state.dirs, &path);
        state.dirs.insert(path);
    }

    /// Remote names of all uploads, in order
    pub fn puts(&self) -> Vec<String> {
        self.state.lock().unwrap().puts.clone()
    }

    pub fn fail(&self, op: RemoteOp, config: FailureConfig) {
        self.state.lock().unwrap().failures.inject(op, config);
    }

    fn check(state: &mut RemoteState, op: RemoteOp) -> Result<(), RemoteError> {
        match state.failures.check(&op) {
            None => Ok(()),
            Some(FailureMode::Disconnect(message)) => Err(RemoteError::Connection(message)),
            Some(FailureMode::Fault { message, .. }) => Err(RemoteError::Io(message)),
        }
    }
}

impl RemoteFs for MemoryRemote {
    fn put(&mut self, local: &Path, remote: &str) -> Result<u64, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, RemoteOp::Put)?;
        let contents = fs::read(local).map_err(|e| RemoteError::Io(e.to_string()))?;
        let path = normalize(remote);
        require_parent(&state.dirs, &path)?;
        let bytes = contents.len() as u64;
        state.files.insert(path.clone(), contents);
        state.puts.push(path);
        Ok(bytes)
    }

    fn read(&mut self, remote: &str) -> Result<Vec<u8>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, RemoteOp::Read)?;
        let path = normalize(remote);
        state
            .files
            .get(&path)
            .cloned()
            .ok_or(RemoteError::NotFound(path))
    }

    fn write(&mut self, remote: &str, contents: &[u8]) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, RemoteOp::Write)?;
        let path = normalize(remote);
        require_parent(&state.dirs, &path)?;
        state.files.insert(path, contents.to_vec());
        Ok(())
    }

    fn list_dir(&mut self, remote: &str) -> Result<Vec<DirEntry>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, RemoteOp::ListDir)?;
        let dir = normalize(remote);
        if !dir.is_empty() && !state.dirs.contains(&dir) {
            return Err(RemoteError::NotFound(dir));
        }

        let child = |path: &str| -> Option<String> {
            let rest = if dir.is_empty() {
                path
            } else {
                path.strip_prefix(&dir)?.strip_prefix('/')?
            };
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };

        let mut entries: Vec<DirEntry> = state
            .dirs
            .iter()
            .filter_map(|d| child(d))
            .map(|name| DirEntry {
                name,
                kind: EntryKind::Directory,
            })
            .collect();
        entries.extend(state.files.keys().filter_map(|f| child(f)).map(|name| DirEntry {
            name,
            kind: EntryKind::File,
        }));
        Ok(entries)
    }

    fn create_dir_all(&mut self, remote: &str) -> Result<(), RemoteError> {
        let mut state = self.state.lock().unwrap();
        Self::check(&mut state, RemoteOp::CreateDir)?;
        let path = normalize(remote);
        if !path.is_empty() {
            add_parents(&mut state.dirs, &path);
            state.dirs.insert(path);
        }
        Ok(())
    }
}

fn normalize(path: &str) -> String {
    let path = path.trim_start_matches("./").trim_matches('/');
    if path == "." {
        String::new()
    } else {
        path.to_string()
    }
}

fn add_parents(dirs: &mut BTreeSet<String>, path: &str) {
    let mut end = 0;
    while let Some(pos) = path[end..].find('/') {
        end += pos;
        dirs.insert(path[..end].to_string());
        end += 1;
    }
}

fn require_parent(dirs: &BTreeSet<String>, path: &str) -> Result<(), RemoteError> {
    match path.rsplit_once('/') {
        Some((parent, _)) if !dirs.contains(parent) => Err(RemoteError::NotFound(parent.to_string())),
        _ => Ok(()),
    }
}
