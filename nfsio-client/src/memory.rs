//! In-process NFS export simulator.
//!
//! `MemoryServer` hosts any number of `server:/export` trees and hands out
//! `MemoryClient` sessions that speak the same primitive surface as a real
//! client library, including negated-errno statuses, the last-error slot and
//! `.`/`..` entries in directory streams.

use crate::client::{Connector, NfsClient};
use crate::protocol::{flags, mode, whence, NfsDirent, NfsStat64, Primitive};
use chrono::Utc;
use nfsio_common::utils::{path, url};
use nfsio_common::NfsUrl;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

const BLOCK_SIZE: u64 = 4096;
const MAX_SYMLINK_DEPTH: usize = 40;
const DIR_MODE: u32 = 0o755;
/// Largest file the in-memory export will hold
pub const MAX_FILE_SIZE: u64 = 1 << 30;
/// The only port a mount may name explicitly
pub const NFS_PORT: u16 = 2049;

type ExportKey = (String, String);

#[derive(Debug, Clone, Copy, Default)]
struct Timestamp {
    sec: u64,
    nsec: u64,
}

impl Timestamp {
    fn now() -> Self {
        let now = Utc::now();
        Self {
            sec: now.timestamp().max(0) as u64,
            nsec: now.timestamp_subsec_nanos() as u64,
        }
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    /// Children in creation order
    Dir(Vec<(String, u64)>),
    Symlink(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    perm: u32,
    uid: u32,
    gid: u32,
    nlink: u64,
    parent: u64,
    atime: Timestamp,
    mtime: Timestamp,
    ctime: Timestamp,
}

impl Node {
    fn new(kind: NodeKind, perm: u32, parent: u64, uid: u32, gid: u32) -> Self {
        let now = Timestamp::now();
        let nlink = if matches!(kind, NodeKind::Dir(_)) { 2 } else { 1 };
        Self {
            kind,
            perm: perm & 0o7777,
            uid,
            gid,
            nlink,
            parent,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn type_bits(&self) -> u32 {
        match self.kind {
            NodeKind::File(_) => mode::S_IFREG,
            NodeKind::Dir(_) => mode::S_IFDIR,
            NodeKind::Symlink(_) => mode::S_IFLNK,
        }
    }

    fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::File(data) => data.len() as u64,
            NodeKind::Dir(children) => BLOCK_SIZE.max(children.len() as u64 * 32),
            NodeKind::Symlink(target) => target.len() as u64,
        }
    }

    fn touch_modified(&mut self) {
        let now = Timestamp::now();
        self.mtime = now;
        self.ctime = now;
    }
}

struct Export {
    dev: u64,
    root: u64,
    nodes: HashMap<u64, Node>,
}

impl Export {
    fn node(&self, ino: u64) -> Result<&Node, i32> {
        self.nodes.get(&ino).ok_or(libc::ESTALE)
    }

    fn node_mut(&mut self, ino: u64) -> Result<&mut Node, i32> {
        self.nodes.get_mut(&ino).ok_or(libc::ESTALE)
    }

    fn lookup(&self, target: &str, follow_last: bool) -> Result<u64, i32> {
        self.lookup_depth(target, follow_last, 0)
    }

    fn lookup_depth(&self, target: &str, follow_last: bool, depth: usize) -> Result<u64, i32> {
        if depth > MAX_SYMLINK_DEPTH {
            return Err(libc::ELOOP);
        }

        let collapsed = path::normalize(target);
        let parts: Vec<&str> = collapsed.split('/').filter(|p| !p.is_empty()).collect();
        let mut current = self.root;
        let mut walked = "/".to_string();

        for (i, part) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            let next = match &self.node(current)?.kind {
                NodeKind::Dir(children) => children
                    .iter()
                    .find(|(name, _)| name == part)
                    .map(|(_, ino)| *ino)
                    .ok_or(libc::ENOENT)?,
                _ => return Err(libc::ENOTDIR),
            };

            if let NodeKind::Symlink(link) = &self.node(next)?.kind {
                if !last || follow_last {
                    let base = if link.starts_with('/') {
                        link.clone()
                    } else {
                        path::join(&walked, link)
                    };
                    let rest = parts[i + 1..].join("/");
                    let resolved = if rest.is_empty() { base } else { path::join(&base, &rest) };
                    return self.lookup_depth(&resolved, follow_last, depth + 1);
                }
            }

            walked = path::join(&walked, part);
            current = next;
        }

        Ok(current)
    }

    /// Resolve the parent directory of `target` and return it with the final name
    fn lookup_parent(&self, target: &str) -> Result<(u64, String), i32> {
        let collapsed = path::normalize(target);
        if collapsed == "/" {
            return Err(libc::EINVAL);
        }
        let (parent, name) = path::split_parent(&collapsed);
        let parent_ino = self.lookup(&parent, true)?;
        match self.node(parent_ino)?.kind {
            NodeKind::Dir(_) => Ok((parent_ino, name)),
            _ => Err(libc::ENOTDIR),
        }
    }

    fn child(&self, dir: u64, name: &str) -> Result<Option<u64>, i32> {
        match &self.node(dir)?.kind {
            NodeKind::Dir(children) => Ok(children
                .iter()
                .find(|(child, _)| child == name)
                .map(|(_, ino)| *ino)),
            _ => Err(libc::ENOTDIR),
        }
    }

    fn insert(&mut self, ino: u64, parent: u64, name: &str, node: Node) -> Result<(), i32> {
        let is_dir = matches!(node.kind, NodeKind::Dir(_));
        let parent_node = self.node_mut(parent)?;
        match &mut parent_node.kind {
            NodeKind::Dir(children) => children.push((name.to_string(), ino)),
            _ => return Err(libc::ENOTDIR),
        }
        if is_dir {
            parent_node.nlink += 1;
        }
        parent_node.touch_modified();
        self.nodes.insert(ino, node);
        Ok(())
    }

    fn remove(&mut self, parent: u64, name: &str, ino: u64) -> Result<(), i32> {
        let removed = self.nodes.remove(&ino).ok_or(libc::ESTALE)?;
        let parent_node = self.node_mut(parent)?;
        if let NodeKind::Dir(children) = &mut parent_node.kind {
            children.retain(|(child, _)| child != name);
        }
        if matches!(removed.kind, NodeKind::Dir(_)) {
            parent_node.nlink = parent_node.nlink.saturating_sub(1);
        }
        parent_node.touch_modified();
        Ok(())
    }

    fn fill_stat(&self, ino: u64, st: &mut NfsStat64) -> Result<(), i32> {
        let node = self.node(ino)?;
        let size = node.size();
        *st = NfsStat64 {
            nfs_dev: self.dev,
            nfs_ino: ino,
            nfs_mode: (node.type_bits() | node.perm) as u64,
            nfs_nlink: node.nlink,
            nfs_uid: node.uid as u64,
            nfs_gid: node.gid as u64,
            nfs_rdev: 0,
            nfs_size: size,
            nfs_blksize: BLOCK_SIZE,
            nfs_blocks: (size + 511) / 512,
            nfs_atime: node.atime.sec,
            nfs_mtime: node.mtime.sec,
            nfs_ctime: node.ctime.sec,
            nfs_atime_nsec: node.atime.nsec,
            nfs_mtime_nsec: node.mtime.nsec,
            nfs_ctime_nsec: node.ctime.nsec,
        };
        Ok(())
    }

    fn dirent(&self, name: &str, ino: u64) -> Result<NfsDirent, i32> {
        let node = self.node(ino)?;
        Ok(NfsDirent {
            name: name.to_string(),
            inode: ino,
            mode: node.type_bits() | node.perm,
            size: node.size(),
        })
    }
}

/// Counters describing server-side resource usage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub sessions_created: u64,
    pub sessions_active: usize,
    pub mounts: u64,
    pub files_open: usize,
    pub dirs_open: usize,
    pub fsync_calls: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

struct ServerState {
    exports: HashMap<ExportKey, Export>,
    next_ino: u64,
    next_dev: u64,
    faults: HashMap<Primitive, i32>,
    session_limit: Option<usize>,
    stats: ServerStats,
}

impl ServerState {
    fn alloc_ino(&mut self) -> u64 {
        let ino = self.next_ino;
        self.next_ino += 1;
        ino
    }

    fn take_fault(&mut self, op: Primitive) -> Option<i32> {
        self.faults.remove(&op)
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            exports: HashMap::new(),
            next_ino: 2,
            next_dev: 1,
            faults: HashMap::new(),
            session_limit: None,
            stats: ServerStats::default(),
        }
    }
}

/// Shared in-memory NFS server; clones refer to the same exports
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    /// Create a server with no exports
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish an empty export, returning its device number
    pub fn add_export(&self, server: &str, export: &str) -> u64 {
        let mut state = self.lock();
        let key = (server.to_string(), path::normalize(export));
        if let Some(existing) = state.exports.get(&key) {
            return existing.dev;
        }

        let dev = state.next_dev;
        state.next_dev += 1;
        let root = state.alloc_ino();
        let mut nodes = HashMap::new();
        nodes.insert(root, Node::new(NodeKind::Dir(Vec::new()), DIR_MODE, root, 0, 0));
        state.exports.insert(key, Export { dev, root, nodes });

        debug!("Added export {}:{} (dev {})", server, export, dev);
        dev
    }

    fn seed<F>(&self, server: &str, export: &str, target: &str, make: F) -> io::Result<u64>
    where
        F: FnOnce() -> NodeKind,
    {
        let mut state = self.lock();
        let key = (server.to_string(), path::normalize(export));
        let collapsed = path::normalize(target);
        let (parent, name) = path::split_parent(&collapsed);

        // Create missing ancestors first
        let mut dir = "/".to_string();
        for part in parent.split('/').filter(|p| !p.is_empty()) {
            dir = path::join(&dir, part);
            let exists = {
                let tree = state.exports.get(&key).ok_or_else(|| not_found(&key))?;
                tree.lookup(&dir, true).is_ok()
            };
            if !exists {
                let ino = state.alloc_ino();
                let tree = state.exports.get_mut(&key).ok_or_else(|| not_found(&key))?;
                let (parent_ino, dir_name) = tree.lookup_parent(&dir).map_err(io::Error::from_raw_os_error)?;
                tree.insert(ino, parent_ino, &dir_name, Node::new(NodeKind::Dir(Vec::new()), DIR_MODE, parent_ino, 0, 0))
                    .map_err(io::Error::from_raw_os_error)?;
            }
        }

        let ino = state.alloc_ino();
        let tree = state.exports.get_mut(&key).ok_or_else(|| not_found(&key))?;
        let parent_ino = tree.lookup(&parent, true).map_err(io::Error::from_raw_os_error)?;
        if tree.child(parent_ino, &name).map_err(io::Error::from_raw_os_error)?.is_some() {
            return Err(io::Error::from_raw_os_error(libc::EEXIST));
        }

        let kind = make();
        let perm = match kind {
            NodeKind::Dir(_) => DIR_MODE,
            NodeKind::Symlink(_) => 0o777,
            NodeKind::File(_) => 0o644,
        };
        tree.insert(ino, parent_ino, &name, Node::new(kind, perm, parent_ino, 0, 0))
            .map_err(io::Error::from_raw_os_error)?;
        Ok(ino)
    }

    /// Create a file (and any missing parent directories) inside an export
    pub fn seed_file(&self, server: &str, export: &str, target: &str, contents: impl AsRef<[u8]>) -> io::Result<u64> {
        let data = contents.as_ref().to_vec();
        self.seed(server, export, target, move || NodeKind::File(data))
    }

    /// Create a directory (and any missing parents) inside an export
    pub fn seed_dir(&self, server: &str, export: &str, target: &str) -> io::Result<u64> {
        self.seed(server, export, target, || NodeKind::Dir(Vec::new()))
    }

    /// Create a symbolic link inside an export
    pub fn seed_symlink(&self, server: &str, export: &str, target: &str, link: &str) -> io::Result<u64> {
        let link = link.to_string();
        self.seed(server, export, target, move || NodeKind::Symlink(link))
    }

    /// Contents of a file, following symbolic links
    pub fn file_contents(&self, server: &str, export: &str, target: &str) -> io::Result<Vec<u8>> {
        let state = self.lock();
        let key = (server.to_string(), path::normalize(export));
        let tree = state.exports.get(&key).ok_or_else(|| not_found(&key))?;
        let ino = tree.lookup(target, true).map_err(io::Error::from_raw_os_error)?;
        match &tree.node(ino).map_err(io::Error::from_raw_os_error)?.kind {
            NodeKind::File(data) => Ok(data.clone()),
            _ => Err(io::Error::from_raw_os_error(libc::EISDIR)),
        }
    }

    /// Make the next call of `primitive` fail with `errno`
    pub fn inject_fault(&self, primitive: Primitive, errno: i32) {
        self.lock().faults.insert(primitive, errno);
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Refuse new sessions once `limit` are alive
    pub fn limit_sessions(&self, limit: Option<usize>) {
        self.lock().session_limit = limit;
    }

    /// Snapshot of the server counters
    pub fn stats(&self) -> ServerStats {
        self.lock().stats.clone()
    }
}

fn not_found(key: &ExportKey) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("No export {}:{}", key.0, key.1))
}

impl Connector for MemoryServer {
    type Client = MemoryClient;

    fn init_context(&self) -> Option<MemoryClient> {
        let mut state = self.lock();
        if let Some(limit) = state.session_limit {
            if state.stats.sessions_active >= limit {
                debug!("Session limit {} reached", limit);
                return None;
            }
        }
        state.stats.sessions_created += 1;
        state.stats.sessions_active += 1;
        drop(state);

        Some(MemoryClient {
            server: self.clone(),
            session: Mutex::new(SessionState::default()),
        })
    }
}

#[derive(Debug, Default)]
struct SessionState {
    mounted: Option<ExportKey>,
    uid: u32,
    gid: u32,
    error: String,
}

/// Open file on a [`MemoryClient`] session
#[derive(Debug)]
pub struct MemoryFile {
    ino: u64,
    flags: i32,
    offset: u64,
}

/// Open directory stream on a [`MemoryClient`] session
#[derive(Debug)]
pub struct MemoryDir {
    entries: VecDeque<NfsDirent>,
}

/// One session with a [`MemoryServer`]
pub struct MemoryClient {
    server: MemoryServer,
    session: Mutex<SessionState>,
}

impl MemoryClient {
    fn session(&self) -> MutexGuard<'_, SessionState> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_error(&self, message: String) {
        trace!("{}", message);
        self.session().error = message;
    }

    fn fail(&self, op: Primitive, errno: i32, subject: &str) -> i32 {
        let reason = io::Error::from_raw_os_error(errno);
        self.set_error(format!("{} call failed for {}: {}", op.name(), subject, reason));
        -errno
    }

    /// Run `f` against the mounted export, applying injected faults first
    fn with_export<T, F>(&self, op: Primitive, f: F) -> Result<T, i32>
    where
        F: FnOnce(&mut Export, &mut ServerState, u32, u32) -> Result<T, i32>,
    {
        let (key, uid, gid) = {
            let session = self.session();
            (session.mounted.clone(), session.uid, session.gid)
        };

        let mut state = self.server.lock();
        if let Some(errno) = state.take_fault(op) {
            return Err(errno);
        }
        let key = key.ok_or(libc::ENOTCONN)?;

        // Detach the export so the closure can borrow server state too
        let mut tree = state.exports.remove(&key).ok_or(libc::ESTALE)?;
        let result = f(&mut tree, &mut state, uid, gid);
        state.exports.insert(key, tree);
        result
    }

    fn status(&self, op: Primitive, subject: &str, result: Result<(), i32>) -> i32 {
        match result {
            Ok(()) => 0,
            Err(errno) => self.fail(op, errno, subject),
        }
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        let mut state = self.server.lock();
        state.stats.sessions_active = state.stats.sessions_active.saturating_sub(1);
        debug!("Memory session destroyed");
    }
}

impl NfsClient for MemoryClient {
    type File = MemoryFile;
    type Dir = MemoryDir;

    fn parse_url_dir(&self, input: &str) -> Option<NfsUrl> {
        match url::parse_url_dir(input) {
            Ok(parsed) => {
                let mut session = self.session();
                if let Some(uid) = parsed.param("uid").and_then(|v| v.parse().ok()) {
                    session.uid = uid;
                }
                if let Some(gid) = parsed.param("gid").and_then(|v| v.parse().ok()) {
                    session.gid = gid;
                }
                Some(parsed)
            }
            Err(e) => {
                self.set_error(e.to_string());
                None
            }
        }
    }

    fn mount(&self, server: &str, export: &str) -> i32 {
        let mut state = self.server.lock();
        if let Some(errno) = state.take_fault(Primitive::Mount) {
            drop(state);
            return self.fail(Primitive::Mount, errno, export);
        }

        let (host, port) = url::split_server_port(server);
        let key = (host.to_string(), path::normalize(export));
        let reachable = port.map_or(true, |port| port == NFS_PORT);
        if !reachable || !state.exports.keys().any(|(known, _)| known == host) {
            drop(state);
            return self.fail(Primitive::Mount, libc::ECONNREFUSED, server);
        }
        if !state.exports.contains_key(&key) {
            drop(state);
            return self.fail(Primitive::Mount, libc::ENOENT, export);
        }

        state.stats.mounts += 1;
        drop(state);
        debug!("Mounted {}:{}", server, export);
        self.session().mounted = Some(key);
        0
    }

    fn open(&self, target: &str, open_flags: i32, fh: &mut Option<MemoryFile>) -> i32 {
        let result = self.with_export(Primitive::Open, |tree, state, _, _| {
            let ino = tree.lookup(target, true)?;
            let node = tree.node_mut(ino)?;
            match &mut node.kind {
                NodeKind::Dir(_) if flags::writable(open_flags) => return Err(libc::EISDIR),
                NodeKind::File(data) if open_flags & flags::O_TRUNC != 0 && flags::writable(open_flags) => {
                    data.clear();
                    node.touch_modified();
                }
                _ => {}
            }
            state.stats.files_open += 1;
            Ok(MemoryFile { ino, flags: open_flags, offset: 0 })
        });

        match result {
            Ok(file) => {
                *fh = Some(file);
                0
            }
            Err(errno) => self.fail(Primitive::Open, errno, target),
        }
    }

    fn create(&self, target: &str, open_flags: i32, perm: u32, fh: &mut Option<MemoryFile>) -> i32 {
        let result = self.with_export(Primitive::Create, |tree, state, uid, gid| {
            let (parent, name) = tree.lookup_parent(target)?;
            let ino = match tree.child(parent, &name)? {
                Some(_) if open_flags & flags::O_EXCL != 0 => return Err(libc::EEXIST),
                Some(existing) => {
                    let ino = tree.lookup(target, true)?;
                    let node = tree.node_mut(ino)?;
                    match &mut node.kind {
                        NodeKind::File(data) => {
                            if open_flags & flags::O_TRUNC != 0 {
                                data.clear();
                                node.touch_modified();
                            }
                        }
                        NodeKind::Dir(_) => return Err(libc::EISDIR),
                        NodeKind::Symlink(_) => return Err(libc::ELOOP),
                    }
                    trace!("create reused existing entry {}", existing);
                    ino
                }
                None => {
                    let ino = state.alloc_ino();
                    tree.insert(ino, parent, &name, Node::new(NodeKind::File(Vec::new()), perm, parent, uid, gid))?;
                    ino
                }
            };
            state.stats.files_open += 1;
            Ok(MemoryFile { ino, flags: open_flags, offset: 0 })
        });

        match result {
            Ok(file) => {
                *fh = Some(file);
                0
            }
            Err(errno) => self.fail(Primitive::Create, errno, target),
        }
    }

    fn close(&self, fh: &mut MemoryFile) -> i32 {
        let mut state = self.server.lock();
        state.stats.files_open = state.stats.files_open.saturating_sub(1);
        let fault = state.take_fault(Primitive::Close);
        drop(state);

        match fault {
            Some(errno) => self.fail(Primitive::Close, errno, &format!("inode {}", fh.ino)),
            None => 0,
        }
    }

    fn read(&self, fh: &mut MemoryFile, buf: &mut [u8]) -> i64 {
        let result = self.with_export(Primitive::Read, |tree, state, _, _| {
            let node = tree.node_mut(fh.ino)?;
            let data = match &node.kind {
                NodeKind::File(data) => data,
                NodeKind::Dir(_) => return Err(libc::EISDIR),
                NodeKind::Symlink(_) => return Err(libc::EINVAL),
            };
            let start = (fh.offset as usize).min(data.len());
            let count = buf.len().min(data.len() - start);
            buf[..count].copy_from_slice(&data[start..start + count]);
            node.atime = Timestamp::now();
            fh.offset += count as u64;
            state.stats.bytes_read += count as u64;
            Ok(count)
        });

        match result {
            Ok(count) => count as i64,
            Err(errno) => self.fail(Primitive::Read, errno, &format!("inode {}", fh.ino)) as i64,
        }
    }

    fn write(&self, fh: &mut MemoryFile, buf: &[u8]) -> i64 {
        let append = fh.flags & flags::O_APPEND != 0;
        let result = self.with_export(Primitive::Write, |tree, state, _, _| {
            let node = tree.node_mut(fh.ino)?;
            let data = match &mut node.kind {
                NodeKind::File(data) => data,
                NodeKind::Dir(_) => return Err(libc::EISDIR),
                NodeKind::Symlink(_) => return Err(libc::EINVAL),
            };
            if append {
                fh.offset = data.len() as u64;
            }
            let end = fh.offset.saturating_add(buf.len() as u64);
            if end > MAX_FILE_SIZE {
                return Err(libc::EFBIG);
            }
            let (start, end) = (fh.offset as usize, end as usize);
            if data.len() < end {
                data.resize(end, 0);
            }
            data[start..end].copy_from_slice(buf);
            node.touch_modified();
            fh.offset = end as u64;
            state.stats.bytes_written += buf.len() as u64;
            Ok(buf.len())
        });

        match result {
            Ok(count) => count as i64,
            Err(errno) => self.fail(Primitive::Write, errno, &format!("inode {}", fh.ino)) as i64,
        }
    }

    fn lseek(&self, fh: &mut MemoryFile, offset: i64, seek_whence: i32, current: &mut u64) -> i32 {
        let result = self.with_export(Primitive::Lseek, |tree, _, _, _| {
            let base = match seek_whence {
                whence::SEEK_SET => 0,
                whence::SEEK_CUR => fh.offset as i64,
                whence::SEEK_END => tree.node(fh.ino)?.size() as i64,
                _ => return Err(libc::EINVAL),
            };
            let target = base.checked_add(offset).ok_or(libc::EOVERFLOW)?;
            if target < 0 {
                return Err(libc::EINVAL);
            }
            Ok(target as u64)
        });

        match result {
            Ok(position) => {
                fh.offset = position;
                *current = position;
                0
            }
            Err(errno) => self.fail(Primitive::Lseek, errno, &format!("inode {}", fh.ino)),
        }
    }

    fn ftruncate(&self, fh: &mut MemoryFile, length: u64) -> i32 {
        let result = self.with_export(Primitive::Ftruncate, |tree, _, _, _| {
            let node = tree.node_mut(fh.ino)?;
            match &mut node.kind {
                NodeKind::File(_) if length > MAX_FILE_SIZE => return Err(libc::EFBIG),
                NodeKind::File(data) => data.resize(length as usize, 0),
                NodeKind::Dir(_) => return Err(libc::EISDIR),
                NodeKind::Symlink(_) => return Err(libc::EINVAL),
            }
            node.touch_modified();
            Ok(())
        });
        self.status(Primitive::Ftruncate, &format!("inode {}", fh.ino), result)
    }

    fn fsync(&self, fh: &mut MemoryFile) -> i32 {
        let result = self.with_export(Primitive::Fsync, |tree, state, _, _| {
            tree.node(fh.ino)?;
            state.stats.fsync_calls += 1;
            Ok(())
        });
        self.status(Primitive::Fsync, &format!("inode {}", fh.ino), result)
    }

    fn stat64(&self, target: &str, st: &mut NfsStat64) -> i32 {
        let result = self.with_export(Primitive::Stat, |tree, _, _, _| {
            let ino = tree.lookup(target, true)?;
            tree.fill_stat(ino, st)
        });
        self.status(Primitive::Stat, target, result)
    }

    fn lstat64(&self, target: &str, st: &mut NfsStat64) -> i32 {
        let result = self.with_export(Primitive::Lstat, |tree, _, _, _| {
            let ino = tree.lookup(target, false)?;
            tree.fill_stat(ino, st)
        });
        self.status(Primitive::Lstat, target, result)
    }

    fn fstat64(&self, fh: &MemoryFile, st: &mut NfsStat64) -> i32 {
        let result = self.with_export(Primitive::Fstat, |tree, _, _, _| tree.fill_stat(fh.ino, st));
        self.status(Primitive::Fstat, &format!("inode {}", fh.ino), result)
    }

    fn unlink(&self, target: &str) -> i32 {
        let result = self.with_export(Primitive::Unlink, |tree, _, _, _| {
            let (parent, name) = tree.lookup_parent(target)?;
            let ino = tree.child(parent, &name)?.ok_or(libc::ENOENT)?;
            if matches!(tree.node(ino)?.kind, NodeKind::Dir(_)) {
                return Err(libc::EISDIR);
            }
            tree.remove(parent, &name, ino)
        });
        self.status(Primitive::Unlink, target, result)
    }

    fn mkdir(&self, target: &str) -> i32 {
        let result = self.with_export(Primitive::Mkdir, |tree, state, uid, gid| {
            let (parent, name) = tree.lookup_parent(target)?;
            if tree.child(parent, &name)?.is_some() {
                return Err(libc::EEXIST);
            }
            let ino = state.alloc_ino();
            tree.insert(ino, parent, &name, Node::new(NodeKind::Dir(Vec::new()), DIR_MODE, parent, uid, gid))
        });
        self.status(Primitive::Mkdir, target, result)
    }

    fn rmdir(&self, target: &str) -> i32 {
        let result = self.with_export(Primitive::Rmdir, |tree, _, _, _| {
            let (parent, name) = tree.lookup_parent(target)?;
            let ino = tree.child(parent, &name)?.ok_or(libc::ENOENT)?;
            match &tree.node(ino)?.kind {
                NodeKind::Dir(children) if !children.is_empty() => return Err(libc::ENOTEMPTY),
                NodeKind::Dir(_) => {}
                _ => return Err(libc::ENOTDIR),
            }
            tree.remove(parent, &name, ino)
        });
        self.status(Primitive::Rmdir, target, result)
    }

    fn opendir(&self, target: &str, dir: &mut Option<MemoryDir>) -> i32 {
        let result = self.with_export(Primitive::Opendir, |tree, state, _, _| {
            let ino = tree.lookup(target, true)?;
            let node = tree.node(ino)?;
            let children = match &node.kind {
                NodeKind::Dir(children) => children,
                _ => return Err(libc::ENOTDIR),
            };

            let mut entries = VecDeque::with_capacity(children.len() + 2);
            entries.push_back(tree.dirent(".", ino)?);
            entries.push_back(tree.dirent("..", node.parent)?);
            for (name, child) in children {
                entries.push_back(tree.dirent(name, *child)?);
            }
            state.stats.dirs_open += 1;
            Ok(MemoryDir { entries })
        });

        match result {
            Ok(stream) => {
                *dir = Some(stream);
                0
            }
            Err(errno) => self.fail(Primitive::Opendir, errno, target),
        }
    }

    fn readdir(&self, dir: &mut MemoryDir) -> Option<NfsDirent> {
        dir.entries.pop_front()
    }

    fn closedir(&self, dir: MemoryDir) {
        let mut state = self.server.lock();
        state.stats.dirs_open = state.stats.dirs_open.saturating_sub(1);
        trace!("closedir with {} unread entries", dir.entries.len());
    }

    fn get_error(&self) -> String {
        self.session().error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted() -> (MemoryServer, MemoryClient) {
        let server = MemoryServer::new();
        server.add_export("filer", "/export");
        let client = server.init_context().unwrap();
        assert_eq!(client.mount("filer", "/export"), 0);
        (server, client)
    }

    #[test]
    fn test_mount_errors() {
        let server = MemoryServer::new();
        server.add_export("filer", "/export");
        let client = server.init_context().unwrap();

        assert_eq!(client.mount("elsewhere", "/export"), -libc::ECONNREFUSED);
        assert_eq!(client.mount("filer", "/missing"), -libc::ENOENT);
        assert!(client.get_error().contains("mount"));

        let mut st = NfsStat64::default();
        assert_eq!(client.stat64("/", &mut st), -libc::ENOTCONN);
    }

    #[test]
    fn test_mount_port_must_be_nfs_port() {
        let server = MemoryServer::new();
        server.add_export("filer", "/export");
        let client = server.init_context().unwrap();

        assert_eq!(client.mount("filer:1234", "/export"), -libc::ECONNREFUSED);
        assert!(client.get_error().contains("filer:1234"));
        assert_eq!(client.mount(&format!("filer:{}", NFS_PORT), "/export"), 0);
    }

    #[test]
    fn test_file_size_is_bounded() {
        let (_server, client) = mounted();
        let mut fh = None;
        assert_eq!(client.create("/big", flags::O_RDWR | flags::O_CREAT, 0o644, &mut fh), 0);
        let mut file = fh.take().unwrap();

        let mut pos = 0;
        assert_eq!(client.lseek(&mut file, 1 << 40, whence::SEEK_SET, &mut pos), 0);
        assert_eq!(client.write(&mut file, b"x"), -(libc::EFBIG as i64));
        assert_eq!(client.ftruncate(&mut file, 1 << 40), -libc::EFBIG);
        assert_eq!(client.ftruncate(&mut file, MAX_FILE_SIZE + 1), -libc::EFBIG);

        let mut st = NfsStat64::default();
        assert_eq!(client.fstat64(&mut file, &mut st), 0);
        assert_eq!(st.nfs_size, 0);
        client.close(&mut file);
    }

    #[test]
    fn test_open_missing_then_create() {
        let (server, client) = mounted();
        let mut fh = None;

        assert_eq!(client.open("/new.txt", flags::O_WRONLY, &mut fh), -libc::ENOENT);
        assert!(fh.is_none());

        assert_eq!(client.create("/new.txt", flags::O_WRONLY | flags::O_CREAT, 0o664, &mut fh), 0);
        let mut file = fh.take().unwrap();
        assert_eq!(client.write(&mut file, b"abc"), 3);
        assert_eq!(client.close(&mut file), 0);

        assert_eq!(server.file_contents("filer", "/export", "/new.txt").unwrap(), b"abc");
        assert_eq!(server.stats().files_open, 0);
    }

    #[test]
    fn test_exclusive_create() {
        let (server, client) = mounted();
        server.seed_file("filer", "/export", "/taken", "x").unwrap();
        let mut fh = None;
        let flags = flags::O_WRONLY | flags::O_CREAT | flags::O_EXCL;
        assert_eq!(client.create("/taken", flags, 0o600, &mut fh), -libc::EEXIST);
    }

    #[test]
    fn test_append_and_seek() {
        let (server, client) = mounted();
        server.seed_file("filer", "/export", "/log", "12345").unwrap();

        let mut fh = None;
        assert_eq!(client.open("/log", flags::O_WRONLY | flags::O_APPEND, &mut fh), 0);
        let mut file = fh.take().unwrap();
        assert_eq!(client.write(&mut file, b"67"), 2);

        let mut pos = 0;
        assert_eq!(client.lseek(&mut file, -3, whence::SEEK_END, &mut pos), 0);
        assert_eq!(pos, 4);
        assert_eq!(client.lseek(&mut file, -10, whence::SEEK_CUR, &mut pos), -libc::EINVAL);
        client.close(&mut file);

        assert_eq!(server.file_contents("filer", "/export", "/log").unwrap(), b"1234567");
    }

    #[test]
    fn test_symlink_resolution() {
        let (server, client) = mounted();
        server.seed_file("filer", "/export", "/data/real.txt", "payload").unwrap();
        server.seed_symlink("filer", "/export", "/link", "data/real.txt").unwrap();
        server.seed_symlink("filer", "/export", "/loop", "/loop").unwrap();

        let mut followed = NfsStat64::default();
        let mut own = NfsStat64::default();
        assert_eq!(client.stat64("/link", &mut followed), 0);
        assert_eq!(client.lstat64("/link", &mut own), 0);
        assert_eq!(followed.nfs_size, 7);
        assert_eq!(followed.nfs_mode as u32 & mode::S_IFMT, mode::S_IFREG);
        assert_eq!(own.nfs_mode as u32 & mode::S_IFMT, mode::S_IFLNK);

        assert_eq!(client.stat64("/loop", &mut followed), -libc::ELOOP);
    }

    #[test]
    fn test_directory_stream_order() {
        let (server, client) = mounted();
        for name in ["c", "a", "b"] {
            server.seed_file("filer", "/export", &format!("/dir/{}", name), "").unwrap();
        }

        let mut dir = None;
        assert_eq!(client.opendir("/dir", &mut dir), 0);
        let mut dir = dir.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = client.readdir(&mut dir) {
            names.push(entry.name);
        }
        assert_eq!(server.stats().dirs_open, 1);
        client.closedir(dir);

        assert_eq!(names, vec![".", "..", "c", "a", "b"]);
        assert_eq!(server.stats().dirs_open, 0);
    }

    #[test]
    fn test_directory_mutations() {
        let (_server, client) = mounted();

        assert_eq!(client.mkdir("/d"), 0);
        assert_eq!(client.mkdir("/d"), -libc::EEXIST);
        assert_eq!(client.mkdir("/missing/d"), -libc::ENOENT);

        let mut fh = None;
        assert_eq!(client.create("/d/f", flags::O_WRONLY, 0o644, &mut fh), 0);
        client.close(fh.as_mut().unwrap());

        assert_eq!(client.rmdir("/d"), -libc::ENOTEMPTY);
        assert_eq!(client.unlink("/d"), -libc::EISDIR);
        assert_eq!(client.rmdir("/d/f"), -libc::ENOTDIR);
        assert_eq!(client.unlink("/d/f"), 0);
        assert_eq!(client.rmdir("/d"), 0);
        assert_eq!(client.unlink("/d/f"), -libc::ENOENT);
    }

    #[test]
    fn test_fault_injection_is_one_shot() {
        let (server, client) = mounted();
        server.seed_file("filer", "/export", "/f", "x").unwrap();
        server.inject_fault(Primitive::Stat, libc::EIO);

        let mut st = NfsStat64::default();
        assert_eq!(client.stat64("/f", &mut st), -libc::EIO);
        assert!(client.get_error().starts_with("stat call failed"));
        assert_eq!(client.stat64("/f", &mut st), 0);
    }

    #[test]
    fn test_session_accounting() {
        let server = MemoryServer::new();
        server.limit_sessions(Some(1));

        let first = server.init_context();
        assert!(first.is_some());
        assert!(server.init_context().is_none());
        drop(first);

        assert_eq!(server.stats().sessions_active, 0);
        assert_eq!(server.stats().sessions_created, 1);
    }

    #[test]
    fn test_url_params_set_owner() {
        let (_server, client) = mounted();
        assert!(client.parse_url_dir("nfs://filer/export?uid=1000&gid=100").is_some());
        assert!(client.parse_url_dir("bogus").is_none());
        assert!(client.get_error().contains("Invalid URL"));

        let mut fh = None;
        assert_eq!(client.create("/owned", flags::O_WRONLY, 0o640, &mut fh), 0);
        let mut st = NfsStat64::default();
        assert_eq!(client.fstat64(fh.as_ref().unwrap(), &mut st), 0);
        assert_eq!((st.nfs_uid, st.nfs_gid), (1000, 100));
        assert_eq!(st.nfs_mode as u32, mode::S_IFREG | 0o640);
    }
}
