//! The connection: one open database directory, its shared cache and
//! transaction manager, and the registry of open tables.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::block::BlockManager;
use crate::btree::{Cursor, Tree};
use crate::cache::PageCache;
use crate::collab::{EventHandler, TracingEventHandler};
use crate::common::config::{DEFAULT_LEAF_PAGE_MAX, DEFAULT_OVERFLOW_SIZE_THRESHOLD_PCT};
use crate::config::{self, ConfigValue, FieldSpec, Schema};
use crate::error::{Error, Result};
use crate::storage::page::PageKind;
use crate::txn::{IsolationLevel, Txn, TxnManager};

use super::metadata;
use super::uri::{Scheme, Uri};

const CONNECTION_SCHEMA: Schema = Schema::new(
    "Connection.open",
    &[
        FieldSpec::bool("create"),
        FieldSpec::int("cache_size").with_range(1024 * 1024, i64::MAX),
        FieldSpec::int("eviction_target").with_range(1, 99),
        FieldSpec::int("eviction_trigger").with_range(1, 100),
        FieldSpec::int("leaf_page_max").with_range(512, i64::MAX),
        FieldSpec::int("overflow_threshold").with_range(1, i64::MAX),
    ],
);

const DEFAULT_CACHE_SIZE: u64 = 100 * 1024 * 1024;

/// One open database directory: the shared page cache, transaction
/// manager, metadata tree, and the registry of tables opened within it.
pub struct Connection {
    home: PathBuf,
    cache: Arc<PageCache>,
    txn: Arc<TxnManager>,
    block_managers: RwLock<HashMap<String, Arc<BlockManager>>>,
    trees: RwLock<HashMap<String, Arc<Tree>>>,
    metadata_tree: Arc<Tree>,
    metadata_block_mgr: Arc<BlockManager>,
    next_tree_id: AtomicU64,
    leaf_page_max: usize,
    overflow_threshold: usize,
    event_handler: RwLock<Arc<dyn EventHandler>>,
    panicked: AtomicBool,
}

impl Connection {
    /// Open (creating if `create=true` is given and `home` doesn't exist
    /// yet) a database directory, recovering every previously created
    /// table from the metadata tree.
    pub fn open<P: AsRef<Path>>(home: P, config_str: &str) -> Result<Arc<Connection>> {
        let home = home.as_ref().to_path_buf();
        let cfg = config::parse(config_str)?;
        CONNECTION_SCHEMA.validate(&cfg)?;

        let create = cfg.get("create").and_then(ConfigValue::as_bool).unwrap_or(false);
        if !home.exists() {
            if !create {
                return Err(Error::Config(format!(
                    "home directory '{}' does not exist (pass create=true to create it)",
                    home.display()
                )));
            }
            fs::create_dir_all(&home)?;
        }

        let cache_size = cfg
            .get("cache_size")
            .and_then(ConfigValue::as_int)
            .map(|v| v as u64)
            .unwrap_or(DEFAULT_CACHE_SIZE);
        let leaf_page_max = cfg
            .get("leaf_page_max")
            .and_then(ConfigValue::as_int)
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_LEAF_PAGE_MAX);
        let overflow_threshold = cfg
            .get("overflow_threshold")
            .and_then(ConfigValue::as_int)
            .map(|v| v as usize)
            .unwrap_or(leaf_page_max * DEFAULT_OVERFLOW_SIZE_THRESHOLD_PCT as usize / 100);

        let cache = Arc::new(PageCache::new(cache_size));
        let txn = Arc::new(TxnManager::new());
        let (metadata_tree, metadata_block_mgr) =
            metadata::open_metadata_tree(&home, cache.clone(), txn.clone(), leaf_page_max, overflow_threshold)?;

        let conn = Arc::new(Connection {
            home,
            cache,
            txn,
            block_managers: RwLock::new(HashMap::new()),
            trees: RwLock::new(HashMap::new()),
            metadata_tree,
            metadata_block_mgr,
            next_tree_id: AtomicU64::new(1),
            leaf_page_max,
            overflow_threshold,
            event_handler: RwLock::new(Arc::new(TracingEventHandler)),
            panicked: AtomicBool::new(false),
        });
        conn.recover_tables()?;
        Ok(conn)
    }

    /// Scan every row of the metadata tree and reopen the table it names,
    /// restoring `next_tree_id` past the highest id seen.
    fn recover_tables(self: &Arc<Self>) -> Result<()> {
        let txn = Arc::new(Mutex::new(self.txn.begin(IsolationLevel::Snapshot)));
        let mut cursor = match Cursor::open(self.metadata_tree.clone(), txn, false) {
            Ok(c) => c,
            Err(Error::NotFound) => return Ok(()),
            Err(e) => return Err(e),
        };

        let mut rows = Vec::new();
        loop {
            match cursor.next() {
                Ok(()) => rows.push((cursor.key().to_vec(), cursor.value().to_vec())),
                Err(Error::NotFound) => break,
                Err(e) => return Err(e),
            }
        }

        for (key, value) in rows {
            let name = String::from_utf8(key)
                .map_err(|_| Error::Corruption("metadata row key is not valid UTF-8".into()))?;
            let value_str = String::from_utf8(value)
                .map_err(|_| Error::Corruption("metadata row value is not valid UTF-8".into()))?;
            let record = config::parse(&value_str)?;
            let id = record
                .get("id")
                .and_then(ConfigValue::as_int)
                .ok_or_else(|| Error::Corruption(format!("metadata row for '{name}' is missing 'id'")))?
                as u64;
            let kind = match record.get("type").and_then(ConfigValue::as_str) {
                Some("col-fix") => PageKind::ColFixLeaf,
                Some("col-var") => PageKind::ColVarLeaf,
                _ => PageKind::RowLeaf,
            };

            self.next_tree_id.fetch_max(id + 1, Ordering::SeqCst);
            let data_path = self.table_path(&name);
            let root_path = self.root_cookie_path(&name);
            let existing_root = metadata::read_root_cookie(&root_path)?;
            let block_mgr = Arc::new(if data_path.exists() {
                BlockManager::open(&data_path)?
            } else {
                BlockManager::create(&data_path)?
            });
            let tree = match existing_root {
                Some(addr) if addr.is_valid() => Tree::open(
                    id,
                    addr,
                    block_mgr.clone(),
                    self.cache.clone(),
                    self.txn.clone(),
                    self.leaf_page_max,
                    self.overflow_threshold,
                ),
                _ => Tree::create(
                    id,
                    kind,
                    block_mgr.clone(),
                    self.cache.clone(),
                    self.txn.clone(),
                    self.leaf_page_max,
                    self.overflow_threshold,
                ),
            };
            self.block_managers.write().insert(name.clone(), block_mgr);
            self.trees.write().insert(name, Arc::new(tree));
        }
        Ok(())
    }

    /// Open a new session against this connection. Sessions are cheap:
    /// one per thread is the expected usage pattern.
    pub fn open_session(self: &Arc<Self>) -> super::session::Session {
        super::session::Session::new(self.clone())
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    pub fn txn_manager(&self) -> &Arc<TxnManager> {
        &self.txn
    }

    pub fn event_handler(&self) -> Arc<dyn EventHandler> {
        self.event_handler.read().clone()
    }

    /// Replace the default [`TracingEventHandler`] sink.
    pub fn set_event_handler(&self, handler: Arc<dyn EventHandler>) {
        *self.event_handler.write() = handler;
    }

    pub(super) fn check_not_panicked(&self) -> Result<()> {
        if self.panicked.load(Ordering::Relaxed) {
            return Err(Error::Panic("connection is panicked; open a new one".into()));
        }
        Ok(())
    }

    pub(super) fn mark_panicked(&self, reason: &str) {
        self.panicked.store(true, Ordering::Relaxed);
        self.event_handler.read().on_error("PANIC", reason);
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.home.join(format!("{name}.ae"))
    }

    fn root_cookie_path(&self, name: &str) -> PathBuf {
        self.home.join(format!("{name}.root"))
    }

    pub(super) fn metadata_tree(&self) -> &Arc<Tree> {
        &self.metadata_tree
    }

    pub(super) fn tree_for(&self, uri: &Uri) -> Result<Arc<Tree>> {
        match uri.scheme {
            Scheme::Metadata => Ok(self.metadata_tree.clone()),
            Scheme::Table => self
                .trees
                .read()
                .get(&uri.name)
                .cloned()
                .ok_or(Error::NotFound),
            other => Err(Error::Unsupported(format!(
                "cursors are not supported for scheme '{}'",
                other.as_str()
            ))),
        }
    }

    /// Run `f` under a fresh snapshot transaction that is committed if `f`
    /// succeeds and rolled back otherwise — the pattern schema operations
    /// (create/drop/rename) use to keep the metadata tree consistent
    /// without requiring the caller to have an open transaction.
    pub(super) fn with_internal_txn<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Arc<Mutex<Txn>>) -> Result<()>,
    {
        let txn = Arc::new(Mutex::new(self.txn.begin(IsolationLevel::Snapshot)));
        let result = f(&txn);
        let mut guard = txn.lock();
        match &result {
            Ok(()) => self.txn.commit(&mut guard)?,
            Err(_) => {
                let _ = self.txn.rollback(&mut guard);
            }
        }
        drop(guard);
        result
    }

    pub(super) fn create_table(
        self: &Arc<Self>,
        name: &str,
        kind: PageKind,
        leaf_page_max: usize,
        overflow_threshold: usize,
    ) -> Result<()> {
        if self.trees.read().contains_key(name) {
            return Err(Error::DuplicateKey);
        }
        let id = self.next_tree_id.fetch_add(1, Ordering::SeqCst);
        let block_mgr = Arc::new(BlockManager::create(self.table_path(name))?);
        let tree = Arc::new(Tree::create(
            id,
            kind,
            block_mgr.clone(),
            self.cache.clone(),
            self.txn.clone(),
            leaf_page_max,
            overflow_threshold,
        ));

        let type_str = match kind {
            PageKind::ColFixLeaf => "col-fix",
            PageKind::ColVarLeaf => "col-var",
            _ => "row",
        };
        let record = format!("id={id},type={type_str}");
        self.with_internal_txn(|txn| {
            let mut cursor = Cursor::open(self.metadata_tree.clone(), txn.clone(), false)?;
            cursor.set_key(name.as_bytes().to_vec());
            cursor.set_value(record.clone().into_bytes());
            cursor.insert()
        })?;

        self.block_managers.write().insert(name.to_string(), block_mgr);
        self.trees.write().insert(name.to_string(), tree);
        Ok(())
    }

    pub(super) fn drop_table(&self, name: &str) -> Result<()> {
        if !self.trees.read().contains_key(name) {
            return Err(Error::NotFound);
        }
        self.with_internal_txn(|txn| {
            let mut cursor = Cursor::open(self.metadata_tree.clone(), txn.clone(), false)?;
            cursor.set_key(name.as_bytes().to_vec());
            cursor.remove()
        })?;
        self.trees.write().remove(name);
        self.block_managers.write().remove(name);
        let _ = fs::remove_file(self.table_path(name));
        let _ = fs::remove_file(self.root_cookie_path(name));
        Ok(())
    }

    pub(super) fn rename_table(&self, old_name: &str, new_name: &str) -> Result<()> {
        if !self.trees.read().contains_key(old_name) {
            return Err(Error::NotFound);
        }
        if self.trees.read().contains_key(new_name) {
            return Err(Error::DuplicateKey);
        }
        let id = {
            let cursor_txn = Arc::new(Mutex::new(self.txn.begin(IsolationLevel::Snapshot)));
            let mut cursor = Cursor::open(self.metadata_tree.clone(), cursor_txn, false)?;
            cursor.set_key(old_name.as_bytes().to_vec());
            cursor.search()?;
            let value = String::from_utf8(cursor.value().to_vec())
                .map_err(|_| Error::Corruption("metadata row value is not valid UTF-8".into()))?;
            let record = config::parse(&value)?;
            record.get("id").and_then(ConfigValue::as_int).unwrap_or(0)
        };

        let old_path = self.table_path(old_name);
        let new_path = self.table_path(new_name);
        fs::rename(&old_path, &new_path)?;
        let old_root = self.root_cookie_path(old_name);
        let new_root = self.root_cookie_path(new_name);
        if old_root.exists() {
            fs::rename(&old_root, &new_root)?;
        }

        let type_str = "row";
        let record = format!("id={id},type={type_str}");
        self.with_internal_txn(|txn| {
            let mut cursor = Cursor::open(self.metadata_tree.clone(), txn.clone(), false)?;
            cursor.set_key(old_name.as_bytes().to_vec());
            cursor.remove()?;
            cursor.set_key(new_name.as_bytes().to_vec());
            cursor.set_value(record.clone().into_bytes());
            cursor.insert()
        })?;

        let mut trees = self.trees.write();
        if let Some(tree) = trees.remove(old_name) {
            trees.insert(new_name.to_string(), tree);
        }
        let mut block_managers = self.block_managers.write();
        if let Some(bm) = block_managers.remove(old_name) {
            block_managers.insert(new_name.to_string(), bm);
        }
        Ok(())
    }

    /// Flush every resident page of `tree` to disk by repeatedly evicting
    /// its candidates until the root itself has a durable address. Used
    /// by checkpoint, close, and compact — none of which can rely on
    /// memory-pressure-driven eviction to do this promptly.
    fn flush_tree(tree: &Tree) -> Result<()> {
        use crate::cache::Evictable;
        let mut stalled_rounds = 0;
        while tree.root_addr().is_none() {
            let candidates = tree.candidates();
            if candidates.is_empty() {
                break;
            }
            let mut progressed = false;
            for page in candidates {
                match tree.evict(page) {
                    Ok(crate::cache::EvictOutcome::Evicted(_)) => progressed = true,
                    Ok(crate::cache::EvictOutcome::LeftDirty) => {}
                    Err(Error::Busy) => {}
                    Err(e) => return Err(e),
                }
            }
            if !progressed {
                stalled_rounds += 1;
                if stalled_rounds > 8 {
                    return Err(Error::Busy);
                }
            } else {
                stalled_rounds = 0;
            }
        }
        Ok(())
    }

    /// Checkpoint every open table plus the metadata tree: flush each to
    /// disk, capture and resolve a block-manager checkpoint, and record
    /// the new root via its turtle-style cookie file.
    pub(super) fn checkpoint_all(&self, name: &str) -> Result<()> {
        let trees: Vec<(String, Arc<Tree>, Arc<BlockManager>)> = {
            let trees = self.trees.read();
            let block_managers = self.block_managers.read();
            trees
                .iter()
                .filter_map(|(n, t)| block_managers.get(n).map(|bm| (n.clone(), t.clone(), bm.clone())))
                .collect()
        };

        for (table_name, tree, block_mgr) in &trees {
            Self::flush_tree(tree)?;
            let root = tree.root_addr().unwrap_or(crate::block::BlockAddr::INVALID);
            block_mgr.checkpoint_begin()?;
            block_mgr.checkpoint_write(name, root, 0, 0)?;
            block_mgr.checkpoint_resolve()?;
            metadata::write_root_cookie(&self.root_cookie_path(table_name), root)?;
        }

        Self::flush_tree(&self.metadata_tree)?;
        let meta_root = self.metadata_tree.root_addr().unwrap_or(crate::block::BlockAddr::INVALID);
        self.metadata_block_mgr.checkpoint_begin()?;
        self.metadata_block_mgr.checkpoint_write(name, meta_root, 0, 0)?;
        self.metadata_block_mgr.checkpoint_resolve()?;
        metadata::write_root_cookie(&self.home.join(metadata::TURTLE_FILE_NAME), meta_root)?;

        self.event_handler.read().on_progress("checkpoint", trees.len() as u64 + 1);
        Ok(())
    }

    pub(super) fn verify_table(&self, name: &str) -> Result<()> {
        self.block_managers
            .read()
            .get(name)
            .ok_or(Error::NotFound)?
            .verify()
    }

    pub(super) fn salvage_table(&self, name: &str) -> Result<()> {
        let block_mgr = self.block_managers.read().get(name).cloned().ok_or(Error::NotFound)?;
        let found = block_mgr.salvage_scan()?;
        self.event_handler.read().on_progress("salvage", found.len() as u64);
        Ok(())
    }
}

const _: () = {
    // Exhaustiveness check so an added Scheme variant doesn't silently
    // fall through `tree_for`'s `other` arm unnoticed during review.
    fn _assert(s: Scheme) {
        match s {
            Scheme::File | Scheme::Table | Scheme::Statistics | Scheme::Log | Scheme::Metadata => {}
        }
    }
};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_requires_create_flag_for_missing_home() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nested");
        assert!(Connection::open(&missing, "").is_err());
        assert!(Connection::open(&missing, "create=true").is_ok());
    }

    #[test]
    fn reopen_recovers_tables() {
        let dir = tempdir().unwrap();
        let conn = Connection::open(dir.path(), "create=true").unwrap();
        conn.create_table("accounts", PageKind::RowLeaf, 32 * 1024, 4096).unwrap();
        conn.checkpoint_all("checkpoint").unwrap();
        drop(conn);

        let reopened = Connection::open(dir.path(), "").unwrap();
        assert!(reopened.trees.read().contains_key("accounts"));
    }
}
