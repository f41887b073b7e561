use std::path::{Path, PathBuf};
use std::sync::Arc;

use fnv::FnvHashSet;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecursiveMode, Watcher};
use regex::Regex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::floodgate::common::Result;
use crate::floodgate::mongo::filter::QuotaFilter;

/// Watches the data directory for the database's numbered data files
/// (`<dbname>.0`, `<dbname>.1`, ...) and drives the filter's blocked bit
/// from the file count. Growth past the quota blocks; a shrink back within
/// quota (a repair or compaction) unblocks.
pub(crate) struct FileCountMonitor {
    filter: Arc<QuotaFilter>,
    base_dir: PathBuf,
    pattern: Regex,
    known: FnvHashSet<String>,
    quota_files: usize,
}

impl FileCountMonitor {
    pub fn new(filter: Arc<QuotaFilter>) -> Self {
        let settings = filter.settings();
        let dbname = regex::escape(&filter.backend().dbname);
        // The expression is built from two fixed parts and an escaped
        // literal, it always compiles.
        let pattern = Regex::new(&format!(r"^{}\.[0-9]+$", dbname)).unwrap();
        FileCountMonitor {
            base_dir: PathBuf::from(&settings.base_dir),
            quota_files: settings.quota_files as usize,
            filter,
            pattern,
            known: FnvHashSet::default(),
        }
    }

    pub async fn run(mut self) {
        let halt = self.filter.halt().clone();

        if let Err(e) = self.seed() {
            error!(%e, dir = %self.base_dir.display(), "failed to enumerate data files");
            self.filter.block();
            return;
        }
        info!(files = self.known.len(), "data files on disk at startup");
        if self.known.len() > self.quota_files {
            error!(files = self.known.len(), quota = self.quota_files, "disk files exceed quota");
            self.filter.block();
        }

        // The watcher delivers on its own thread; bridge onto a channel the
        // task can await alongside the halt signal, so shutdown never waits
        // on a filesystem event.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut watcher = match notify::recommended_watcher(move |event| {
            let _ = tx.send(event);
        }) {
            Ok(watcher) => watcher,
            Err(e) => {
                error!(%e, "failed to create filesystem watcher");
                self.filter.block();
                return;
            },
        };
        if let Err(e) = watcher.watch(&self.base_dir, RecursiveMode::NonRecursive) {
            error!(%e, dir = %self.base_dir.display(), "failed to watch data directory");
            self.filter.block();
            return;
        }

        loop {
            tokio::select! {
                _ = halt.wait() => break,
                event = rx.recv() => match event {
                    None => break,
                    Some(Ok(event)) => self.observe(&event),
                    Some(Err(e)) => {
                        error!(%e, "failed to read filesystem event");
                        self.filter.block();
                    },
                },
            }
        }
        debug!("file count monitor exits");
    }

    fn seed(&mut self) -> Result<()> {
        let known = &mut self.known;
        let pattern = &self.pattern;
        visit_files(&self.base_dir, &mut |name| {
            if pattern.is_match(name) {
                known.insert(name.to_string());
            }
        })
    }

    fn observe(&mut self, event: &notify::Event) {
        let before = self.known.len();
        self.apply(event);
        let count = self.known.len();
        if count == before {
            return;
        }
        debug!(count, "current db disk file number");
        if count > self.quota_files && count > before {
            error!(files = count, quota = self.quota_files, "disk files exceed quota");
            self.filter.block();
        } else if count <= self.quota_files {
            self.filter.clear_block();
        }
    }

    fn apply(&mut self, event: &notify::Event) {
        let removal = match &event.kind {
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => true,
            EventKind::Create(_)
            | EventKind::Access(_)
            | EventKind::Modify(ModifyKind::Name(_)) => false,
            _ => return,
        };
        for path in &event.paths {
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !self.pattern.is_match(name) {
                continue;
            }
            if removal {
                self.known.remove(name);
            } else {
                self.known.insert(name.to_string());
            }
        }
    }
}

fn visit_files(dir: &Path, visit: &mut dyn FnMut(&str)) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            visit_files(&path, visit)?;
        } else if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            visit(name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::floodgate::common::Shutdown;
    use crate::floodgate::config::{FilterSettings, MongoBackend};

    fn monitor(base_dir: &Path, quota_files: u32) -> FileCountMonitor {
        let settings = FilterSettings {
            enabled: true,
            base_dir: base_dir.to_string_lossy().into_owned(),
            quota_data_size: 1024,
            quota_files,
            fs_reserved_blocks: 0.05,
        };
        let backend = MongoBackend {
            host: "localhost".to_string(),
            port: 27017,
            socket_path: String::new(),
            dbname: "db".to_string(),
            user: String::new(),
            pass: String::new(),
        };
        FileCountMonitor::new(QuotaFilter::new(settings, backend, Shutdown::new()))
    }

    #[test]
    fn seed_finds_numbered_data_files() {
        let dir = std::env::temp_dir().join(format!("floodgate_seed_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        for name in &["db.0", "db.1", "db.ns", "other.0", "db.2.bak"] {
            fs::write(dir.join(name), b"x").unwrap();
        }

        let mut m = monitor(&dir, 8);
        m.seed().unwrap();
        assert_eq!(m.known.len(), 2);
        assert!(m.known.contains("db.0"));
        assert!(m.known.contains("db.1"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn events_grow_and_shrink_the_set() {
        let dir = std::env::temp_dir();
        let mut m = monitor(&dir, 2);
        m.known.insert("db.0".to_string());
        m.known.insert("db.1".to_string());

        let create = notify::Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(dir.join("db.2"));
        m.observe(&create);
        assert_eq!(m.known.len(), 3);
        assert!(m.filter.is_blocked());

        let remove = notify::Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(dir.join("db.2"));
        m.observe(&remove);
        assert_eq!(m.known.len(), 2);
        assert!(!m.filter.is_blocked());
    }

    #[test]
    fn ignores_files_of_other_databases() {
        let dir = std::env::temp_dir();
        let mut m = monitor(&dir, 2);
        let create = notify::Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(dir.join("otherdb.0"))
            .add_path(dir.join("db.notanumber"));
        m.observe(&create);
        assert!(m.known.is_empty());
    }
}
