//! Process-wide registry of open volatile files.

use std::sync::{Arc, Mutex};

use crate::content::{Content, Kind};
use crate::error::{self, Error};

pub const MAX_FILES: usize = 64;
pub const MAX_PATHNAME: usize = 512;

struct Slot {
    name: String,
    content: Arc<Mutex<Content>>,
}

#[derive(Default)]
struct Slots {
    entries: Vec<Option<Slot>>,
}

impl Slots {
    fn find(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|slot| slot.as_ref().map(|s| s.name.as_str()) == Some(name))
    }
}

/// Owns every open [Content] for this process. One `Root` is created per registered VFS.
pub struct Root {
    slots: Mutex<Slots>,
}

impl Default for Root {
    fn default() -> Self {
        Self::new()
    }
}

impl Root {
    pub fn new() -> Self {
        Root {
            slots: Mutex::new(Slots::default()),
        }
    }

    fn classify(name: &str) -> Kind {
        if name.ends_with("-wal") {
            Kind::Wal
        } else if name.ends_with("-journal") || name.ends_with("-shm") {
            Kind::Other
        } else {
            Kind::Db
        }
    }

    /// Open (creating if necessary) the content named `name`. `create` mirrors SQLite's
    /// `SQLITE_OPEN_CREATE`; `exclusive` mirrors `SQLITE_OPEN_EXCLUSIVE`.
    ///
    /// Returns the opened content plus, for a WAL open, the paired database's content (needed
    /// so a WAL handle can adopt its page size).
    pub fn open(
        &self,
        name: &str,
        create: bool,
        exclusive: bool,
    ) -> Result<(Arc<Mutex<Content>>, Option<Arc<Mutex<Content>>>), Error> {
        let mut slots = self.slots.lock().unwrap();

        if let Some(idx) = slots.find(name) {
            if create && exclusive {
                return Err(error::AlreadyExistsSnafu {
                    name: name.to_string(),
                }
                .build());
            }
            let content = slots.entries[idx].as_ref().unwrap().content.clone();
            content.lock().unwrap().refcount += 1;
            let db = if content.lock().unwrap().kind == Kind::Wal {
                let db_name = name.trim_end_matches("-wal").to_string();
                slots.find(&db_name).map(|i| slots.entries[i].as_ref().unwrap().content.clone())
            } else {
                None
            };
            return Ok((content, db));
        }

        if !create {
            return Err(error::NotFoundSnafu {
                name: name.to_string(),
            }
            .build());
        }

        let free = slots.entries.iter().position(Option::is_none);
        let idx = match free {
            Some(idx) => idx,
            None if slots.entries.len() < MAX_FILES => {
                slots.entries.push(None);
                slots.entries.len() - 1
            }
            None => return Err(error::TooManyFilesSnafu.build()),
        };

        let kind = Self::classify(name);
        if kind == Kind::Wal {
            let db_name = name.trim_end_matches("-wal").to_string();
            let db_idx = slots.find(&db_name).ok_or_else(|| error::OrphanWalSnafu.build())?;
            let db_content = slots.entries[db_idx].as_ref().unwrap().content.clone();

            let mut content = Content::new(name.to_string(), Kind::Wal);
            content.refcount = 1;
            let content = Arc::new(Mutex::new(content));
            slots.entries[idx] = Some(Slot {
                name: name.to_string(),
                content: content.clone(),
            });
            db_content.lock().unwrap().wal = Some(idx);
            return Ok((content, Some(db_content)));
        }

        let mut content = Content::new(name.to_string(), kind);
        content.refcount = 1;
        let content = Arc::new(Mutex::new(content));
        slots.entries[idx] = Some(Slot {
            name: name.to_string(),
            content: content.clone(),
        });
        Ok((content, None))
    }

    pub fn delete(&self, name: &str) -> Result<(), Error> {
        let mut slots = self.slots.lock().unwrap();
        let idx = slots.find(name).ok_or_else(|| error::NotFoundSnafu {
            name: name.to_string(),
        }.build())?;
        let refs = slots.entries[idx].as_ref().unwrap().content.lock().unwrap().refcount;
        if refs > 0 {
            return Err(error::StillOpenSnafu {
                name: name.to_string(),
                refs,
            }
            .build());
        }
        slots.entries[idx] = None;
        Ok(())
    }

    pub fn access(&self, name: &str) -> bool {
        self.slots.lock().unwrap().find(name).is_some()
    }

    /// Release one reference to `name`'s content; deletes it when `delete_on_close` and the
    /// refcount reaches zero.
    pub fn close(&self, name: &str, delete_on_close: bool) {
        let mut slots = self.slots.lock().unwrap();
        let Some(idx) = slots.find(name) else {
            return;
        };
        let refs = {
            let content = &slots.entries[idx].as_ref().unwrap().content;
            let mut content = content.lock().unwrap();
            content.refcount = content.refcount.saturating_sub(1);
            content.refcount
        };
        if refs == 0 && delete_on_close {
            slots.entries[idx] = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_without_db_is_rejected() {
        let root = Root::new();
        let err = root.open("orphan.db-wal", true, false).unwrap_err();
        assert!(matches!(err, Error::OrphanWal));
    }

    #[test]
    fn wal_links_back_to_its_database() {
        let root = Root::new();
        root.open("test.db", true, false).unwrap();
        root.open("test.db-wal", true, false).unwrap();
        assert!(root.access("test.db-wal"));
    }

    #[test]
    fn exclusive_create_of_existing_file_fails() {
        let root = Root::new();
        root.open("test.db", true, false).unwrap();
        let err = root.open("test.db", true, true).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn open_without_create_of_missing_file_fails() {
        let root = Root::new();
        let err = root.open("test.db", false, false).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn enforces_max_files() {
        let root = Root::new();
        for i in 0..MAX_FILES {
            root.open(&format!("test-{i}.db"), true, false).unwrap();
        }
        let err = root.open("test-overflow.db", true, false).unwrap_err();
        assert!(matches!(err, Error::TooManyFiles));
    }

    #[test]
    fn delete_requires_zero_refcount() {
        let root = Root::new();
        root.open("test.db", true, false).unwrap();
        let err = root.delete("test.db").unwrap_err();
        assert!(matches!(err, Error::StillOpen { .. }));
        root.close("test.db", false);
        root.delete("test.db").unwrap();
        assert!(!root.access("test.db"));
    }
}
