use crate::config::SignConfig;
use crate::core::{Owner, RegionKey, Result, Rgb, SignError, SignId, SignRecord, SpatialKey};
use crate::display::{CollectionExecutor, Reconciler, RegionOracle, RenderProvider, TaskExecutor};
use crate::scheduler::ReconcileScheduler;
use crate::session::{EditInput, EditSession, EditSessions};
use crate::storage::RecordStore;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of one message from an editing user.
#[derive(Debug, Clone, PartialEq)]
pub enum EditProgress {
    NotEditing,
    /// The line was stored; `line_number` (1-based) is asked for next.
    NextLine { line_number: usize, remaining: usize },
    Saved { key: SpatialKey, record: SignRecord },
    /// `removed` is true when the sign placed for this session was dropped.
    Cancelled { key: SpatialKey, removed: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextStatus {
    pub signs: usize,
    pub signs_with_text: usize,
    pub collections: usize,
    pub regions: usize,
    pub displayed: usize,
    pub pending_resync: usize,
    pub editing: usize,
    pub store_dirty: bool,
    pub scheduler_running: bool,
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Signs:            {}", self.signs)?;
        writeln!(f, "  with text:      {}", self.signs_with_text)?;
        writeln!(f, "Collections:      {}", self.collections)?;
        writeln!(f, "Regions:          {}", self.regions)?;
        writeln!(f, "Displayed:        {}", self.displayed)?;
        writeln!(f, "Pending resync:   {}", self.pending_resync)?;
        writeln!(f, "Editing sessions: {}", self.editing)?;
        writeln!(f, "Unsaved changes:  {}", self.store_dirty)?;
        write!(f, "Scheduler:        {}", if self.scheduler_running { "running" } else { "stopped" })
    }
}

/// Everything the sign system needs, owned in one place and handed to
/// whoever drives it.
pub struct SignContext {
    data_dir: PathBuf,
    config: SignConfig,
    store: Arc<RecordStore>,
    reconciler: Reconciler,
    scheduler: ReconcileScheduler,
    sessions: EditSessions,
}

impl SignContext {
    /// Opens the data directory with display work running on the current
    /// tokio runtime.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        provider: Arc<dyn RenderProvider>,
        oracle: Arc<dyn RegionOracle>,
    ) -> Result<Self> {
        let executor = Arc::new(TaskExecutor::current()?);
        Self::open_with(data_dir, provider, oracle, executor)
    }

    /// Loads config and store, then schedules a display resync of every sign
    /// with text. Projection state from before the open is never trusted.
    pub fn open_with<P: AsRef<Path>>(
        data_dir: P,
        provider: Arc<dyn RenderProvider>,
        oracle: Arc<dyn RegionOracle>,
        executor: Arc<dyn CollectionExecutor>,
    ) -> Result<Self> {
        let config = SignConfig::load(data_dir.as_ref())?;
        Self::with_config(data_dir, config, provider, oracle, executor)
    }

    /// Opens with an already loaded configuration.
    pub fn with_config<P: AsRef<Path>>(
        data_dir: P,
        config: SignConfig,
        provider: Arc<dyn RenderProvider>,
        oracle: Arc<dyn RegionOracle>,
        executor: Arc<dyn CollectionExecutor>,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        config.validate()?;
        let store = Arc::new(RecordStore::open(config.signs_path(&data_dir))?);

        let reconciler = Reconciler::new(provider, oracle, executor, config.display);
        reconciler.invalidate_all();
        reconciler.mark_all_dirty(store.keys_with_text());

        let scheduler = ReconcileScheduler::new(
            store.clone(),
            reconciler.clone(),
            config.schedule.intervals(),
        );

        info!(
            data_dir = %data_dir.display(),
            signs = store.len(),
            pending = reconciler.dirty_count(),
            "Sign context opened"
        );

        Ok(Self {
            data_dir,
            config,
            store,
            reconciler,
            scheduler,
            sessions: EditSessions::new(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> &SignConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn scheduler(&self) -> &ReconcileScheduler {
        &self.scheduler
    }

    pub fn sessions(&self) -> &EditSessions {
        &self.sessions
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    pub fn start(&self) -> Result<()> {
        self.scheduler.start()
    }

    /// Stops the scheduler, lets queued display work finish, then writes the
    /// store regardless of the dirty flag.
    pub async fn shutdown(&self) -> Result<()> {
        self.scheduler.stop().await?;
        self.reconciler.quiesce().await;
        self.reconciler.invalidate_all();
        self.store.force_flush()?;
        info!(signs = self.store.len(), "Sign context shut down");
        Ok(())
    }

    // ========================================================================
    // Signs
    // ========================================================================

    /// Puts an empty sign at `key` with the configured defaults. An existing
    /// sign there is returned unchanged.
    pub fn place_sign(&self, key: &SpatialKey, owner: Option<Owner>) -> SignRecord {
        if let Some(existing) = self.store.get(key) {
            return existing;
        }
        let created = self.store.create_at(key, owner);
        let color = self.config.default_rgb();
        let glowing = self.config.default_glowing;
        self.store
            .update(key, |record| {
                record.set_color(color);
                record.set_glowing(glowing);
            })
            .unwrap_or(created)
    }

    pub fn create_sign<I, S>(&self, key: &SpatialKey, owner: Option<Owner>, lines: I) -> SignRecord
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let placed = self.place_sign(key, owner);
        let record = self.store.set_lines(key, lines).unwrap_or(placed);
        self.refresh(key, &record);
        record
    }

    pub fn set_text<I, S>(&self, key: &SpatialKey, lines: I) -> Result<SignRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let record = self
            .store
            .set_lines(key, lines)
            .ok_or_else(|| SignError::NotFound(key.to_string()))?;
        self.refresh(key, &record);
        Ok(record)
    }

    pub fn set_line(&self, key: &SpatialKey, index: usize, text: &str) -> Result<SignRecord> {
        let record = self.store.set_line(key, index, text)?;
        self.refresh(key, &record);
        Ok(record)
    }

    pub fn set_color(&self, key: &SpatialKey, color: Rgb) -> Result<SignRecord> {
        self.store
            .set_color(key, color)
            .ok_or_else(|| SignError::NotFound(key.to_string()))
    }

    pub fn set_glowing(&self, key: &SpatialKey, glowing: bool) -> Result<SignRecord> {
        self.store
            .set_glowing(key, glowing)
            .ok_or_else(|| SignError::NotFound(key.to_string()))
    }

    /// Removes the sign, its display and any session editing it.
    pub fn remove_sign(&self, key: &SpatialKey) -> Option<SignRecord> {
        let removed = self.store.remove_at(key);
        self.reconciler.clear(key);
        for user in self.sessions.editors_of(key) {
            self.sessions.end(&user);
            debug!(user = %user, key = %key, "Ended edit session of removed sign");
        }
        removed
    }

    pub fn remove_sign_by_id(&self, id: &SignId) -> Option<SpatialKey> {
        let (key, _) = self.store.find_by_id(id)?;
        self.remove_sign(&key).map(|_| key)
    }

    /// Removes the sign closest to `point` within `radius` blocks.
    pub fn remove_nearest(
        &self,
        collection: &str,
        point: (f64, f64, f64),
        radius: f64,
    ) -> Option<(SpatialKey, SignRecord)> {
        let key = self.store.nearest_within(collection, point, radius)?;
        let record = self.remove_sign(&key)?;
        Some((key, record))
    }

    fn refresh(&self, key: &SpatialKey, record: &SignRecord) {
        if record.has_text() {
            self.reconciler.mark_dirty(key.clone());
            self.reconciler.materialize(key, record.non_empty_lines());
        } else {
            self.reconciler.clear(key);
        }
    }

    // ========================================================================
    // Editing
    // ========================================================================

    /// Starts an edit session on `key`, placing a sign there if needed. A
    /// session the user already had is abandoned.
    pub fn begin_edit(
        &self,
        user: &str,
        key: &SpatialKey,
        owner: Option<Owner>,
    ) -> Result<EditSession> {
        if !self.config.chat_editing {
            return Err(SignError::EditingDisabled);
        }

        let session = match self.store.get(key) {
            Some(existing) => EditSession::new(key.clone(), existing, false),
            None => EditSession::new(key.clone(), self.place_sign(key, owner), true),
        };

        if let Some(previous) = self.sessions.start(user, session.clone()) {
            self.abandon(user, previous);
        }
        debug!(user = %user, key = %key, created = session.created(), "Started editing sign");
        Ok(session)
    }

    /// Feeds one typed message into `user`'s session.
    pub fn submit_line(&self, user: &str, message: &str) -> EditProgress {
        match EditInput::parse(message) {
            EditInput::Done => self.finish_edit(user),
            EditInput::Cancel => self.cancel_edit(user),
            EditInput::Line(text) => {
                if !self.sessions.is_editing(user) {
                    return EditProgress::NotEditing;
                }
                if self.sessions.add_line(user, &text) {
                    EditProgress::NextLine {
                        line_number: self.sessions.current_line_number(user),
                        remaining: self.sessions.lines_remaining(user),
                    }
                } else {
                    self.finish_edit(user)
                }
            }
        }
    }

    /// Saves the draft text and shows it.
    pub fn finish_edit(&self, user: &str) -> EditProgress {
        let Some(session) = self.sessions.end(user) else {
            return EditProgress::NotEditing;
        };
        let key = session.key().clone();
        let draft = session.into_draft();

        let record = match self.store.set_lines(&key, draft.lines()) {
            Some(record) => record,
            None => {
                // The sign vanished mid-edit; put the draft back.
                self.store.upsert(&key, draft.clone());
                self.store.get(&key).unwrap_or(draft)
            }
        };
        self.refresh(&key, &record);
        info!(user = %user, key = %key, "Sign saved");
        EditProgress::Saved { key, record }
    }

    pub fn cancel_edit(&self, user: &str) -> EditProgress {
        match self.sessions.end(user) {
            Some(session) => {
                let key = session.key().clone();
                let removed = self.abandon(user, session);
                EditProgress::Cancelled { key, removed }
            }
            None => EditProgress::NotEditing,
        }
    }

    /// Drops whatever `user` was editing. Returns whether a session existed.
    pub fn on_disconnect(&self, user: &str) -> bool {
        match self.sessions.end(user) {
            Some(session) => {
                self.abandon(user, session);
                debug!(user = %user, "Cleaned up edit session of disconnected user");
                true
            }
            None => false,
        }
    }

    /// A sign placed by an abandoned session is removed while it is still
    /// blank. Returns whether it was removed.
    fn abandon(&self, user: &str, session: EditSession) -> bool {
        if !session.created() {
            return false;
        }
        let key = session.key();
        let blank = self.store.get(key).is_some_and(|record| !record.has_text());
        if blank && self.store.remove_at(key).is_some() {
            self.reconciler.clear(key);
            debug!(user = %user, key = %key, "Removed blank sign of abandoned session");
            return true;
        }
        false
    }

    // ========================================================================
    // External signals
    // ========================================================================

    pub fn on_region_active(&self, region: &RegionKey) -> usize {
        self.scheduler.on_region_active(region)
    }

    pub fn on_collection_started(&self, name: &str) -> usize {
        self.scheduler.on_collection_started(name)
    }

    /// The render surface was rebuilt: every handle is gone.
    pub fn on_surface_reset(&self) -> usize {
        self.reconciler.invalidate_all();
        let keys = self.store.keys_with_text();
        let marked = keys.len();
        self.reconciler.mark_all_dirty(keys);
        self.reconciler.wake();
        info!(signs = marked, "Render surface reset, resyncing every sign");
        marked
    }

    pub fn status(&self) -> ContextStatus {
        ContextStatus {
            signs: self.store.len(),
            signs_with_text: self.store.keys_with_text().len(),
            collections: self.store.collections().len(),
            regions: self.store.region_count(),
            displayed: self.reconciler.projection_count(),
            pending_resync: self.reconciler.dirty_count(),
            editing: self.sessions.len(),
            store_dirty: self.store.is_dirty(),
            scheduler_running: self.scheduler.is_running(),
        }
    }
}
