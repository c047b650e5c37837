use crate::apply::MergeEngine;
use crate::config::DriveOptions;
use crate::content::{self, BlockRange, ClearOptions, DownloadOptions};
use crate::context::DriveContext;
use crate::error::{DriveError, Result};
use crate::events::{DriveEvent, EventObserver};
use crate::item::{EntryDiff, EntryItem, HistoryItem};
use crate::keys::folder_range;
use crate::messages::{Entry, Operation};
use crate::namespace::Namespace;
use crate::path::std_folder;
use crate::read::{self, EntryRange, HistoryOptions, ReadOptions, Target};
use crate::session::Session;
use crate::write::{self, DelOptions, FileWriter, PutOptions, Resolve, WriteOptions};
use bytes::Bytes;
use diagnostics::*;
use futures::TryStreamExt;
use futures::stream::BoxStream;
use polyblobs::{Blobs, Cleared, ContentKey, ReadRange, content_key};
use polylog::{Base, Head, WriterId};
use polyview::{ScanOptions, Snapshot, Watcher};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, broadcast};
use tokio_util::io::StreamReader;

const DISCOVERY_NAMESPACE: &str = "polydrive";
const DISCOVERY_INDEX: u8 = 1;

/// A replicated file system shared by a set of writers
///
/// Cloning a drive is cheap and yields another handle on the same session.
/// [`Drive::checkout`] and [`Drive::batch`] derive sessions that share the
/// same log, content stores and core pool.
#[derive(Clone)]
pub struct Drive {
    pub(crate) ctx: Arc<DriveContext>,
    pub(crate) session: Session,
}

impl Drive {
    /// Start a new drive. The local writer is its first writer.
    pub async fn create(options: DriveOptions) -> Result<Self> {
        Self::open(None, options).await
    }

    /// Open a replica of an existing drive. The local writer can write once
    /// a writer of the drive added it.
    pub async fn join(key: WriterId, options: DriveOptions) -> Result<Self> {
        Self::open(Some(key), options).await
    }

    async fn open(bootstrap: Option<WriterId>, options: DriveOptions) -> Result<Self> {
        diagnostics::init_diagnostics();
        let DriveOptions {
            config,
            namespace,
            local,
        } = options;
        let local = local.unwrap_or_else(WriterId::random);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let engine = MergeEngine::new(namespace.clone(), Arc::new(EventObserver::new(events.clone())));
        let base = Base::new(bootstrap, local, Arc::new(engine));
        let ctx = Arc::new(DriveContext::new(config, namespace, base, events));

        // the local content core is pooled for the lifetime of the drive
        _ = ctx.core(&local).await?;
        info!(
            "opened drive {key} as {local}",
            key: ctx.base.key().to_hex(),
            local: local.to_hex()
        );
        Ok(Self {
            ctx,
            session: Session::Live,
        })
    }

    fn derive(&self, session: Session) -> Self {
        Self {
            ctx: Arc::clone(&self.ctx),
            session,
        }
    }

    async fn snapshot(&self) -> Snapshot {
        self.session.snapshot(&self.ctx).await
    }

    /// Key shared by every replica of the drive
    pub fn key(&self) -> WriterId {
        self.ctx.base.key()
    }

    pub fn id(&self) -> String {
        self.key().to_hex()
    }

    /// Hash of the key under which peers can find each other without
    /// revealing the key itself
    pub fn discovery_key(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(polyblobs::namespace(DISCOVERY_NAMESPACE, DISCOVERY_INDEX));
        hasher.update(self.key().as_bytes());
        hasher.finalize().into()
    }

    /// Key of the local writer's content core
    pub fn content_key(&self) -> ContentKey {
        content_key(&self.local())
    }

    pub fn local(&self) -> WriterId {
        self.ctx.local()
    }

    /// Namespace token of the local writer
    pub fn namespace(&self) -> Bytes {
        self.ctx.namespace.of(&self.local())
    }

    pub fn namespaces(&self) -> &Namespace {
        &self.ctx.namespace
    }

    pub async fn version(&self) -> u64 {
        polyview::View::version(&self.snapshot().await)
    }

    pub async fn writable(&self) -> bool {
        self.session.writable(&self.ctx).await
    }

    pub async fn heads(&self) -> Vec<Head> {
        self.ctx.base.heads().await
    }

    pub fn is_closed(&self) -> bool {
        self.ctx.is_closed()
    }

    pub fn events(&self) -> broadcast::Receiver<DriveEvent> {
        self.ctx.events.subscribe()
    }

    pub async fn add_writer(&self, key: WriterId, indexer: bool) -> Result<()> {
        self.append_writer(key, false, indexer).await
    }

    pub async fn remove_writer(&self, key: WriterId) -> Result<()> {
        self.append_writer(key, true, false).await
    }

    async fn append_writer(&self, key: WriterId, removed: bool, indexer: bool) -> Result<()> {
        if !self.writable().await {
            return Err(DriveError::SessionNotWritable);
        }
        let op = Operation::Writer {
            key,
            removed,
            indexer,
        };
        self.session.dispatch(&self.ctx, vec![op]).await
    }

    /// Apply log nodes received from peers
    pub async fn update(&self) -> Result<()> {
        self.ctx.base.update().await?;
        self.ctx.publish_update().await;
        Ok(())
    }

    /// Copy the log nodes `other` has and this replica lacks. Returns true
    /// if anything arrived. Call [`Drive::update`] to apply them.
    pub async fn sync_from(&self, other: &Drive) -> Result<bool> {
        Ok(self.ctx.base.sync_from(&other.ctx.base).await?)
    }

    /// Blob store of `source`, the local writer when `None`
    pub async fn get_blobs(&self, source: Option<WriterId>) -> Result<Blobs> {
        self.ctx.blobs(source.as_ref()).await
    }

    /// Blocks of `source`'s content referenced by files at `version`
    pub async fn get_blobs_length(&self, version: u64, source: Option<WriterId>) -> Result<u64> {
        let source = source.unwrap_or_else(|| self.local());
        content::blobs_length(&self.ctx, version, &source).await
    }

    pub fn compare(a: &EntryItem, b: &EntryItem) -> Ordering {
        EntryItem::compare(a, b)
    }

    /// Read-only session pinned at `version`
    pub async fn checkout(&self, version: u64) -> Result<Drive> {
        let snapshot = self.ctx.base.view().checkout(version).await?;
        Ok(self.derive(Session::Checkout(snapshot)))
    }

    /// Session whose writes are queued until [`Drive::flush`]
    pub fn batch(&self) -> Drive {
        self.derive(Session::Batch(Arc::new(Mutex::new(Vec::new()))))
    }

    /// Append a batch's queued writes as one atomic unit
    pub async fn flush(&self) -> Result<()> {
        self.session.flush(&self.ctx).await
    }

    pub async fn entry(&self, target: impl Into<Target>, options: ReadOptions) -> Result<Option<EntryItem>> {
        read::entry(&self.ctx, &self.snapshot().await, target.into(), options.follow).await
    }

    pub async fn get(&self, target: impl Into<Target>, options: ReadOptions) -> Result<Option<Bytes>> {
        read::get(&self.ctx, &self.snapshot().await, target.into(), &options).await
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        read::exists(&self.ctx, &self.snapshot().await, path).await
    }

    pub async fn entries(&self, range: EntryRange) -> BoxStream<'static, Result<EntryItem>> {
        read::entries(self.snapshot().await, range)
    }

    pub async fn list(&self, folder: &str, recursive: bool) -> Result<BoxStream<'static, Result<EntryItem>>> {
        read::list(self.snapshot().await, folder, recursive)
    }

    /// Names of the direct children of `folder`
    pub async fn readdir(&self, folder: &str) -> Result<BoxStream<'static, Result<String>>> {
        read::readdir(self.snapshot().await, folder)
    }

    pub async fn conflicts(&self, path: &str, options: ScanOptions) -> Result<BoxStream<'static, Result<Entry>>> {
        read::conflicts(self.snapshot().await, path, options)
    }

    pub async fn history(&self, path: &str, options: HistoryOptions) -> Result<BoxStream<'static, Result<HistoryItem>>> {
        read::history(self.snapshot().await, path, options)
    }

    /// Changes below `folder` between `version` and this session
    pub async fn diff(&self, version: u64, folder: &str) -> Result<BoxStream<'static, Result<EntryDiff>>> {
        let older = self.ctx.base.view().checkout(version).await?;
        read::diff(self.snapshot().await, older, folder)
    }

    pub async fn create_read_stream(
        &self,
        target: impl Into<Target>,
        range: ReadRange,
        options: ReadOptions,
    ) -> Result<BoxStream<'static, Result<Bytes>>> {
        read::read_stream(&self.ctx, &self.snapshot().await, target.into(), range, &options).await
    }

    /// [`Drive::create_read_stream`] as an `AsyncRead`
    pub async fn create_reader(
        &self,
        target: impl Into<Target>,
        range: ReadRange,
        options: ReadOptions,
    ) -> Result<impl AsyncRead + Send + Unpin + 'static> {
        let stream = self.create_read_stream(target, range, options).await?;
        Ok(StreamReader::new(stream.map_err(std::io::Error::other)))
    }

    pub async fn put(&self, path: &str, data: impl AsRef<[u8]>, options: PutOptions) -> Result<()> {
        write::put(&self.ctx, &self.session, path, data.as_ref(), options).await
    }

    pub async fn del(&self, path: &str, options: DelOptions) -> Result<Option<Cleared>> {
        write::del(&self.ctx, &self.session, path, options).await
    }

    pub async fn resolve(&self, path: &str, with: Resolve, options: PutOptions) -> Result<()> {
        write::resolve(&self.ctx, &self.session, path, with, options).await
    }

    pub async fn symlink(&self, path: &str, dest: &str, options: WriteOptions) -> Result<()> {
        write::symlink(&self.ctx, &self.session, path, dest, options).await
    }

    pub async fn create_write_stream(&self, path: &str, options: WriteOptions) -> Result<FileWriter> {
        write::write_stream(&self.ctx, &self.session, path, options).await
    }

    /// Changes below `folder` as they are applied. Only the live session
    /// can be watched.
    pub async fn watch(&self, folder: &str) -> Result<DriveWatcher> {
        if !matches!(self.session, Session::Live) {
            return Err(DriveError::InvalidSession("only the live session can be watched".to_string()));
        }
        let folder = std_folder(folder)?;
        let inner = self.ctx.base.view().watch(folder_range(&folder)).await;
        Ok(DriveWatcher {
            drive: self.clone(),
            inner,
        })
    }

    pub async fn download(&self, path: &str, options: DownloadOptions) -> Result<()> {
        content::download(&self.ctx, &self.snapshot().await, path, options).await
    }

    pub async fn download_diff(&self, version: u64, folder: &str, options: DownloadOptions) -> Result<()> {
        content::download_diff(&self.ctx, &self.snapshot().await, version, folder, options).await
    }

    pub async fn download_range(&self, ranges: &[BlockRange], options: DownloadOptions) {
        content::download_range(&self.ctx, ranges, options).await
    }

    pub async fn clear(&self, target: impl Into<Target>, options: ClearOptions) -> Result<Option<Cleared>> {
        content::clear(&self.ctx, &self.snapshot().await, target.into(), options).await
    }

    pub async fn clear_all(&self, options: ClearOptions) -> Result<Option<Cleared>> {
        content::clear_all(&self.ctx, &self.snapshot().await, options).await
    }

    /// Roll local state back to `version`. Blocks of the local content core
    /// beyond `blobs`, by default what `version` references, are dropped.
    pub async fn truncate(&self, version: u64, blobs: Option<u64>) -> Result<()> {
        content::truncate(&self.ctx, version, blobs).await
    }

    /// Close the drive and delete everything stored locally
    pub async fn purge(&self) -> Result<()> {
        if !matches!(self.session, Session::Live) {
            return Err(DriveError::InvalidSession("only the live session can purge".to_string()));
        }
        self.ctx.close().await;
        self.ctx.base.purge().await?;
        self.ctx.store.purge().await;
        info!("purged drive {key}", key: self.id());
        Ok(())
    }

    /// Close every session of the drive and release pooled content cores
    pub async fn close(&self) {
        self.ctx.close().await;
    }
}

/// Yields `(current, previous)` checkouts whenever a watched folder changes
pub struct DriveWatcher {
    drive: Drive,
    inner: Watcher,
}

impl DriveWatcher {
    pub async fn next(&mut self) -> Option<(Drive, Drive)> {
        let (current, previous) = self.inner.next().await?;
        Some((
            self.drive.derive(Session::Checkout(current)),
            self.drive.derive(Session::Checkout(previous)),
        ))
    }
}
