//! Helpers for tests that need several replicas of one drive

use crate::config::DriveOptions;
use crate::drive::Drive;
use crate::error::Result;
use crate::replicate::{Replication, replicate, sync};
use polyview::{Item, KeyRange, ScanOptions, View};

/// `writers[0]` created the drive and added every other writer.
/// `readers` joined without being added.
pub struct TestEnv {
    pub writers: Vec<Drive>,
    pub readers: Vec<Drive>,
    pub links: Vec<Replication>,
}

impl TestEnv {
    /// Build the drives and replicate every pair. `options.local` is
    /// ignored, each drive gets its own writer.
    pub async fn new(writers: usize, readers: usize, options: DriveOptions) -> Result<Self> {
        let options = DriveOptions {
            local: None,
            ..options
        };
        let owner = Drive::create(options.clone()).await?;
        let mut all_writers = vec![owner.clone()];
        for _ in 1..writers.max(1) {
            let writer = Drive::join(owner.key(), options.clone()).await?;
            owner.add_writer(writer.local(), false).await?;
            all_writers.push(writer);
        }
        let mut all_readers = Vec::new();
        for _ in 0..readers {
            all_readers.push(Drive::join(owner.key(), options.clone()).await?);
        }

        let mut env = Self {
            writers: all_writers,
            readers: all_readers,
            links: Vec::new(),
        };
        let drives = env.drives();
        for (i, a) in drives.iter().enumerate() {
            for b in &drives[i + 1..] {
                env.links.push(replicate(a, b).await?);
            }
        }
        env.sync().await?;
        Ok(env)
    }

    pub fn drives(&self) -> Vec<Drive> {
        self.writers.iter().chain(&self.readers).cloned().collect()
    }

    pub fn writer(&self, i: usize) -> &Drive {
        &self.writers[i]
    }

    pub fn reader(&self, i: usize) -> &Drive {
        &self.readers[i]
    }

    /// Exchange and apply log nodes between every drive
    pub async fn sync(&self) -> Result<()> {
        sync(&self.drives()).await
    }
}

/// Close every content core a drive has pooled, as if they had all expired
pub async fn release_cores(drive: &Drive) {
    drive.ctx.pool.clear().await;
}

/// Every item of a drive's live view: files, history and conflicts alike
pub async fn view_items(drive: &Drive) -> Result<Vec<Item>> {
    let snapshot = drive.ctx.base.view().snapshot().await;
    Ok(snapshot.scan(&KeyRange::all(), ScanOptions::default()).await?)
}
