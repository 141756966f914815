use time::Duration;

use super::node::RemoteNode;
use super::watermark::{WatermarkKey, WatermarkRecord};

/// Amount subtracted from a remote `modifiedAt` before it is compared with a
/// stored watermark.
///
/// Drive timestamps and stored watermarks have historically disagreed by this
/// much. It likely hides a timezone normalisation problem in whatever wrote
/// the stored values rather than being a deliberate tolerance window.
pub const DEFAULT_MODIFIED_SKEW: Duration = Duration::hours(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    CreateNew,
    CreateUpdate(WatermarkRecord),
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    skew: Duration,
}

impl ChangeDetector {
    pub fn new(skew: Duration) -> Self {
        Self { skew }
    }

    pub fn skew(&self) -> Duration {
        self.skew
    }

    /// Decides what to do with a leaf listed under `folder_id`.
    ///
    /// `prior` is `None` for full imports, which transfer every leaf.
    pub fn decide(
        &self,
        node: &RemoteNode,
        folder_id: &str,
        prior: Option<&[WatermarkRecord]>,
    ) -> Decision {
        let Some(prior) = prior else {
            return Decision::CreateNew;
        };
        let key = WatermarkKey::new(folder_id, &node.name);
        let Some(record) = prior.iter().find(|record| key.matches(record)) else {
            return Decision::CreateNew;
        };

        let Some(stored) = record.last_execution_time else {
            return Decision::CreateUpdate(record.clone());
        };
        let Some(remote) = node.modified_at else {
            return Decision::Skip;
        };
        if stored < remote - self.skew {
            Decision::CreateUpdate(record.clone())
        } else {
            Decision::Skip
        }
    }
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self::new(DEFAULT_MODIFIED_SKEW)
    }
}
