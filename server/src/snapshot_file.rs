use std::io;
use std::path::{Path, PathBuf};

use system::{Board, BoardSnapshot, MemoryTrackingStore, RoomId, TrackingSnapshot};
use tokio::fs;

const TRACKING_FILE: &str = "tracking.snapshot";
const ROOMS_DIR: &str = "rooms";
const BOARD_EXTENSION: &str = "board";

/// Layout: `<root>/tracking.snapshot` and `<root>/rooms/<room_id>.board`.
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    root: PathBuf,
}

pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn invalid_data<E: ToString>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

impl SnapshotDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn board_path(&self, room_id: &str) -> PathBuf {
        self.root
            .join(ROOMS_DIR)
            .join(format!("{}.{}", room_id, BOARD_EXTENSION))
    }

    pub async fn write_tracking(&self, snapshot: &TrackingSnapshot) -> io::Result<()> {
        write_replacing(&self.root.join(TRACKING_FILE), snapshot.content()).await
    }

    pub async fn write_board(&self, room_id: &RoomId, snapshot: &BoardSnapshot) -> io::Result<()> {
        if !is_valid_room_id(room_id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("room id cannot be used as a file name: {:?}", room_id),
            ));
        }
        write_replacing(&self.board_path(room_id), snapshot.content()).await
    }

    pub async fn read_tracking(&self) -> io::Result<Option<MemoryTrackingStore>> {
        match fs::read(self.root.join(TRACKING_FILE)).await {
            Ok(content) => MemoryTrackingStore::from_snapshot(&TrackingSnapshot::from_vec(content))
                .map(Some)
                .map_err(invalid_data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn read_boards(&self) -> io::Result<Vec<Board>> {
        let mut result = Vec::new();
        let mut entries = match fs::read_dir(self.root.join(ROOMS_DIR)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(result),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BOARD_EXTENSION) {
                continue;
            }
            let content = fs::read(&path).await?;
            match Board::from_snapshot(&BoardSnapshot::from_vec(content)) {
                Ok(board) => result.push(board),
                Err(e) => log::warn!("Skip unreadable board {}: {}", path.display(), e),
            }
        }
        Ok(result)
    }

    pub async fn load(&self) -> io::Result<(MemoryTrackingStore, Vec<Board>)> {
        let store = self.read_tracking().await?.unwrap_or_default();
        let boards = self.read_boards().await?;
        log::info!(
            "Loaded {} learners and {} boards from {}",
            store.learner_ids().count(),
            boards.len(),
            self.root.display()
        );
        Ok((store, boards))
    }
}

/// Writes next to `path` and renames over it, so readers never see half a file.
async fn write_replacing(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content).await?;
    fs::rename(&tmp, path).await
}
