use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{self, AsyncWriteExt};

use crate::state::SharedState;

/// Concatenates the finished holding files into `destination` in range
/// order, deleting each holding file once its bytes are consumed. Refuses to
/// run unless every chunk finished, and never leaves a partial destination
/// behind on failure.
pub async fn merge_chunks(state: &SharedState, destination: &Path) -> Result<()> {
    let sources: Vec<PathBuf> = {
        let job = state.lock().unwrap();
        if !job.all_finished() {
            bail!("refusing to merge, not all chunks finished");
        }
        job.chunks
            .iter()
            .map(|chunk| {
                chunk
                    .holding_path
                    .clone()
                    .context("finished chunk has no holding file")
            })
            .collect::<Result<_>>()?
    };

    if let Err(e) = append_all(&sources, destination).await {
        let _ = fs::remove_file(destination).await;
        return Err(e);
    }
    Ok(())
}

async fn append_all(sources: &[PathBuf], destination: &Path) -> Result<()> {
    let mut dest = File::create(destination)
        .await
        .with_context(|| format!("failed to create {}", destination.display()))?;

    for path in sources {
        let mut source = File::open(path)
            .await
            .with_context(|| format!("failed to open holding file {}", path.display()))?;
        io::copy(&mut source, &mut dest)
            .await
            .context("failed to append chunk to destination")?;
        let _ = fs::remove_file(path).await;
    }

    dest.flush().await.context("failed to flush destination")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobState;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn state_with_parts(dir: &TempDir, parts: &[&[u8]]) -> SharedState {
        let mut job = JobState::new(parts.len());
        for (i, part) in parts.iter().enumerate() {
            let path = dir.path().join(format!("part{i}"));
            std::fs::write(&path, part).unwrap();
            job.chunks[i].holding_path = Some(path);
            job.chunks[i].finished = true;
        }
        Arc::new(Mutex::new(job))
    }

    #[tokio::test]
    async fn merges_in_range_order_and_deletes_holding_files() {
        let dir = TempDir::new().unwrap();
        let state = state_with_parts(&dir, &[b"AAA", b"BBB", b"CC"]);
        let dest = dir.path().join("out.bin");

        merge_chunks(&state, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"AAABBBCC");
        for chunk in &state.lock().unwrap().chunks {
            assert!(!chunk.holding_path.as_ref().unwrap().exists());
        }
    }

    #[tokio::test]
    async fn refuses_to_merge_with_unfinished_chunk() {
        let dir = TempDir::new().unwrap();
        let state = state_with_parts(&dir, &[b"AAA", b"BBB"]);
        state.lock().unwrap().chunks[1].finished = false;
        let dest = dir.path().join("out.bin");

        assert!(merge_chunks(&state, &dest).await.is_err());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn missing_holding_file_leaves_no_destination() {
        let dir = TempDir::new().unwrap();
        let state = state_with_parts(&dir, &[b"AAA", b"BBB"]);
        let missing = dir.path().join("gone");
        state.lock().unwrap().chunks[1].holding_path = Some(missing);
        let dest = dir.path().join("out.bin");

        assert!(merge_chunks(&state, &dest).await.is_err());
        assert!(!dest.exists());
    }
}
