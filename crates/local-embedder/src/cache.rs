use std::io::{BufReader, BufWriter, Cursor};
use std::path::{Path, PathBuf};

use murmur3::murmur3_x86_128;
use tracing::trace;

use crate::Result;

/// On-disk cache of pooled vectors, one bincode file per (model, text) pair.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    /// Cache rooted at `<root>/embeddings/<model>`.
    pub fn open<P: AsRef<Path>>(root: P, model_id: &str) -> Result<Self> {
        let dir = root
            .as_ref()
            .join("embeddings")
            .join(model_id.replace(['/', '\\'], "_"));
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, text: &str) -> Result<PathBuf> {
        let hash = murmur3_x86_128(&mut Cursor::new(text.as_bytes()), 0)?;
        Ok(self.dir.join(format!("{hash:032x}.bin")))
    }

    pub fn get(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let path = self.path_for(text)?;
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = BufReader::new(std::fs::File::open(&path)?);
        match bincode::decode_from_std_read::<Vec<f32>, _, _>(
            &mut reader,
            bincode::config::standard(),
        ) {
            Ok(vec) if !vec.is_empty() => Ok(Some(vec)),
            // Truncated or foreign files are treated as misses and rewritten.
            _ => {
                trace!("Discarding unreadable cache entry {:?}", path);
                Ok(None)
            }
        }
    }

    pub fn put(&self, text: &str, embedding: &[f32]) -> Result<()> {
        let path = self.path_for(text)?;
        let tmp = path.with_extension("tmp");
        {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            let mut writer = BufWriter::new(file);
            bincode::encode_into_std_write(embedding, &mut writer, bincode::config::standard())?;
        }
        std::fs::rename(tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "topic-atlas-cache-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn stores_and_reads_back_vectors() {
        let root = scratch("roundtrip");
        let cache = EmbeddingCache::open(&root, "org/model").unwrap();
        assert!(cache.get("hello").unwrap().is_none());
        cache.put("hello", &[0.5, -1.25, 3.0]).unwrap();
        assert_eq!(cache.get("hello").unwrap(), Some(vec![0.5, -1.25, 3.0]));
        assert!(root.join("embeddings").join("org_model").is_dir());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn models_do_not_share_entries() {
        let root = scratch("isolation");
        let a = EmbeddingCache::open(&root, "a").unwrap();
        let b = EmbeddingCache::open(&root, "b").unwrap();
        a.put("same text", &[1.0]).unwrap();
        assert!(b.get("same text").unwrap().is_none());
        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let root = scratch("corrupt");
        let cache = EmbeddingCache::open(&root, "m").unwrap();
        let path = cache.path_for("x").unwrap();
        std::fs::write(&path, [0xff, 0xff, 0xff]).unwrap();
        assert!(cache.get("x").unwrap().is_none());
        let _ = std::fs::remove_dir_all(root);
    }
}
