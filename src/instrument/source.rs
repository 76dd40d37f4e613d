use super::class_image::ClassImage;
use super::error::IllegalClassFormat;
use fxhash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Supplies the unmodified bytes of a class by name
pub trait ClassBytesSource: Send + Sync {
    /// `None` when the source has no class of that name
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>>;

    /// Human-readable origin of the class, passed on to rewriters
    fn code_source(&self, _name: &str) -> Option<String> {
        None
    }
}

/// File path of a class below `root`: `a.b.C` maps to `root/a/b/C.class`
///
/// # Errors
/// Fails for names whose path would not stay below `root`: empty segments
/// and segments containing a path separator or drive prefix.
pub fn class_file_path(root: &Path, class_name: &str) -> Result<PathBuf, IllegalClassFormat> {
    let mut path = root.to_path_buf();
    for segment in class_name.split('.') {
        let escapes = segment.is_empty()
            || segment.contains(['/', '\\', ':'])
            || Path::new(segment).is_absolute();
        if escapes {
            return Err(IllegalClassFormat(format!(
                "class name {class_name:?} does not map to a path"
            )));
        }
        path.push(segment);
    }
    path.set_extension("class");
    Ok(path)
}

/// Classes held in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    classes: FxHashMap<String, Arc<[u8]>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.classes.insert(name.into(), bytes.into());
    }

    /// Encode `image` and register it under its own name
    pub fn insert_image(&mut self, image: &ClassImage) -> Result<(), IllegalClassFormat> {
        let bytes = image.encode()?;
        self.insert(image.name.clone(), bytes);
        Ok(())
    }

    pub fn with_image(mut self, image: &ClassImage) -> Result<Self, IllegalClassFormat> {
        self.insert_image(image)?;
        Ok(self)
    }
}

impl ClassBytesSource for MemorySource {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        self.classes.get(name).map(|bytes| bytes.to_vec())
    }

    fn code_source(&self, _name: &str) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Classes stored as `.class` files below a root directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        DirectorySource {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ClassBytesSource for DirectorySource {
    fn class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let path = match class_file_path(&self.root, name) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("refusing to read {name}: {e}");
                return None;
            }
        };
        match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to read {}: {e}", path.display());
                }
                None
            }
        }
    }

    fn code_source(&self, name: &str) -> Option<String> {
        class_file_path(&self.root, name)
            .ok()
            .map(|path| path.display().to_string())
    }
}
