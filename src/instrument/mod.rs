//! Load-time instrumentation
//!
//! A [`TransformLoader`] sits in front of a parent [`ClassLoader`]. Requests
//! for classes matching its selector are served by fetching the raw bytes,
//! passing them through a [`Rewriter`] (normally a [`MonitorRewriter`],
//! which injects lock-event hooks) and defining the result in the loader's
//! own namespace. Everything else is delegated to the parent unchanged.
//!
//! A class is identified by its name together with its defining loader, so
//! the same name can exist once per loader. [`Class::run`] executes a loaded
//! class against a [`Heap`] of bound objects; only rewritten classes report
//! their lock transitions.

mod class_image;
mod config;
mod error;
mod exec;
mod loader;
mod rewriter;
mod source;

pub use class_image::{CLASS_MAGIC, ClassImage, Method, Op};
pub use config::{DEFAULT_PROTECTED_PREFIXES, InstrumentConfig};
pub use error::{ExecError, IllegalClassFormat, LoadError};
pub use exec::{Heap, MAX_CALL_DEPTH};
pub use loader::{SourceLoader, TransformLoader};
pub use rewriter::{MonitorRewriter, RewriteRequest, Rewriter};
pub use source::{ClassBytesSource, DirectorySource, MemorySource, class_file_path};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Loader identifier type
pub type LoaderId = u64;

static NEXT_LOADER_ID: AtomicU64 = AtomicU64::new(1);

fn next_loader_id() -> LoaderId {
    NEXT_LOADER_ID.fetch_add(1, Ordering::SeqCst)
}

/// A defined class: its image plus the loader that defined it
#[derive(Debug)]
pub struct Class {
    name: String,
    loader: LoaderId,
    image: ClassImage,
    bytes: Arc<[u8]>,
}

impl Class {
    /// Decode `bytes` into a class named `name` owned by `loader`
    ///
    /// Fails when the bytes are not a class image or describe a class with a
    /// different name.
    fn define(name: &str, bytes: Vec<u8>, loader: LoaderId) -> Result<Self, IllegalClassFormat> {
        let image = ClassImage::decode(&bytes)?;
        if image.name != name {
            return Err(IllegalClassFormat(format!(
                "wrong name: expected {name}, found {}",
                image.name
            )));
        }
        Ok(Class {
            name: name.to_string(),
            loader,
            image,
            bytes: bytes.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defining_loader(&self) -> LoaderId {
        self.loader
    }

    pub fn image(&self) -> &ClassImage {
        &self.image
    }

    /// The bytes this class was defined from
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether lock hooks have been injected into this class
    pub fn is_instrumented(&self) -> bool {
        self.image.instrumented
    }
}

/// A namespace of defined classes
pub trait ClassLoader: Send + Sync {
    fn id(&self) -> LoaderId;

    /// Return the class for `name`, defining or delegating as needed
    ///
    /// Repeated calls with the same name return the same `Arc<Class>`.
    fn load_class(&self, name: &str) -> Result<Arc<Class>, LoadError>;

    /// The class this loader itself defined under `name`, if any
    fn find_loaded_class(&self, name: &str) -> Option<Arc<Class>>;
}
