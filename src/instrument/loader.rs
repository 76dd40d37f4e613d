use super::config::InstrumentConfig;
use super::error::{IllegalClassFormat, LoadError};
use super::rewriter::{RewriteRequest, Rewriter};
use super::source::{ClassBytesSource, class_file_path};
use super::{Class, ClassLoader, LoaderId, next_loader_id};
use fxhash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;

/// Plain loader defining classes from a source without rewriting them
///
/// Serves as the parent of a [`TransformLoader`].
pub struct SourceLoader {
    id: LoaderId,
    source: Arc<dyn ClassBytesSource>,
    classes: Mutex<FxHashMap<String, Arc<Class>>>,
}

impl SourceLoader {
    pub fn new(source: Arc<dyn ClassBytesSource>) -> Self {
        SourceLoader {
            id: next_loader_id(),
            source,
            classes: Mutex::new(FxHashMap::default()),
        }
    }
}

impl ClassLoader for SourceLoader {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn load_class(&self, name: &str) -> Result<Arc<Class>, LoadError> {
        let mut classes = self.classes.lock();
        if let Some(class) = classes.get(name) {
            return Ok(Arc::clone(class));
        }

        let bytes = self
            .source
            .class_bytes(name)
            .ok_or_else(|| LoadError::NotFound(name.to_string()))?;
        let class = Class::define(name, bytes, self.id).map_err(|source| LoadError::ClassFormat {
            name: name.to_string(),
            source,
        })?;

        let class = Arc::new(class);
        classes.insert(name.to_string(), Arc::clone(&class));
        Ok(class)
    }

    fn find_loaded_class(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.lock().get(name).cloned()
    }
}

/// Defined classes and the names that were rewritten, guarded together
#[derive(Default)]
struct LoaderState {
    classes: FxHashMap<String, Arc<Class>>,
    transformed: FxHashSet<String>,
}

/// Loader that rewrites selected classes as they are loaded
///
/// Per requested name:
/// - already defined here: the same class is returned again
/// - not selected, or in a protected namespace: delegated to the parent
/// - selected: raw bytes are rewritten and defined here; a declining
///   rewriter yields [`LoadError::NotTransformed`]
///
/// Without a selector only [`TransformLoader::transform`] rewrites classes
/// and every load request is delegated.
pub struct TransformLoader {
    id: LoaderId,
    rewriter: Box<dyn Rewriter>,
    parent: Arc<dyn ClassLoader>,
    source: Arc<dyn ClassBytesSource>,
    selector: Option<Regex>,
    config: InstrumentConfig,
    state: Mutex<LoaderState>,
}

impl TransformLoader {
    /// Create a loader that only transforms classes passed to `transform`
    pub fn new<R>(rewriter: R, parent: Arc<dyn ClassLoader>, source: Arc<dyn ClassBytesSource>) -> Self
    where
        R: Rewriter + 'static,
    {
        TransformLoader {
            id: next_loader_id(),
            rewriter: Box::new(rewriter),
            parent,
            source,
            selector: None,
            config: InstrumentConfig::default(),
            state: Mutex::new(LoaderState::default()),
        }
    }

    /// Also transform every loaded class whose whole name matches `pattern`
    ///
    /// # Errors
    /// Returns an error if `pattern` is not a valid regular expression
    pub fn with_selector(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.selector = Some(Regex::new(&format!("^(?:{pattern})$"))?);
        Ok(self)
    }

    pub fn with_config(mut self, config: InstrumentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn parent(&self) -> &Arc<dyn ClassLoader> {
        &self.parent
    }

    /// Rewrite `class` even if its name is not selected
    ///
    /// The original bytes are fetched from the source again, so a class that
    /// was itself instrumented elsewhere is rewritten from scratch.
    ///
    /// # Errors
    /// - [`LoadError::Protected`] for names in a protected namespace
    /// - [`LoadError::AlreadyDefined`] if this loader already defined the name
    /// - [`LoadError::NotTransformed`] if the rewriter declined
    /// - [`LoadError::Malformed`] if rewriting failed or produced an invalid class
    pub fn transform(&self, class: &Class) -> Result<Arc<Class>, LoadError> {
        let name = class.name();
        if self.config.is_protected(name) {
            return Err(LoadError::Protected(name.to_string()));
        }

        self.ensure_undefined(&self.state.lock(), name)?;
        let bytes = self.original_bytes(name)?;
        let rewritten = self.rewrite(name, &bytes, Some(class))?;

        let transformed = {
            let mut state = self.state.lock();
            self.ensure_undefined(&state, name)?;
            self.install(&mut state, rewritten, true)
        };
        self.dump(&transformed);
        Ok(transformed)
    }

    /// Define a fresh, un-instrumented copy of `class` in this loader
    pub fn load_unmodified(&self, class: &Class) -> Result<Arc<Class>, LoadError> {
        let name = class.name();
        self.ensure_undefined(&self.state.lock(), name)?;

        let bytes = self.original_bytes(name)?;
        let defined = Class::define(name, bytes, self.id).map_err(|source| LoadError::ClassFormat {
            name: name.to_string(),
            source,
        })?;

        let mut state = self.state.lock();
        self.ensure_undefined(&state, name)?;
        Ok(self.install(&mut state, defined, false))
    }

    /// Whether this loader has rewritten a class of that name
    pub fn has_been_transformed(&self, name: &str) -> bool {
        self.state.lock().transformed.contains(name)
    }

    /// Names of all rewritten classes, sorted
    pub fn transformed_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().transformed.iter().cloned().collect();
        names.sort();
        names
    }

    fn is_class_name_to_be_transformed(&self, name: &str) -> bool {
        !self.config.is_protected(name)
            && self
                .selector
                .as_ref()
                .is_some_and(|selector| selector.is_match(name))
    }

    fn ensure_undefined(&self, state: &LoaderState, name: &str) -> Result<(), LoadError> {
        if state.classes.contains_key(name) {
            return Err(LoadError::AlreadyDefined {
                name: name.to_string(),
                loader: self.id,
            });
        }
        Ok(())
    }

    fn original_bytes(&self, name: &str) -> Result<Vec<u8>, LoadError> {
        self.source
            .class_bytes(name)
            .ok_or_else(|| LoadError::NotFound(name.to_string()))
    }

    /// Run the rewriter and build the class it produced
    ///
    /// Called without the state lock, so the rewriter may load other classes
    /// through this loader.
    fn rewrite(&self, name: &str, bytes: &[u8], existing: Option<&Class>) -> Result<Class, LoadError> {
        let malformed = |source: IllegalClassFormat| LoadError::Malformed {
            name: name.to_string(),
            source,
        };

        let code_source = self.source.code_source(name);
        let request = RewriteRequest {
            loader: self.id,
            class_name: name,
            code_source: code_source.as_deref(),
            existing,
            bytes,
        };
        let rewritten = self
            .rewriter
            .rewrite(&request)
            .map_err(malformed)?
            .ok_or_else(|| LoadError::NotTransformed(name.to_string()))?;

        let class = Class::define(name, rewritten, self.id).map_err(malformed)?;
        if self.config.validate_transformed_classes() {
            class.image().verify().map_err(malformed)?;
        }
        Ok(class)
    }

    fn install(&self, state: &mut LoaderState, class: Class, transformed: bool) -> Arc<Class> {
        let name = class.name().to_string();
        let class = Arc::new(class);
        if transformed {
            state.transformed.insert(name.clone());
            tracing::debug!(class = %name, loader = self.id, "transformed class");
        }
        state.classes.insert(name, Arc::clone(&class));
        class
    }

    /// Write rewritten bytes below the dump directory if configured
    ///
    /// Failures, including names that do not map below the dump directory,
    /// are only logged.
    fn dump(&self, class: &Class) {
        if !self.config.dump_class_files() {
            return;
        }
        let name = class.name();
        let path = match class_file_path(self.config.dump_dir(), name) {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!("not dumping {name}: {e}");
                return;
            }
        };
        let result = path
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&path, class.bytes()));
        if let Err(e) = result {
            tracing::warn!("failed to dump {name} to {}: {e}", path.display());
        }
    }
}

impl ClassLoader for TransformLoader {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn load_class(&self, name: &str) -> Result<Arc<Class>, LoadError> {
        if let Some(class) = self.find_loaded_class(name) {
            return Ok(class);
        }

        if !self.is_class_name_to_be_transformed(name) {
            tracing::debug!(class = name, loader = self.id, "delegating to parent");
            return self.parent.load_class(name);
        }

        let bytes = self.original_bytes(name)?;
        let rewritten = self.rewrite(name, &bytes, None)?;

        let class = {
            let mut state = self.state.lock();
            // Another thread, or the rewriter itself, may have got here first
            if let Some(class) = state.classes.get(name) {
                return Ok(Arc::clone(class));
            }
            self.install(&mut state, rewritten, true)
        };
        self.dump(&class);
        Ok(class)
    }

    fn find_loaded_class(&self, name: &str) -> Option<Arc<Class>> {
        self.state.lock().classes.get(name).cloned()
    }
}
