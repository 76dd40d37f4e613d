use std::path::{Path, PathBuf};

/// Namespaces that are always delegated and never rewritten
pub const DEFAULT_PROTECTED_PREFIXES: &[&str] = &["std.", "core.", "alloc.", "lockcard."];

const DEFAULT_DUMP_DIR: &str = "lockcard_classes";

/// Settings read once when a loader is created
#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    validate_transformed_classes: bool,
    dump_class_files: bool,
    dump_dir: PathBuf,
    protected_prefixes: Vec<String>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        InstrumentConfig {
            validate_transformed_classes: true,
            dump_class_files: false,
            dump_dir: PathBuf::from(DEFAULT_DUMP_DIR),
            protected_prefixes: DEFAULT_PROTECTED_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl InstrumentConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Verify every rewritten class before defining it (on by default)
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_transformed_classes = validate;
        self
    }

    /// Write every rewritten class to the dump directory for inspection
    pub fn with_dump_class_files(mut self, dump: bool) -> Self {
        self.dump_class_files = dump;
        self
    }

    pub fn with_dump_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.dump_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Add a namespace prefix that must never be rewritten
    pub fn with_protected_prefix(mut self, prefix: &str) -> Self {
        self.protected_prefixes.push(prefix.to_string());
        self
    }

    pub fn validate_transformed_classes(&self) -> bool {
        self.validate_transformed_classes
    }

    pub fn dump_class_files(&self) -> bool {
        self.dump_class_files
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    pub fn is_protected(&self, class_name: &str) -> bool {
        self.protected_prefixes
            .iter()
            .any(|prefix| class_name.starts_with(prefix.as_str()))
    }
}
