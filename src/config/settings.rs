use std::path::{Path, PathBuf};

/// Runtime options, fixed for the lifetime of one invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root every relative configuration path resolves against.
    pub workspace: PathBuf,
    /// Print external command lines before running them.
    pub verbose: bool,
    /// Run the VM without a display window.
    pub headless: bool,
    /// Force the release profile regardless of `kernel.release`.
    pub release: bool,
}

impl Settings {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            verbose: false,
            headless: false,
            release: false,
        }
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    /// `<workspace>/target`
    pub fn target_dir(&self) -> PathBuf {
        self.workspace.join("target")
    }
}
