use std::path::Path;
use std::path::PathBuf;
use tracing::debug;

/// Ordered directories a relative asset path is looked up in.
#[derive(Debug, Clone, Default)]
pub struct AssetPath {
    search_paths: Vec<PathBuf>,
}

impl AssetPath {
    /// The executable's directory, its parent, `parent/assets` and `parent/parent/assets`.
    pub fn from_current_exe() -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        let mut search = Self::default();
        if let Some(dir) = exe.parent() {
            search.add_standard_paths(dir);
        }
        Ok(search)
    }

    pub fn add_standard_paths(&mut self, exe_dir: &Path) {
        self.add_search_path(exe_dir);
        if let Some(parent) = exe_dir.parent() {
            self.add_search_path(parent);
            self.add_search_path(parent.join("assets"));
            if let Some(grandparent) = parent.parent() {
                self.add_search_path(grandparent.join("assets"));
            }
        }
    }

    /// Directories that do not exist are skipped.
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if path.is_dir() && !self.search_paths.contains(&path) {
            debug!("Asset search path {}", path.display());
            self.search_paths.push(path);
        }
    }

    pub fn resolve(&self, relative: impl AsRef<Path>) -> Option<PathBuf> {
        let relative = relative.as_ref();
        if relative.is_absolute() {
            return relative.exists().then(|| relative.to_path_buf());
        }
        self.search_paths
            .iter()
            .map(|base| base.join(relative))
            .find(|candidate| candidate.exists())
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins_and_assets_dirs_are_searched() -> std::io::Result<()> {
        let root = std::env::temp_dir().join(format!("d3d12_pbr_asset_path_{}", std::process::id()));
        let exe_dir = root.join("target").join("debug");
        std::fs::create_dir_all(&exe_dir)?;
        std::fs::create_dir_all(root.join("assets"))?;
        std::fs::write(root.join("assets").join("model.glb"), b"glb")?;
        std::fs::write(exe_dir.join("shader.cso"), b"dxbc")?;

        let mut search = AssetPath::default();
        search.add_standard_paths(&exe_dir);
        assert_eq!(search.resolve("shader.cso"), Some(exe_dir.join("shader.cso")));
        assert_eq!(
            search.resolve("model.glb"),
            Some(root.join("assets").join("model.glb"))
        );
        assert_eq!(search.resolve("missing.png"), None);
        // target/assets does not exist
        assert_eq!(search.search_paths().len(), 3);

        std::fs::remove_dir_all(&root)?;
        Ok(())
    }
}
