//! Scoped filesystem capability.
//!
//! A [`FileSystem`] confines every operation to a normalized root, applies
//! an optional relative-path predicate, and segregates classified paths:
//! regular operations fail on them and only `read_classified`/
//! `write_classified` may touch them. Handles re-check access on every call
//! so a stored [`FileEntry`] cannot outlive the checks of its capability.

use std::fmt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use regex_lite::Regex;
use wildmatch::WildMatch;

use crate::capability::CapabilityState;
use crate::capability::RevocationGuard;
use crate::capability::SandboxContext;
use crate::classified::Classified;
use crate::config::normalize_path;
use crate::error::Result;
use crate::error::SafeExecErr;
use crate::error::SecurityErr;

pub type PathPredicate = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// One line matched by `grep`/`grep_recursive`.
#[derive(Debug, Clone, PartialEq)]
pub struct GrepMatch {
    pub path: PathBuf,
    /// 1-based.
    pub line_number: usize,
    pub line: String,
}

#[derive(Clone)]
pub struct FileSystem {
    root: PathBuf,
    predicate: Option<PathPredicate>,
    /// Classified paths relevant to this root: configured paths lying below
    /// the root, plus ancestors of the root (so a capability rooted inside a
    /// classified area cannot drill through the protection).
    classified: Vec<PathBuf>,
    ctx: Arc<SandboxContext>,
    state: Arc<CapabilityState>,
}

impl fmt::Debug for FileSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSystem")
            .field("root", &self.root)
            .field("classified", &self.classified)
            .finish_non_exhaustive()
    }
}

/// Grant a filesystem capability for the duration of `f`. The capability is
/// revoked on every exit path; a handle leaked out of the callback fails
/// all further operations with a security error.
pub fn request_filesystem<R>(
    ctx: &Arc<SandboxContext>,
    root: impl AsRef<Path>,
    f: impl FnOnce(&FileSystem) -> Result<R>,
) -> Result<R> {
    request_filesystem_with_predicate(ctx, root, None, f)
}

pub fn request_filesystem_with_predicate<R>(
    ctx: &Arc<SandboxContext>,
    root: impl AsRef<Path>,
    predicate: Option<PathPredicate>,
    f: impl FnOnce(&FileSystem) -> Result<R>,
) -> Result<R> {
    ctx.check_effects_allowed()?;
    let fs = FileSystem::new(root, predicate, ctx.clone());
    let _guard = RevocationGuard::new(fs.state.clone());
    f(&fs)
}

impl FileSystem {
    pub(crate) fn new(
        root: impl AsRef<Path>,
        predicate: Option<PathPredicate>,
        ctx: Arc<SandboxContext>,
    ) -> Self {
        let root = normalize_path(root.as_ref());
        let classified = ctx
            .classified_paths
            .iter()
            .filter(|c| c.starts_with(&root) || root.starts_with(c))
            .cloned()
            .collect();
        Self {
            root,
            predicate,
            classified,
            ctx,
            state: CapabilityState::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn capability_state(&self) -> Arc<CapabilityState> {
        self.state.clone()
    }

    /// Resolve `path` and return a handle. Rejects paths outside the root
    /// and paths the predicate refuses.
    pub fn access(&self, path: impl AsRef<Path>) -> Result<FileEntry> {
        self.ctx.check_effects_allowed()?;
        self.state.check_live()?;
        let resolved = self.resolve(path.as_ref())?;
        Ok(FileEntry {
            fs: self.clone(),
            path: resolved,
        })
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let resolved = normalize_path(&joined);
        if !resolved.starts_with(&self.root) {
            return Err(SecurityErr::PathEscape { path: resolved }.into());
        }
        if let Some(predicate) = &self.predicate {
            // The root itself has an empty relative portion and is always
            // admissible.
            if let Ok(relative) = resolved.strip_prefix(&self.root)
                && !relative.as_os_str().is_empty()
                && !predicate(relative)
            {
                return Err(SecurityErr::PredicateRejected { path: resolved }.into());
            }
        }
        Ok(resolved)
    }

    /// A path is classified when any relevant classified path equals it or
    /// is an ancestor of it.
    pub fn is_classified_path(&self, path: &Path) -> bool {
        self.classified.iter().any(|c| path.starts_with(c))
    }

    /// Read lines of `path` and return the ones matching `pattern`.
    pub fn grep(&self, path: impl AsRef<Path>, pattern: &str) -> Result<Vec<GrepMatch>> {
        let regex = compile_pattern(pattern)?;
        let entry = self.access(path)?;
        grep_entry(&entry, &regex)
    }

    /// Walk the subtree under `dir`, restrict to file names matching `glob`,
    /// and grep each file. Classified files are skipped: their contents are
    /// unreachable through this capability.
    pub fn grep_recursive(
        &self,
        dir: impl AsRef<Path>,
        pattern: &str,
        glob: &str,
    ) -> Result<Vec<GrepMatch>> {
        let regex = compile_pattern(pattern)?;
        let matcher = WildMatch::new(glob);
        let dir = self.access(dir)?;
        let mut matches = Vec::new();
        for entry in dir.walk()? {
            if entry.is_directory()?
                || self.is_classified_path(entry.path())
                || !matcher.matches(&entry.name())
            {
                continue;
            }
            // Binary or otherwise unreadable files are skipped, not fatal.
            if let Ok(found) = grep_entry(&entry, &regex) {
                matches.extend(found);
            }
        }
        Ok(matches)
    }

    /// Walk the subtree under `dir` and return the absolute paths whose file
    /// name matches `glob`.
    pub fn find(&self, dir: impl AsRef<Path>, glob: &str) -> Result<Vec<PathBuf>> {
        let matcher = WildMatch::new(glob);
        let dir = self.access(dir)?;
        Ok(dir
            .walk()?
            .into_iter()
            .filter(|entry| matcher.matches(&entry.name()))
            .map(|entry| entry.path.clone())
            .collect())
    }

    fn check_metadata_op(&self) -> Result<()> {
        self.ctx.check_effects_allowed()?;
        self.state.check_live()
    }

    fn check_plain_op(&self, path: &Path) -> Result<()> {
        self.check_metadata_op()?;
        if self.is_classified_path(path) {
            return Err(SecurityErr::ClassifiedPath {
                path: path.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }

    fn check_classified_op(&self, path: &Path) -> Result<()> {
        self.check_metadata_op()?;
        if !self.is_classified_path(path) {
            return Err(SecurityErr::NotClassifiedPath {
                path: path.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| SafeExecErr::Pattern(e.to_string()))
}

fn grep_entry(entry: &FileEntry, regex: &Regex) -> Result<Vec<GrepMatch>> {
    Ok(entry
        .read_lines()?
        .into_iter()
        .enumerate()
        .filter(|(_, line)| regex.is_match(line))
        .map(|(idx, line)| GrepMatch {
            path: entry.path.clone(),
            line_number: idx + 1,
            line,
        })
        .collect())
}

/// Handle to one resolved path, bound to the capability that granted it.
/// Every operation re-checks revocation and the classified rule at call
/// time.
#[derive(Clone)]
pub struct FileEntry {
    fs: FileSystem,
    path: PathBuf,
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry").field("path", &self.path).finish()
    }
}

impl FileEntry {
    // -- metadata queries, permitted on all paths --

    pub fn exists(&self) -> Result<bool> {
        self.fs.check_metadata_op()?;
        Ok(self.path.exists())
    }

    pub fn is_directory(&self) -> Result<bool> {
        self.fs.check_metadata_op()?;
        Ok(self.path.is_dir())
    }

    pub fn size(&self) -> Result<u64> {
        self.fs.check_metadata_op()?;
        Ok(std::fs::metadata(&self.path)?.len())
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pure metadata query: reports the classified bit and always succeeds.
    pub fn is_classified(&self) -> bool {
        self.fs.is_classified_path(&self.path)
    }

    // -- plain operations, rejected on classified paths --

    pub fn read(&self) -> Result<String> {
        self.fs.check_plain_op(&self.path)?;
        Ok(std::fs::read_to_string(&self.path)?)
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        self.fs.check_plain_op(&self.path)?;
        Ok(std::fs::read(&self.path)?)
    }

    pub fn read_lines(&self) -> Result<Vec<String>> {
        let contents = self.read()?;
        Ok(contents.lines().map(str::to_string).collect())
    }

    pub fn write(&self, contents: &str) -> Result<()> {
        self.fs.check_plain_op(&self.path)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::write(&self.path, contents)?)
    }

    pub fn append(&self, contents: &str) -> Result<()> {
        self.fs.check_plain_op(&self.path)?;
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        self.fs.check_plain_op(&self.path)?;
        if self.path.is_dir() {
            std::fs::remove_dir_all(&self.path)?;
        } else {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// Direct children, sorted by name for deterministic output.
    pub fn children(&self) -> Result<Vec<FileEntry>> {
        self.fs.check_plain_op(&self.path)?;
        let mut children: Vec<FileEntry> = std::fs::read_dir(&self.path)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .map(|entry| FileEntry {
                fs: self.fs.clone(),
                path: entry.path(),
            })
            .collect();
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    /// All entries of the subtree, depth-first. Classified directories are
    /// reported but never descended into: their names are metadata, their
    /// contents are not.
    pub fn walk(&self) -> Result<Vec<FileEntry>> {
        self.fs.check_plain_op(&self.path)?;
        let mut collected = Vec::new();
        self.walk_into(&mut collected)?;
        Ok(collected)
    }

    fn walk_into(&self, collected: &mut Vec<FileEntry>) -> Result<()> {
        for child in self.children()? {
            let descend = child.path.is_dir() && !child.is_classified();
            collected.push(child.clone());
            if descend {
                child.walk_into(collected)?;
            }
        }
        Ok(())
    }

    // -- classified operations, rejected on plain paths --

    pub fn read_classified(&self) -> Result<Classified<String>> {
        self.fs.check_classified_op(&self.path)?;
        Ok(Classified::new(std::fs::read_to_string(&self.path)?))
    }

    pub fn write_classified(&self, contents: &Classified<String>) -> Result<()> {
        self.fs.check_classified_op(&self.path)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(std::fs::write(&self.path, contents.inner())?)
    }
}
