//! File resource - regular files, directories and symlinks

use anyhow::{Context, Result, bail};
use declarative::{
    AttrKind, CurrentState, Ensure, Outcome, Provider, ProviderContext, ProviderResult, Resource,
    TypeSchema, Value,
};
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Account databases used to translate owner and group names
#[derive(Debug, Clone)]
pub struct IdDatabase {
    passwd: PathBuf,
    group: PathBuf,
}

impl Default for IdDatabase {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            group: PathBuf::from("/etc/group"),
        }
    }
}

impl IdDatabase {
    pub fn new(passwd: impl Into<PathBuf>, group: impl Into<PathBuf>) -> Self {
        Self {
            passwd: passwd.into(),
            group: group.into(),
        }
    }

    // Re-read on every lookup: accounts may be created earlier in the same run
    fn entries(path: &Path) -> Vec<(String, u32)> {
        let Ok(content) = fs::read_to_string(path) else {
            return Vec::new();
        };
        content
            .lines()
            .filter(|line| !line.starts_with('#'))
            .filter_map(|line| {
                let mut fields = line.split(':');
                let name = fields.next()?;
                let id = fields.nth(1)?.parse().ok()?;
                Some((name.to_string(), id))
            })
            .collect()
    }

    fn name_of(path: &Path, id: u32) -> String {
        Self::entries(path)
            .into_iter()
            .find(|(_, i)| *i == id)
            .map_or_else(|| id.to_string(), |(name, _)| name)
    }

    fn id_of(path: &Path, name: &str) -> Option<u32> {
        if let Ok(id) = name.parse() {
            return Some(id);
        }
        Self::entries(path)
            .into_iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| id)
    }

    pub fn user_name(&self, uid: u32) -> String {
        Self::name_of(&self.passwd, uid)
    }

    pub fn group_name(&self, gid: u32) -> String {
        Self::name_of(&self.group, gid)
    }

    pub fn uid(&self, name: &str) -> Option<u32> {
        Self::id_of(&self.passwd, name)
    }

    pub fn gid(&self, name: &str) -> Option<u32> {
        Self::id_of(&self.group, name)
    }
}

/// Manages one path on the local filesystem
#[derive(Debug, Default)]
pub struct FileProvider {
    ids: IdDatabase,
}

impl FileProvider {
    pub fn new(ids: IdDatabase) -> Self {
        Self { ids }
    }

    fn path(resource: &Resource) -> PathBuf {
        resource
            .attr_path("path")
            .map_or_else(|| PathBuf::from(resource.title()), Path::to_path_buf)
    }

    /// Bytes the file should contain, if content is managed at all
    fn desired_content(resource: &Resource) -> Result<Option<Vec<u8>>> {
        match (resource.attr("content"), resource.attr_path("source")) {
            (Some(_), Some(_)) => bail!("`content` and `source` are mutually exclusive"),
            (Some(content), None) => Ok(Some(content_bytes(content))),
            (None, Some(source)) => fs::read(source)
                .map(Some)
                .with_context(|| format!("Failed to read source file: {}", source.display())),
            (None, None) => Ok(None),
        }
    }

    fn remove(path: &Path, kind: Ensure, force: bool) -> Result<()> {
        match kind {
            Ensure::Directory if force => fs::remove_dir_all(path),
            Ensure::Directory => fs::remove_dir(path),
            _ => fs::remove_file(path),
        }
        .with_context(|| format!("Failed to remove {}", path.display()))
    }

    /// Clear whatever is at `path` so something of another kind can take its place
    fn replace(path: &Path, existing: Ensure, force: bool) -> Result<()> {
        match existing {
            Ensure::Absent => Ok(()),
            Ensure::Symlink => Self::remove(path, existing, false),
            _ if force => Self::remove(path, existing, true),
            _ => bail!(
                "{} exists as a {existing}; set force = true to replace it",
                path.display()
            ),
        }
    }

    fn write_file(path: &Path, content: &[u8]) -> Result<()> {
        let name = path
            .file_name()
            .with_context(|| format!("Not a file path: {}", path.display()))?;
        let staging = path.with_file_name(format!(".{}.converge-new", name.to_string_lossy()));

        fs::write(&staging, content)
            .with_context(|| format!("Failed to write {}", staging.display()))?;
        if let Ok(meta) = fs::metadata(path) {
            // Keep the existing mode until `mode` says otherwise
            fs::set_permissions(&staging, meta.permissions()).with_context(|| {
                format!("Failed to copy permissions of {} to {}", path.display(), staging.display())
            })?;
        }
        fs::rename(&staging, path)
            .with_context(|| format!("Failed to move {} into place", path.display()))
    }

    fn converge_metadata(
        &self,
        resource: &Resource,
        path: &Path,
        current: &CurrentState,
    ) -> Result<bool> {
        let mut changed = false;
        let drifted = |name: &str| match (resource.attr(name), current.get(name)) {
            (Some(desired), Some(observed)) => !self.in_sync(name, desired, observed),
            (Some(_), None) => true,
            (None, _) => false,
        };

        if resource.ensure != Ensure::Symlink
            && drifted("mode")
            && let Some(mode) = resource.attr("mode").and_then(Value::as_int)
        {
            fs::set_permissions(path, fs::Permissions::from_mode(mode as u32))
                .with_context(|| format!("Failed to set mode {mode:o} on {}", path.display()))?;
            changed = true;
        }

        let owner = match resource.attr_str("owner") {
            Some(name) if drifted("owner") => Some(
                self.ids
                    .uid(name)
                    .with_context(|| format!("Unknown user: {name}"))?,
            ),
            _ => None,
        };
        let group = match resource.attr_str("group") {
            Some(name) if drifted("group") => Some(
                self.ids
                    .gid(name)
                    .with_context(|| format!("Unknown group: {name}"))?,
            ),
            _ => None,
        };
        if owner.is_some() || group.is_some() {
            std::os::unix::fs::lchown(path, owner, group)
                .with_context(|| format!("Failed to change ownership of {}", path.display()))?;
            changed = true;
        }

        Ok(changed)
    }
}

fn content_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Sensitive(secret) => secret.expose().as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

fn digest(bytes: &[u8]) -> blake3::Hash {
    blake3::hash(bytes)
}

fn observed_kind(meta: &fs::Metadata) -> Ensure {
    let file_type = meta.file_type();
    if file_type.is_symlink() {
        Ensure::Symlink
    } else if file_type.is_dir() {
        Ensure::Directory
    } else {
        Ensure::File
    }
}

impl Provider for FileProvider {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn schema(&self) -> TypeSchema {
        TypeSchema::new(
            "file",
            &[
                Ensure::File,
                Ensure::Present,
                Ensure::Directory,
                Ensure::Symlink,
                Ensure::Absent,
            ],
        )
        .namevar("path", AttrKind::AbsolutePath)
        .property("content", AttrKind::String)
        .property("source", AttrKind::AbsolutePath)
        .property("mode", AttrKind::Mode)
        .only_with(&[Ensure::File, Ensure::Present, Ensure::Directory])
        .property("owner", AttrKind::String)
        .property("group", AttrKind::String)
        .property("target", AttrKind::String)
        .only_with(&[Ensure::Symlink])
        .parameter("force", AttrKind::Bool)
        .default_value(false)
    }

    fn read_state(&self, resource: &Resource, _ctx: &ProviderContext) -> ProviderResult<CurrentState> {
        let path = Self::path(resource);
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CurrentState::absent()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to inspect {}", path.display()));
            }
        };

        let kind = observed_kind(&meta);
        let ensure = if resource.ensure == Ensure::Present {
            Ensure::Present
        } else {
            kind
        };
        let mut state = CurrentState::new(ensure)
            .with("owner", self.ids.user_name(meta.uid()))
            .with("group", self.ids.group_name(meta.gid()));

        match kind {
            Ensure::Symlink => {
                let target = fs::read_link(&path)
                    .with_context(|| format!("Failed to read symlink {}", path.display()))?;
                state = state.with("target", target.display().to_string());
            }
            Ensure::File => {
                state = state.with("mode", i64::from(meta.mode() & 0o7777));
                let manages_content =
                    resource.attr("content").is_some() || resource.attr("source").is_some();
                if manages_content {
                    let bytes = fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    if let Some(source) = resource.attr_path("source") {
                        let matches = fs::read(source).is_ok_and(|s| digest(&s) == digest(&bytes));
                        let observed = if matches {
                            Value::Path(source.to_path_buf())
                        } else {
                            Value::Str(format!("blake3:{}", &digest(&bytes).to_hex()[..16]))
                        };
                        state = state.with("source", observed);
                    }
                    state = state.with("content", String::from_utf8_lossy(&bytes).into_owned());
                }
            }
            _ => state = state.with("mode", i64::from(meta.mode() & 0o7777)),
        }

        Ok(state)
    }

    fn in_sync(&self, property: &str, desired: &Value, current: &Value) -> bool {
        match property {
            "content" => digest(&content_bytes(desired)) == digest(&content_bytes(current)),
            "owner" => {
                desired == current
                    || matches!(
                        (desired.as_str().and_then(|d| self.ids.uid(d)), current.as_str().and_then(|c| self.ids.uid(c))),
                        (Some(a), Some(b)) if a == b
                    )
            }
            "group" => {
                desired == current
                    || matches!(
                        (desired.as_str().and_then(|d| self.ids.gid(d)), current.as_str().and_then(|c| self.ids.gid(c))),
                        (Some(a), Some(b)) if a == b
                    )
            }
            _ => desired == current,
        }
    }

    fn apply_state(
        &self,
        resource: &Resource,
        current: &CurrentState,
        ctx: &ProviderContext,
    ) -> ProviderResult<Outcome> {
        let path = Self::path(resource);
        let force = resource.attr_bool("force").unwrap_or(false);
        // What is on disk, independent of how `present` was reported
        let existing = match fs::symlink_metadata(&path) {
            Ok(meta) => observed_kind(&meta),
            Err(_) => Ensure::Absent,
        };

        if resource.ensure == Ensure::Absent {
            if existing == Ensure::Absent {
                return Ok(Outcome::NoChange);
            }
            Self::remove(&path, existing, force)?;
            log::info!("Removed {}", path.display());
            return Ok(Outcome::Removed);
        }

        let created = existing == Ensure::Absent;
        let mut changed = false;

        match resource.ensure {
            Ensure::Directory => {
                if existing != Ensure::Directory {
                    Self::replace(&path, existing, force)?;
                    fs::create_dir(&path)
                        .with_context(|| format!("Failed to create directory {}", path.display()))?;
                    changed = true;
                }
            }
            Ensure::Symlink => {
                let target = resource
                    .attr_str("target")
                    .with_context(|| format!("Symlink {} needs a target", path.display()))?;
                let points_right = existing == Ensure::Symlink
                    && fs::read_link(&path).is_ok_and(|t| t == Path::new(target));
                if !points_right {
                    Self::replace(&path, existing, force)?;
                    std::os::unix::fs::symlink(target, &path).with_context(|| {
                        format!("Failed to create symlink {} -> {target}", path.display())
                    })?;
                    changed = true;
                }
            }
            _ => {
                let content = Self::desired_content(resource)?;
                let keep_existing =
                    resource.ensure == Ensure::Present && existing != Ensure::Absent;
                if !keep_existing && existing != Ensure::File {
                    Self::replace(&path, existing, force)?;
                    Self::write_file(&path, content.as_deref().unwrap_or_default())?;
                    changed = true;
                } else if existing == Ensure::File
                    && let Some(content) = content
                {
                    let on_disk = fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    if digest(&on_disk) != digest(&content) {
                        Self::write_file(&path, &content)?;
                        changed = true;
                    }
                }
            }
        }

        // Observe again after a structural change; `current` describes what was replaced
        let current = if changed {
            self.read_state(resource, ctx)?
        } else {
            current.clone()
        };
        changed |= self.converge_metadata(resource, &path, &current)?;

        Ok(match (created, changed) {
            (true, _) => {
                log::info!("Created {}", path.display());
                Outcome::Created
            }
            (false, true) => {
                log::info!("Updated {}", path.display());
                Outcome::Modified
            }
            (false, false) => Outcome::NoChange,
        })
    }
}
