#![allow(missing_docs)]
use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use bitflags::bitflags;

use crate::arch::ArchId;
use crate::depend::CompoundDepend;
use crate::index::AbstractId;

mod parser;
mod version;

pub use parser::{FieldMask, LineOutcome, StanzaParser};
pub use version::{Operator, Version, VersionConstraint};

/// What the user asked the installer to do with a package.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub enum StateWant {
    #[default]
    Unknown,
    Install,
    Deinstall,
    Purge,
}

impl StateWant {
    pub fn parse(s: &str) -> Self {
        match s {
            "unknown" => Self::Unknown,
            "install" => Self::Install,
            "deinstall" => Self::Deinstall,
            "purge" => Self::Purge,
            _ => {
                log::error!("unknown want state {s:?}");
                Self::Unknown
            }
        }
    }
}

impl fmt::Display for StateWant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Install => "install",
            Self::Deinstall => "deinstall",
            Self::Purge => "purge",
        };
        write!(f, "{}", s)
    }
}

/// Where a package currently stands on disk.
#[derive(Debug, Default, PartialEq, Eq, Copy, Clone)]
pub enum StateStatus {
    #[default]
    NotInstalled,
    Unpacked,
    HalfConfigured,
    Installed,
    HalfInstalled,
    ConfigFiles,
    PostInstFailed,
    RemovalFailed,
}

impl StateStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "not-installed" => Self::NotInstalled,
            "unpacked" => Self::Unpacked,
            "half-configured" => Self::HalfConfigured,
            "installed" => Self::Installed,
            "half-installed" => Self::HalfInstalled,
            "config-files" => Self::ConfigFiles,
            "post-inst-failed" => Self::PostInstFailed,
            "removal-failed" => Self::RemovalFailed,
            _ => {
                log::error!("unknown package status {s:?}");
                Self::NotInstalled
            }
        }
    }

    /// Installed or unpacked records both count as present for dependency
    /// satisfaction.
    pub fn is_present(self) -> bool {
        matches!(self, Self::Installed | Self::Unpacked)
    }
}

impl fmt::Display for StateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotInstalled => "not-installed",
            Self::Unpacked => "unpacked",
            Self::HalfConfigured => "half-configured",
            Self::Installed => "installed",
            Self::HalfInstalled => "half-installed",
            Self::ConfigFiles => "config-files",
            Self::PostInstFailed => "post-inst-failed",
            Self::RemovalFailed => "removal-failed",
        };
        write!(f, "{}", s)
    }
}

bitflags! {
    /// Per-package marker flags carried in the `Status:` field and by the
    /// loader. The empty set renders as `ok`.
    pub struct StateFlags: u16 {
        const REINSTREQ = 1 << 0;
        /// Do not upgrade this version.
        const HOLD = 1 << 1;
        const REPLACE = 1 << 2;
        /// Do not remove obsolete files.
        const NOPRUNE = 1 << 3;
        /// Prefer this version when candidates tie.
        const PREFER = 1 << 4;
        /// Old half of an upgrade pair.
        const OBSOLETE = 1 << 5;
        /// Transient mark used by index sweeps.
        const MARKED = 1 << 6;
        /// Installed-files list needs rewriting.
        const FILELIST_CHANGED = 1 << 7;
        const USER = 1 << 8;
        /// Stanza must be fully populated on the next feed pass.
        const NEED_DETAIL = 1 << 9;

        /// Flags that survive a record merge no matter what the incoming
        /// record carries.
        const NONVOLATILE = Self::HOLD.bits
            | Self::NOPRUNE.bits
            | Self::PREFER.bits
            | Self::OBSOLETE.bits
            | Self::USER.bits;
    }
}

impl StateFlags {
    /// Parses the flag words of a `Status:` line. Words are separated by
    /// commas or spaces; unrecognized words are ignored.
    pub fn parse(s: &str) -> Self {
        let mut flags = StateFlags::empty();
        for word in s.split([',', ' ']).filter(|w| !w.is_empty()) {
            match word {
                "ok" => {}
                "reinstreq" => flags |= Self::REINSTREQ,
                "hold" => flags |= Self::HOLD,
                "replace" => flags |= Self::REPLACE,
                "noprune" => flags |= Self::NOPRUNE,
                "prefer" => flags |= Self::PREFER,
                "obsolete" => flags |= Self::OBSOLETE,
                "user" => flags |= Self::USER,
                _ => log::debug!("ignoring unknown status flag {word:?}"),
            }
        }
        flags
    }
}

impl Default for StateFlags {
    fn default() -> Self {
        StateFlags::empty()
    }
}

impl fmt::Display for StateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::REINSTREQ, "reinstreq"),
            (Self::HOLD, "hold"),
            (Self::REPLACE, "replace"),
            (Self::NOPRUNE, "noprune"),
            (Self::PREFER, "prefer"),
            (Self::OBSOLETE, "obsolete"),
            (Self::USER, "user"),
        ];
        let mut wrote = false;
        for (flag, name) in names {
            if self.contains(flag) {
                if wrote {
                    write!(f, ",")?;
                }
                write!(f, "{}", name)?;
                wrote = true;
            }
        }
        if !wrote {
            write!(f, "ok")?;
        }
        Ok(())
    }
}

/// One `path checksum` entry from a `Conffiles` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conffile {
    pub path: String,
    pub md5sum: String,
}

/// One `prio:path:altpath` entry from an `Alternatives` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alternative {
    pub prio: i32,
    pub path: String,
    pub altpath: String,
}

/// A concrete package record, populated from one feed or status stanza.
///
/// Cross-references into the index (`parent`, dependency targets, provides)
/// are arena handles, never owned pointers; the record itself is owned by
/// its parent abstract's version vector once inserted.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    /// Name of the feed this record was read from.
    pub src: Option<String>,
    /// Name of the destination root this record is installed to.
    pub dest: Option<String>,
    pub state_want: StateWant,
    pub state_flag: StateFlags,
    pub state_status: StateStatus,
    pub(crate) parent: Option<AbstractId>,
    pub(crate) arch: Option<ArchId>,
    pub essential: bool,
    pub provided_by_hand: bool,
    pub auto_installed: bool,
    pub is_upgrade: bool,
    pub version: Version,
    pub maintainer: Option<String>,
    pub priority: Option<String>,
    pub source: Option<String>,
    pub tags: Option<String>,
    pub section: Option<String>,
    pub filename: Option<String>,
    pub local_filename: Option<String>,
    pub description: Option<String>,
    pub md5sum: Option<String>,
    pub sha256sum: Option<String>,
    pub size: Option<u64>,
    pub installed_size: Option<u64>,
    pub installed_time: Option<u64>,
    pub tmp_unpack_dir: Option<PathBuf>,
    pub abi_version: Option<String>,
    pub conffiles: Vec<Conffile>,
    pub alternatives: Vec<Alternative>,
    pub installed_files: Vec<String>,
    pub(crate) depends: Vec<CompoundDepend>,
    pub(crate) conflicts: Vec<CompoundDepend>,
    pub(crate) provides: Vec<AbstractId>,
    pub(crate) replaces: Vec<AbstractId>,
}

fn update<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arch(&self) -> Option<ArchId> {
        self.arch
    }

    pub fn depends(&self) -> &[CompoundDepend] {
        &self.depends
    }

    pub fn conflicts(&self) -> &[CompoundDepend] {
        &self.conflicts
    }

    /// Whether any conflict atom of this record names the given abstract.
    pub fn conflicts_with_abstract(&self, target: AbstractId) -> bool {
        self.conflicts
            .iter()
            .any(|c| c.possibilities().iter().any(|d| d.target() == target))
    }

    /// Whether this record replaces the other: their replaces and provides
    /// sets intersect.
    pub fn replaces_pkg(&self, other: &Package) -> bool {
        self.replaces.iter().any(|r| other.provides.contains(r))
    }

    /// Whether any conflict atom names one of the other record's provides.
    pub fn conflicts_with_pkg(&self, other: &Package) -> bool {
        self.conflicts.iter().any(|c| {
            c.possibilities()
                .iter()
                .any(|d| other.provides.contains(&d.target()))
        })
    }

    /// The `Status:` line for this record, as written back to a status
    /// file.
    pub fn status_line(&self) -> String {
        format!(
            "Status: {} {} {}",
            self.state_want, self.state_flag, self.state_status
        )
    }

    /// Whether two records describe the same concrete package. The index
    /// never stores two records sharing this triple.
    pub fn same_triple(&self, other: &Package) -> bool {
        self.name == other.name && self.version == other.version && self.arch == other.arch
    }

    /// Folds a re-parsed record into this one. Populated fields of the
    /// incoming record win; non-volatile flags accumulate. A record seen in
    /// a status file (`set_status`) also carries its want/flag/status
    /// triple over, and a record claiming to be on disk promotes the
    /// status either way.
    pub fn merge(&mut self, other: Package, set_status: bool) {
        if !other.version.upstream().is_empty() {
            self.version = other.version;
        }
        update(&mut self.src, other.src);
        update(&mut self.dest, other.dest);
        if other.arch.is_some() {
            self.arch = other.arch;
        }
        update(&mut self.maintainer, other.maintainer);
        update(&mut self.priority, other.priority);
        update(&mut self.source, other.source);
        update(&mut self.tags, other.tags);
        update(&mut self.section, other.section);
        update(&mut self.filename, other.filename);
        update(&mut self.local_filename, other.local_filename);
        update(&mut self.description, other.description);
        update(&mut self.md5sum, other.md5sum);
        update(&mut self.sha256sum, other.sha256sum);
        update(&mut self.size, other.size);
        update(&mut self.installed_size, other.installed_size);
        update(&mut self.installed_time, other.installed_time);
        update(&mut self.tmp_unpack_dir, other.tmp_unpack_dir);
        update(&mut self.abi_version, other.abi_version);
        if !other.conffiles.is_empty() {
            self.conffiles = other.conffiles;
        }
        if !other.alternatives.is_empty() {
            self.alternatives = other.alternatives;
        }
        if !other.depends.is_empty() {
            self.depends = other.depends;
        }
        if !other.conflicts.is_empty() {
            self.conflicts = other.conflicts;
        }
        if !other.provides.is_empty() {
            self.provides = other.provides;
        }
        if !other.replaces.is_empty() {
            self.replaces = other.replaces;
        }
        self.essential |= other.essential;
        self.auto_installed |= other.auto_installed;
        self.provided_by_hand |= other.provided_by_hand;

        self.state_flag |= other.state_flag & StateFlags::NONVOLATILE;
        if set_status {
            self.state_want = other.state_want;
            self.state_flag |= other.state_flag;
            self.state_status = other.state_status;
        } else if other.state_status.is_present() {
            self.state_status = other.state_status;
        }
    }

    /// Sort key used when ranking candidates: name, then version, then
    /// architecture slot. Deterministic for a given configuration.
    pub fn name_version_arch_cmp(a: &Package, b: &Package) -> Ordering {
        a.name
            .cmp(&b.name)
            .then_with(|| a.version.cmp(&b.version))
            .then_with(|| a.arch.cmp(&b.arch))
    }
}
