//! The package index: abstract packages and their concrete versions.
//!
//! An abstract package is the named slot everything else hangs off of:
//! every concrete version of that name, every provider advertising the
//! name, every replacer and every reverse dependency. The webs between
//! abstracts are cyclic, so they are stored as arena indices
//! ([`AbstractId`]) into one flat vector owned by the index; concrete
//! records are addressed by [`PkgId`], their slot inside the parent's
//! version vector.

use std::collections::HashMap;

use crate::arch::{ArchId, ArchTable};
use crate::depend::DependKind;
use crate::package::{Package, StateFlags, StateStatus};

/// Handle to an abstract package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AbstractId(pub(crate) usize);

/// Handle to a concrete package record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PkgId {
    pub(crate) apkg: AbstractId,
    pub(crate) slot: usize,
}

impl PkgId {
    pub fn abstract_id(&self) -> AbstractId {
        self.apkg
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AbstractPkg {
    name: String,
    pkgs: Vec<Package>,
    provided_by: Vec<AbstractId>,
    replaced_by: Vec<AbstractId>,
    depended_upon_by: Vec<AbstractId>,
    pub(crate) state_status: StateStatus,
    pub(crate) state_flag: StateFlags,
    // resolver visit stamps, compared against the index epochs
    pub(crate) deps_checked_epoch: u64,
    pub(crate) pre_deps_checked_epoch: u64,
}

impl AbstractPkg {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn versions(&self) -> &[Package] {
        &self.pkgs
    }

    pub fn provided_by(&self) -> &[AbstractId] {
        &self.provided_by
    }

    pub fn replaced_by(&self) -> &[AbstractId] {
        &self.replaced_by
    }

    pub fn depended_upon_by(&self) -> &[AbstractId] {
        &self.depended_upon_by
    }

    pub fn state_status(&self) -> StateStatus {
        self.state_status
    }

    pub fn needs_detail(&self) -> bool {
        self.state_flag.contains(StateFlags::NEED_DETAIL)
    }
}

#[derive(Debug, Default)]
pub struct PkgIndex {
    abstracts: Vec<AbstractPkg>,
    by_name: HashMap<String, AbstractId>,
    file_owners: HashMap<String, PkgId>,
    pub(crate) archs: ArchTable,
    cli_args: Vec<String>,
    offline_root: Option<String>,
    pub(crate) resolve_epoch: u64,
    pub(crate) pre_resolve_epoch: u64,
}

impl PkgIndex {
    pub fn new(archs: ArchTable) -> Self {
        Self {
            archs,
            ..Self::default()
        }
    }

    /// Package names the user asked for on the command line; they win ties
    /// during candidate scoring.
    pub fn set_cli_args(&mut self, args: Vec<String>) {
        self.cli_args = args;
    }

    pub fn cli_args(&self) -> &[String] {
        &self.cli_args
    }

    /// Path prefix stripped from file-owner keys when the install root is
    /// mounted somewhere else.
    pub fn set_offline_root(&mut self, root: Option<String>) {
        self.offline_root = root;
    }

    pub fn arch_table(&self) -> &ArchTable {
        &self.archs
    }

    pub fn intern_arch(&mut self, name: &str) -> ArchId {
        self.archs.intern(name)
    }

    pub fn arch_priority(&self, arch: Option<ArchId>) -> u32 {
        arch.map(|a| self.archs.priority(a)).unwrap_or(0)
    }

    pub fn arch_name(&self, arch: Option<ArchId>) -> &str {
        arch.map(|a| self.archs.name(a)).unwrap_or("")
    }

    pub fn ensure_abstract(&mut self, name: &str) -> AbstractId {
        if let Some(id) = self.by_name.get(name) {
            return *id;
        }
        let id = AbstractId(self.abstracts.len());
        self.abstracts.push(AbstractPkg {
            name: name.to_string(),
            ..AbstractPkg::default()
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    pub fn fetch_abstract(&self, name: &str) -> Option<AbstractId> {
        self.by_name.get(name).copied()
    }

    pub fn apkg(&self, id: AbstractId) -> &AbstractPkg {
        &self.abstracts[id.0]
    }

    pub(crate) fn apkg_mut(&mut self, id: AbstractId) -> &mut AbstractPkg {
        &mut self.abstracts[id.0]
    }

    pub fn abstract_ids(&self) -> impl Iterator<Item = AbstractId> + '_ {
        (0..self.abstracts.len()).map(AbstractId)
    }

    pub fn pkg(&self, id: PkgId) -> &Package {
        &self.abstracts[id.apkg.0].pkgs[id.slot]
    }

    pub fn pkg_mut(&mut self, id: PkgId) -> &mut Package {
        &mut self.abstracts[id.apkg.0].pkgs[id.slot]
    }

    /// Links a provider to a provided name, once.
    pub(crate) fn add_provider(&mut self, provided: AbstractId, provider: AbstractId) {
        let entry = &mut self.abstracts[provided.0];
        if !entry.provided_by.contains(&provider) {
            entry.provided_by.push(provider);
        }
    }

    /// Marks a name as needing full details on the next feed pass.
    pub fn request_detail(&mut self, name: &str) {
        let id = self.ensure_abstract(name);
        self.flag_abstract_need_detail(id);
    }

    pub(crate) fn flag_abstract_need_detail(&mut self, id: AbstractId) {
        self.abstracts[id.0].state_flag |= StateFlags::NEED_DETAIL;
    }

    /// Spreads a record's detail request to everything it references, so
    /// the next feed pass loads those stanzas too.
    fn propagate_need_detail(&mut self, pkg: &Package) {
        let mut targets: Vec<AbstractId> = Vec::new();
        targets.extend(&pkg.provides);
        targets.extend(&pkg.replaces);
        for comp in pkg.depends.iter().chain(&pkg.conflicts) {
            targets.extend(comp.possibilities().iter().map(|p| p.target()));
        }

        for t in targets {
            let entry = &mut self.abstracts[t.0];
            if !entry.state_flag.contains(StateFlags::NEED_DETAIL) {
                log::debug!("propagating detail request to {}", entry.name);
                entry.state_flag |= StateFlags::NEED_DETAIL;
            }
        }
    }

    /// Inserts a parsed record under its abstract, wiring up self-provides,
    /// replacement links, and reverse dependencies. A record matching an
    /// existing `(name, version, architecture)` triple is merged instead of
    /// duplicated.
    pub fn insert_pkg(&mut self, mut pkg: Package, set_status: bool) -> PkgId {
        let ab = self.ensure_abstract(&pkg.name);
        pkg.parent = Some(ab);

        if pkg.state_status.is_present() {
            self.abstracts[ab.0].state_status = pkg.state_status;
        }

        if !pkg.provides.contains(&ab) {
            pkg.provides.insert(0, ab);
        }
        self.add_provider(ab, ab);

        // a replacement that also conflicts is an upgrade path: the old
        // name gets steered to this package during selection
        for r in pkg.replaces.clone() {
            if pkg.conflicts_with_abstract(r) {
                let replaced = &mut self.abstracts[r.0];
                if !replaced.replaced_by.contains(&ab) {
                    replaced.replaced_by.push(ab);
                }
            }
        }

        let mut dep_targets = Vec::new();
        for comp in &pkg.depends {
            if matches!(
                comp.kind(),
                DependKind::Depend | DependKind::PreDepend | DependKind::Recommend
            ) {
                dep_targets.extend(comp.possibilities().iter().map(|p| p.target()));
            }
        }
        for t in dep_targets {
            let entry = &mut self.abstracts[t.0];
            if !entry.depended_upon_by.contains(&ab) {
                entry.depended_upon_by.push(ab);
            }
        }

        if pkg.state_flag.contains(StateFlags::NEED_DETAIL) {
            self.propagate_need_detail(&pkg);
        }

        let existing = self.abstracts[ab.0]
            .pkgs
            .iter()
            .position(|p| p.same_triple(&pkg));
        match existing {
            Some(slot) => {
                self.abstracts[ab.0].pkgs[slot].merge(pkg, set_status);
                PkgId { apkg: ab, slot }
            }
            None => {
                let pkgs = &mut self.abstracts[ab.0].pkgs;
                pkgs.push(pkg);
                PkgId {
                    apkg: ab,
                    slot: pkgs.len() - 1,
                }
            }
        }
    }

    /// The abstract whose version vector answers for `name`: the name
    /// itself when it has concrete versions, otherwise its first provider.
    pub(crate) fn versions_abstract(&self, name: &str) -> Option<AbstractId> {
        let ab = self.fetch_abstract(name)?;
        if !self.abstracts[ab.0].pkgs.is_empty() {
            return Some(ab);
        }
        Some(
            self.abstracts[ab.0]
                .provided_by
                .first()
                .copied()
                .unwrap_or(ab),
        )
    }

    /// All concrete versions answering for a name, following one level of
    /// providers when the name itself is purely virtual.
    pub fn fetch_by_name(&self, name: &str) -> Vec<PkgId> {
        match self.versions_abstract(name) {
            Some(ab) => (0..self.abstracts[ab.0].pkgs.len())
                .map(|slot| PkgId { apkg: ab, slot })
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn fetch_by_name_version(&self, name: &str, version: &str) -> Option<PkgId> {
        self.fetch_by_name(name)
            .into_iter()
            .find(|id| self.pkg(*id).version.to_string() == version)
    }

    /// First installed (or unpacked) record answering for a name,
    /// optionally pinned to one destination root.
    pub fn fetch_installed_by_name(&self, name: &str, dest: Option<&str>) -> Option<PkgId> {
        self.fetch_by_name(name).into_iter().find(|id| {
            let pkg = self.pkg(*id);
            pkg.state_status.is_present() && (dest.is_none() || pkg.dest.as_deref() == dest)
        })
    }

    pub fn fetch_all_installed(&self) -> Vec<PkgId> {
        self.all_pkgs(|pkg| pkg.state_status.is_present())
    }

    pub fn fetch_available(&self) -> Vec<PkgId> {
        self.all_pkgs(|_| true)
    }

    fn all_pkgs(&self, keep: impl Fn(&Package) -> bool) -> Vec<PkgId> {
        let mut out = Vec::new();
        for (i, ab) in self.abstracts.iter().enumerate() {
            for (slot, pkg) in ab.pkgs.iter().enumerate() {
                if keep(pkg) {
                    out.push(PkgId {
                        apkg: AbstractId(i),
                        slot,
                    });
                }
            }
        }
        out
    }

    fn strip_offline_root<'a>(&self, path: &'a str) -> &'a str {
        match &self.offline_root {
            Some(root) => path.strip_prefix(root.as_str()).unwrap_or(path),
            None => path,
        }
    }

    pub fn file_owner(&self, path: &str) -> Option<PkgId> {
        self.file_owners.get(self.strip_offline_root(path)).copied()
    }

    pub fn file_owner_remove(&mut self, path: &str) {
        let key = self.strip_offline_root(path).to_string();
        self.file_owners.remove(&key);
    }

    /// Assigns a file to a package. Directories are never owned. Taking a
    /// file over from another package marks both filelists as needing a
    /// rewrite.
    pub fn set_file_owner(&mut self, path: &str, owner: PkgId) {
        if path.ends_with('/') {
            return;
        }
        let key = self.strip_offline_root(path).to_string();

        if let Some(old) = self.file_owners.insert(key.clone(), owner) {
            if old != owner {
                let prev = self.pkg_mut(old);
                prev.installed_files.retain(|f| f != &key);
                prev.state_flag |= StateFlags::FILELIST_CHANGED;
                self.pkg_mut(owner).state_flag |= StateFlags::FILELIST_CHANGED;
            }
        }

        let owner_pkg = self.pkg_mut(owner);
        if !owner_pkg.installed_files.contains(&key) {
            owner_pkg.installed_files.push(key);
        }
    }

    /// One sweep of the detail-loading loop: counts abstracts flagged for
    /// detail that no pass has seen yet, marking them seen.
    pub(crate) fn sweep_need_detail(&mut self) -> usize {
        let mut fresh = 0;
        for ab in &mut self.abstracts {
            if ab.state_flag.contains(StateFlags::NEED_DETAIL)
                && !ab.state_flag.contains(StateFlags::MARKED)
            {
                log::debug!("found incomplete flagged package {}", ab.name);
                ab.state_flag |= StateFlags::MARKED;
                fresh += 1;
            }
        }
        fresh
    }

    /// Names that were requested but never showed up in any feed, directly
    /// or through a provider.
    pub(crate) fn unresolved_detail_names(&self) -> Vec<&str> {
        self.abstracts
            .iter()
            .filter(|ab| {
                ab.needs_detail()
                    && ab.pkgs.is_empty()
                    && !ab
                        .provided_by
                        .iter()
                        .any(|p| !self.abstracts[p.0].pkgs.is_empty())
            })
            .map(|ab| ab.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depend::{parse_depends, parse_provides, parse_replaces};
    use crate::package::Version;

    fn index() -> PkgIndex {
        PkgIndex::new(ArchTable::from_priorities([("all", 1)]))
    }

    fn pkg(index: &mut PkgIndex, name: &str, version: &str) -> Package {
        let mut p = Package::new();
        p.name = name.to_string();
        p.version = Version::parse(version);
        p.arch = Some(index.intern_arch("all"));
        p
    }

    #[test]
    fn insert_links_parent_and_self_provides() {
        let mut idx = index();
        let p = pkg(&mut idx, "busybox", "1.36.1-1");
        let id = idx.insert_pkg(p, false);

        let ab = idx.fetch_abstract("busybox").unwrap();
        assert_eq!(id.abstract_id(), ab);
        assert_eq!(idx.pkg(id).parent, Some(ab));
        assert!(idx.apkg(ab).provided_by().contains(&ab));
        assert!(idx.pkg(id).provides.contains(&ab));
    }

    #[test]
    fn duplicate_triple_merges_instead_of_duplicating() {
        let mut idx = index();
        let first = pkg(&mut idx, "busybox", "1.36.1-1");
        idx.insert_pkg(first, false);

        let mut again = pkg(&mut idx, "busybox", "1.36.1-1");
        again.section = Some("base".to_string());
        again.state_status = StateStatus::Installed;
        idx.insert_pkg(again, true);

        let ab = idx.fetch_abstract("busybox").unwrap();
        assert_eq!(idx.apkg(ab).versions().len(), 1);
        assert_eq!(idx.apkg(ab).versions()[0].section.as_deref(), Some("base"));
        assert_eq!(idx.apkg(ab).state_status(), StateStatus::Installed);

        // a different version is a new record
        let other = pkg(&mut idx, "busybox", "1.36.1-2");
        idx.insert_pkg(other, false);
        assert_eq!(idx.apkg(ab).versions().len(), 2);
    }

    #[test]
    fn provides_answer_for_virtual_names() {
        let mut idx = index();
        let mut p = pkg(&mut idx, "uhttpd", "2.0");
        parse_provides(&mut idx, &mut p, "httpd");
        let id = idx.insert_pkg(p, false);

        let httpd = idx.fetch_abstract("httpd").unwrap();
        assert!(idx.apkg(httpd).provided_by().contains(&id.abstract_id()));
        // the virtual name resolves to the provider's versions
        assert_eq!(idx.fetch_by_name("httpd"), vec![id]);
    }

    #[test]
    fn depended_upon_by_is_wired() {
        let mut idx = index();
        let mut p = pkg(&mut idx, "dropbear", "2024.85-1");
        p.depends = parse_depends(&mut idx, DependKind::Depend, "libc, zlib (>= 1.2)");
        let id = idx.insert_pkg(p, false);

        for name in ["libc", "zlib"] {
            let ab = idx.fetch_abstract(name).unwrap();
            assert!(idx.apkg(ab).depended_upon_by().contains(&id.abstract_id()));
        }
    }

    #[test]
    fn replaces_with_conflicts_records_upgrade_path() {
        let mut idx = index();
        let mut p = pkg(&mut idx, "openssh-server", "9.6-1");
        p.conflicts = parse_depends(&mut idx, DependKind::Conflict, "dropbear");
        parse_replaces(&mut idx, &mut p, "dropbear");
        let id = idx.insert_pkg(p, false);

        let dropbear = idx.fetch_abstract("dropbear").unwrap();
        assert_eq!(idx.apkg(dropbear).replaced_by(), &[id.abstract_id()]);

        // replaces without conflicts stays a soft replace
        let mut q = pkg(&mut idx, "fullsshd", "1.0");
        parse_replaces(&mut idx, &mut q, "tinysshd");
        idx.insert_pkg(q, false);
        let tinysshd = idx.fetch_abstract("tinysshd").unwrap();
        assert!(idx.apkg(tinysshd).replaced_by().is_empty());
    }

    #[test]
    fn installed_lookup_respects_dest() {
        let mut idx = index();
        let mut p = pkg(&mut idx, "busybox", "1.36.1-1");
        p.state_status = StateStatus::Installed;
        p.dest = Some("root".to_string());
        idx.insert_pkg(p, true);

        assert!(idx.fetch_installed_by_name("busybox", None).is_some());
        assert!(idx.fetch_installed_by_name("busybox", Some("root")).is_some());
        assert!(idx.fetch_installed_by_name("busybox", Some("ram")).is_none());
        assert_eq!(idx.fetch_all_installed().len(), 1);
    }

    #[test]
    fn fetch_by_name_version_matches_rendered_form() {
        let mut idx = index();
        let p = pkg(&mut idx, "busybox", "1:1.36.1-1");
        let id = idx.insert_pkg(p, false);
        assert_eq!(idx.fetch_by_name_version("busybox", "1:1.36.1-1"), Some(id));
        assert_eq!(idx.fetch_by_name_version("busybox", "1.36.1-1"), None);
    }

    #[test]
    fn file_owner_reassignment_flags_both() {
        let mut idx = index();
        let a = pkg(&mut idx, "busybox", "1.0");
        let a = idx.insert_pkg(a, false);
        let b = pkg(&mut idx, "coreutils-ls", "9.4");
        let b = idx.insert_pkg(b, false);

        idx.set_file_owner("/bin/ls", a);
        assert_eq!(idx.file_owner("/bin/ls"), Some(a));
        idx.set_file_owner("/bin/ls", b);
        assert_eq!(idx.file_owner("/bin/ls"), Some(b));
        assert!(idx.pkg(a).state_flag.contains(StateFlags::FILELIST_CHANGED));
        assert!(idx.pkg(b).state_flag.contains(StateFlags::FILELIST_CHANGED));
        assert!(idx.pkg(a).installed_files.is_empty());

        // directories are never owned
        idx.set_file_owner("/usr/share/doc/", a);
        assert_eq!(idx.file_owner("/usr/share/doc/"), None);

        idx.file_owner_remove("/bin/ls");
        assert_eq!(idx.file_owner("/bin/ls"), None);
    }

    #[test]
    fn offline_root_is_stripped_from_keys() {
        let mut idx = index();
        idx.set_offline_root(Some("/mnt/root".to_string()));
        let a = pkg(&mut idx, "busybox", "1.0");
        let a = idx.insert_pkg(a, false);

        idx.set_file_owner("/mnt/root/bin/sh", a);
        assert_eq!(idx.file_owner("/bin/sh"), Some(a));
        assert_eq!(idx.file_owner("/mnt/root/bin/sh"), Some(a));
    }
}
