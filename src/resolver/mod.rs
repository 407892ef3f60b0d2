//! Dependency resolution against the package index.
//!
//! The walk mirrors how the installer commits work: for every compound
//! dependency of a root package, try what is already on disk, then the best
//! available candidate, recursing into each scheduled satisfier so the
//! output vector lists dependencies before their dependents. Names nothing
//! satisfies come back as rendered strings, never as a hard failure.
//!
//! Cycle safety comes from visit stamps on the abstracts: every top-level
//! call bumps an epoch, and a node whose stamp already equals the current
//! epoch is skipped. Probing (`pre_check`) and committing use separate
//! stamps so a probe never hides work from the commit walk.

mod candidate;

use crate::depend::{render_depend, CompoundDepend, Depend, DependKind};
use crate::index::{AbstractId, PkgId, PkgIndex};
use crate::package::{Package, StateStatus, StateWant};

impl PkgIndex {
    /// Marks an abstract as visited for this run; true when it already was.
    fn mark_visited(&mut self, ab: AbstractId, pre_check: bool) -> bool {
        let epoch = if pre_check {
            self.pre_resolve_epoch
        } else {
            self.resolve_epoch
        };
        let apkg = self.apkg_mut(ab);
        let stamp = if pre_check {
            &mut apkg.pre_deps_checked_epoch
        } else {
            &mut apkg.deps_checked_epoch
        };
        if *stamp == epoch {
            return true;
        }
        *stamp = epoch;
        false
    }

    fn visited(&self, ab: AbstractId, pre_check: bool) -> bool {
        let apkg = self.apkg(ab);
        if pre_check {
            apkg.pre_deps_checked_epoch == self.pre_resolve_epoch
        } else {
            apkg.deps_checked_epoch == self.resolve_epoch
        }
    }

    /// Membership by `(name, version, architecture)`, the same identity the
    /// index dedupes on.
    fn in_pkg_set(&self, set: &[PkgId], pkg: PkgId) -> bool {
        let probe = self.pkg(pkg);
        set.iter().any(|id| self.pkg(*id).same_triple(probe))
    }

    /// Walks the not-yet-satisfied dependency closure of `pkg`.
    ///
    /// Returns the packages to schedule (dependencies before dependents)
    /// and the rendered compounds nothing could satisfy. `pre_check` runs
    /// the same walk on the probing stamps, leaving the commit stamps
    /// untouched.
    pub fn unsatisfied_dependencies(
        &mut self,
        pkg: PkgId,
        pre_check: bool,
    ) -> (Vec<PkgId>, Vec<String>) {
        // fresh probe space; the commit stamp only turns over for a commit
        self.pre_resolve_epoch += 1;
        if !pre_check {
            self.resolve_epoch += 1;
        }

        let mut unsatisfied = Vec::new();
        let mut unresolved = Vec::new();
        self.unsatisfied_rec(pkg, &mut unsatisfied, &mut unresolved, pre_check);
        (unsatisfied, unresolved)
    }

    fn unsatisfied_rec(
        &mut self,
        pkg_id: PkgId,
        unsatisfied: &mut Vec<PkgId>,
        unresolved: &mut Vec<String>,
        pre_check: bool,
    ) {
        if self.mark_visited(pkg_id.abstract_id(), pre_check) {
            return;
        }

        let compounds = self.pkg(pkg_id).depends().to_vec();

        for compound in &compounds {
            if compound.kind() == DependKind::Greedy {
                self.collect_greedy_satisfiers(compound, unsatisfied, pre_check);
                continue;
            }

            // anything already on disk satisfies the compound outright
            let installed = compound.possibilities().iter().any(|dep| {
                let pred = |p: &Package| p.state_status.is_present() && dep.satisfied_by(p);
                match self.best_candidate_inner(dep.target(), &pred, true) {
                    Some(c) => pred(self.pkg(c)),
                    None => false,
                }
            });
            if installed {
                continue;
            }

            let mut satisfier = None;
            for dep in compound.possibilities() {
                let pred = |p: &Package| dep.satisfied_by(p);
                let Some(c) = self.best_candidate_inner(dep.target(), &pred, true) else {
                    continue;
                };
                if !dep.satisfied_by(self.pkg(c)) {
                    continue;
                }
                // user asked for removal; do not drag it back in for a
                // mere recommendation
                if matches!(
                    compound.kind(),
                    DependKind::Recommend | DependKind::Suggest
                ) && matches!(
                    self.pkg(c).state_want,
                    StateWant::Deinstall | StateWant::Purge
                ) {
                    log::info!(
                        "{}: ignoring recommendation for {} at user request",
                        self.pkg(pkg_id).name,
                        self.pkg(c).name
                    );
                    continue;
                }
                satisfier = Some(c);
                break;
            }

            match satisfier {
                Some(s) if compound.kind() == DependKind::Suggest => {
                    log::info!(
                        "package {} suggests installing {}",
                        self.pkg(pkg_id).name,
                        self.pkg(s).name
                    );
                }
                Some(s) => {
                    if s != pkg_id && !self.in_pkg_set(unsatisfied, s) {
                        self.unsatisfied_rec(s, unsatisfied, unresolved, pre_check);
                        unsatisfied.push(s);
                    }
                }
                None => {
                    if matches!(
                        compound.kind(),
                        DependKind::Recommend | DependKind::Suggest
                    ) {
                        let name = compound
                            .possibilities()
                            .first()
                            .map(|d| self.apkg(d.target()).name())
                            .unwrap_or_default();
                        log::info!(
                            "{}: unsatisfied recommendation for {}",
                            self.pkg(pkg_id).name,
                            name
                        );
                    } else {
                        unresolved.push(render_depend(self, compound));
                    }
                }
            }
        }
    }

    /// A greedy compound schedules every provider version that would come
    /// in clean: nothing unresolved underneath, and everything it pulls in
    /// already wanted.
    fn collect_greedy_satisfiers(
        &mut self,
        compound: &CompoundDepend,
        unsatisfied: &mut Vec<PkgId>,
        pre_check: bool,
    ) {
        for dep in compound.possibilities() {
            let providers = self.apkg(dep.target()).provided_by().to_vec();
            for provider in providers {
                let count = self.apkg(provider).versions().len();
                for slot in 0..count {
                    let scout = PkgId {
                        apkg: provider,
                        slot,
                    };
                    if self.pkg(scout).state_want == StateWant::Install
                        || self.visited(provider, pre_check)
                        || self.in_pkg_set(unsatisfied, scout)
                    {
                        continue;
                    }

                    let mut probe_deps = Vec::new();
                    let mut probe_lost = Vec::new();
                    self.unsatisfied_rec(scout, &mut probe_deps, &mut probe_lost, pre_check);

                    if !probe_lost.is_empty() {
                        log::debug!(
                            "not installing {} due to broken depends",
                            self.pkg(scout).name
                        );
                        continue;
                    }
                    let blocker = probe_deps
                        .iter()
                        .find(|p| self.pkg(**p).state_want != StateWant::Install);
                    match blocker {
                        Some(blocker) => log::debug!(
                            "not installing {} due to requirement for {}",
                            self.pkg(scout).name,
                            self.pkg(*blocker).name
                        ),
                        None => {
                            log::info!(
                                "adding satisfier for greedy dependence {}",
                                self.pkg(scout).name
                            );
                            unsatisfied.push(scout);
                        }
                    }
                }
            }
        }
    }

    /// Concrete packages that block installing `pkg`: installed or
    /// install-wanted versions of a conflicted name whose version matches
    /// the conflict bound. A name `pkg` also replaces is the upgrade path
    /// rather than a real conflict and is skipped.
    pub fn conflicts_with(&self, pkg_id: PkgId) -> Vec<PkgId> {
        let pkg = self.pkg(pkg_id);
        let mut found: Vec<PkgId> = Vec::new();

        for compound in pkg.conflicts() {
            for dep in compound.possibilities() {
                if pkg.replaces.contains(&dep.target()) {
                    continue;
                }
                let target = self.apkg(dep.target());
                for (slot, scout) in target.versions().iter().enumerate() {
                    if !(scout.state_status == StateStatus::Installed
                        || scout.state_want == StateWant::Install)
                    {
                        continue;
                    }
                    if !dep.satisfied_by(scout) {
                        continue;
                    }
                    let id = PkgId {
                        apkg: dep.target(),
                        slot,
                    };
                    if !found.iter().any(|f| self.pkg(*f).same_triple(scout)) {
                        found.push(id);
                    }
                }
            }
        }

        found
    }

    /// Whether any provider of the atom's target has a version matching
    /// the bound at all.
    pub fn dependence_satisfiable(&self, dep: &Depend) -> bool {
        self.apkg(dep.target())
            .provided_by()
            .iter()
            .any(|provider| {
                self.apkg(*provider)
                    .versions()
                    .iter()
                    .any(|p| dep.satisfied_by(p))
            })
    }

    /// Renders a compound the way unresolved reports print it.
    pub fn depend_str(&self, dep: &CompoundDepend) -> String {
        render_depend(self, dep)
    }
}
