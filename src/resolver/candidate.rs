//! Best-candidate selection: one concrete package per abstract name.

use crate::index::{AbstractId, PkgId, PkgIndex};
use crate::package::{Package, StateFlags};

impl PkgIndex {
    /// Picks the record to install for a name, following providers and
    /// replacements. Ties between equally good candidates go to the
    /// package the user named on the command line.
    pub fn best_candidate_by_name(&mut self, name: &str) -> Option<PkgId> {
        let ab = self.fetch_abstract(name)?;
        self.pre_resolve_epoch += 1;
        self.best_candidate_inner(ab, &|_| true, false)
    }

    /// Picks the best record for an abstract among candidates passing
    /// `pred`. `quiet` suppresses the cross-provider arch fallback and its
    /// chatter, which is what the dependency walk wants.
    pub fn best_candidate(
        &mut self,
        apkg: AbstractId,
        pred: &dyn Fn(&Package) -> bool,
        quiet: bool,
    ) -> Option<PkgId> {
        self.pre_resolve_epoch += 1;
        self.best_candidate_inner(apkg, pred, quiet)
    }

    pub(crate) fn best_candidate_inner(
        &mut self,
        apkg: AbstractId,
        pred: &dyn Fn(&Package) -> bool,
        quiet: bool,
    ) -> Option<PkgId> {
        let providers = self.apkg(apkg).provided_by().to_vec();
        if providers.is_empty() {
            return None;
        }

        log::debug!("best installation candidate for {}", self.apkg(apkg).name());
        if providers.len() > 1 {
            log::debug!(
                "{} is provided by {} packages",
                self.apkg(apkg).name(),
                providers.len()
            );
        }

        let mut matching: Vec<PkgId> = Vec::new();
        let mut matching_abstracts: Vec<AbstractId> = Vec::new();
        let mut arch_filtered = false;

        for provider in &providers {
            let mut provider = *provider;

            // a replaced provider steers selection to its replacer, unless
            // the replacer is already a provider in its own right
            let replaced_by = self.apkg(provider).replaced_by().to_vec();
            if let Some(&replacement) = replaced_by.first() {
                if replaced_by.len() > 1 {
                    log::info!(
                        "multiple replacers for {}, using first one ({})",
                        self.apkg(provider).name(),
                        self.apkg(replacement).name()
                    );
                }
                if replacement != provider {
                    if providers.contains(&replacement) {
                        continue;
                    }
                    provider = replacement;
                }
            }

            let count = self.apkg(provider).versions().len();
            if count == 0 {
                log::debug!("no packages for provider {}", self.apkg(provider).name());
                continue;
            }

            for slot in 0..count {
                let id = PkgId {
                    apkg: provider,
                    slot,
                };
                let priority = self.arch_priority(self.pkg(id).arch);
                log::debug!(
                    "considering {} {} arch={} priority={}",
                    self.pkg(id).name,
                    self.pkg(id).version,
                    self.arch_name(self.pkg(id).arch),
                    priority
                );
                if priority == 0 {
                    arch_filtered = true;
                    continue;
                }
                // feeds list the same record twice now and then
                if self.in_pkg_set(&matching, id) {
                    continue;
                }
                if self.probe_has_unresolved(id) {
                    continue;
                }
                matching.push(id);
                let parent = self.pkg(id).parent.unwrap_or(provider);
                if !matching_abstracts.contains(&parent) {
                    matching_abstracts.push(parent);
                }
            }
        }

        if matching.is_empty() {
            if arch_filtered {
                log::error!(
                    "packages for {} found, but incompatible with the architectures configured",
                    self.apkg(apkg).name()
                );
            }
            return None;
        }

        matching.sort_by(|a, b| Package::name_version_arch_cmp(self.pkg(*a), self.pkg(*b)));
        matching_abstracts.sort_by(|a, b| self.apkg(*a).name().cmp(self.apkg(*b).name()));

        // scoring pass: exact-name and user-named candidates outrank bare
        // providers; the first of equals keeps the spot
        let mut good: Option<PkgId> = None;
        let mut good_score = 0u32;
        for &m in &matching {
            let pkg = self.pkg(m);
            if !pred(pkg) {
                continue;
            }
            let mut score = 1;
            if pkg.name == self.apkg(apkg).name() {
                score += 1;
            }
            if self.cli_args().iter().any(|arg| arg == &pkg.name) {
                score += 1;
            }
            log::debug!("candidate {} {} (score {})", pkg.name, pkg.version, score);
            if score <= good_score {
                continue;
            }
            good = Some(m);
            good_score = score;
            if pkg.provided_by_hand {
                break;
            }
        }

        let mut held: Option<PkgId> = None;
        let mut latest_installed_parent: Option<PkgId> = None;
        let mut latest_matching: Option<PkgId> = None;
        for &m in &matching {
            latest_matching = Some(m);
            let pkg = self.pkg(m);
            if pkg
                .parent
                .is_some_and(|p| self.apkg(p).state_status().is_present())
            {
                latest_installed_parent = Some(m);
            }
            if pkg
                .state_flag
                .intersects(StateFlags::HOLD | StateFlags::PREFER)
            {
                if let Some(h) = held {
                    log::info!(
                        "multiple packages ({} and {}) providing same name marked HOLD or PREFER, using latest",
                        self.pkg(h).name,
                        pkg.name
                    );
                }
                held = Some(m);
            }
        }

        // with several providers and no other preference, the host's
        // architecture ranking decides
        let mut priorized: Option<PkgId> = None;
        if good.is_none()
            && held.is_none()
            && latest_installed_parent.is_none()
            && matching_abstracts.len() > 1
            && !quiet
        {
            let mut best_priority = 0;
            for &m in &matching {
                let priority = self.arch_priority(self.pkg(m).arch);
                if priority > best_priority {
                    priorized = Some(m);
                    best_priority = priority;
                }
            }
        }

        if let Some(g) = good {
            return Some(g);
        }
        if let Some(h) = held {
            log::info!("using held package {}", self.pkg(h).name);
            return Some(h);
        }
        if let Some(i) = latest_installed_parent {
            log::info!(
                "using latest version of installed package {}",
                self.pkg(i).name
            );
            return Some(i);
        }
        if let Some(p) = priorized {
            log::info!(
                "using priorized matching {} {} {}",
                self.pkg(p).name,
                self.pkg(p).version,
                self.arch_name(self.pkg(p).arch)
            );
            return Some(p);
        }
        if matching_abstracts.len() > 1 {
            log::info!(
                "no preferred candidate among {} providers for {}",
                matching_abstracts.len(),
                self.apkg(apkg).name()
            );
            return None;
        }
        if let Some(l) = latest_matching {
            log::info!(
                "using latest matching {} {} {}",
                self.pkg(l).name,
                self.pkg(l).version,
                self.arch_name(self.pkg(l).arch)
            );
            return Some(l);
        }
        None
    }

    /// Probes whether a candidate could be committed at all: anything
    /// unresolvable in its dependency closure disqualifies it up front.
    fn probe_has_unresolved(&mut self, pkg: PkgId) -> bool {
        let mut probe_deps = Vec::new();
        let mut probe_lost = Vec::new();
        self.unsatisfied_rec(pkg, &mut probe_deps, &mut probe_lost, true);

        for missing in &probe_lost {
            log::error!(
                "cannot find dependency {} for {}",
                missing,
                self.pkg(pkg).name
            );
        }
        !probe_lost.is_empty()
    }
}
